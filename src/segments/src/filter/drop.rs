//! Segment rejecting every flow.

use async_trait::async_trait;

use crate::base::{
    reject, BaseFilterSegment, BaseSegment, FlowSender, Segment, SegmentConfig, SegmentError,
};

/// Rejects every flow. The main output never carries a record; with a drops
/// subscriber the full stream surfaces there instead.
#[derive(Default)]
pub struct DropSegment {
    filter: BaseFilterSegment,
}

impl DropSegment {
    pub fn from_config(_config: &SegmentConfig) -> Result<Self, SegmentError> {
        Ok(Self::default())
    }
}

#[async_trait]
impl Segment for DropSegment {
    fn name(&self) -> &'static str {
        "drop"
    }

    fn base(&self) -> &BaseSegment {
        &self.filter.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.filter.base
    }

    fn subscribe_drops(&mut self, drops: FlowSender) {
        self.filter.subscribe_drops(drops);
    }

    async fn run(&mut self) {
        let (mut input, _output) = self.filter.base.take_wiring();
        let drops = self.filter.take_drops();
        while let Some(flow) = input.recv().await {
            reject(&drops, flow).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{config, test_segment};
    use model::EnrichedFlow;

    #[tokio::test]
    async fn drops_every_flow() {
        let result = test_segment("drop", &config(&[]), EnrichedFlow::default()).await;
        assert!(result.is_none());
    }
}
