//! Identity passthrough segment.

use async_trait::async_trait;

use crate::base::{BaseSegment, Segment, SegmentConfig, SegmentError};

/// Forwards every flow unchanged. Useful as a placeholder slot and as the
/// minimal segment for pipeline plumbing tests.
#[derive(Default)]
pub struct Pass {
    base: BaseSegment,
}

impl Pass {
    pub fn from_config(_config: &SegmentConfig) -> Result<Self, SegmentError> {
        Ok(Self::default())
    }
}

#[async_trait]
impl Segment for Pass {
    fn name(&self) -> &'static str {
        "pass"
    }

    fn base(&self) -> &BaseSegment {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.base
    }

    async fn run(&mut self) {
        let (mut input, output) = self.base.take_wiring();
        while let Some(flow) = input.recv().await {
            if output.send(flow).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{config, test_segment};
    use model::{EnrichedFlow, FlowType};

    #[tokio::test]
    async fn passthrough() {
        let flow = EnrichedFlow {
            flow_type: FlowType::NetflowV9,
            ..Default::default()
        };
        let result = test_segment("pass", &config(&[]), flow)
            .await
            .expect("pass must forward the flow");
        assert_eq!(result.flow_type, FlowType::NetflowV9);
    }
}
