//! Scales sampled flow counters back to their original volume.

use async_trait::async_trait;

use crate::base::{parse_optional, BaseSegment, Segment, SegmentConfig, SegmentError};

/// Multiplies `bytes` and `packets` by the flow's sampling rate. Flows that
/// carry no sampling rate use the `fallback` rate when configured, and pass
/// unchanged otherwise. Scaled flows are marked `normalized`.
pub struct Normalize {
    base: BaseSegment,
    fallback: u64,
}

impl Normalize {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let fallback = parse_optional::<u64>(config, "normalize", "fallback")?.unwrap_or(0);
        Ok(Self {
            base: BaseSegment::default(),
            fallback,
        })
    }
}

#[async_trait]
impl Segment for Normalize {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn base(&self) -> &BaseSegment {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.base
    }

    async fn run(&mut self) {
        let (mut input, output) = self.base.take_wiring();
        while let Some(mut flow) = input.recv().await {
            if flow.normalized {
                tracing::debug!(segment = "normalize", "flow already normalized, passing");
            } else {
                let rate = if flow.sampling_rate > 0 {
                    flow.sampling_rate
                } else {
                    self.fallback
                };
                if rate > 0 {
                    flow.bytes = flow.bytes.saturating_mul(rate);
                    flow.packets = flow.packets.saturating_mul(rate);
                    flow.sampling_rate = rate;
                    flow.normalized = true;
                }
            }
            if output.send(flow).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{config, test_segment};
    use model::EnrichedFlow;

    #[tokio::test]
    async fn scales_by_in_flow_sampling_rate() {
        let flow = EnrichedFlow {
            sampling_rate: 32,
            bytes: 1,
            ..Default::default()
        };
        let result = test_segment("normalize", &config(&[]), flow)
            .await
            .expect("forwarded");
        assert_eq!(result.bytes, 32);
        assert!(result.normalized);
    }

    #[tokio::test]
    async fn scales_by_fallback_rate() {
        let flow = EnrichedFlow {
            sampling_rate: 0,
            bytes: 1,
            ..Default::default()
        };
        let result = test_segment("normalize", &config(&[("fallback", "42")]), flow)
            .await
            .expect("forwarded");
        assert_eq!(result.bytes, 42);
    }

    #[tokio::test]
    async fn passes_unsampled_flows_unchanged() {
        let flow = EnrichedFlow {
            sampling_rate: 0,
            bytes: 1,
            ..Default::default()
        };
        let result = test_segment("normalize", &config(&[]), flow)
            .await
            .expect("forwarded");
        assert_eq!(result.bytes, 1);
        assert!(!result.normalized);
    }
}
