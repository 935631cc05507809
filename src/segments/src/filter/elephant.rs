//! Filter forwarding only unusually large flows.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::base::{
    parse_optional, reject, BaseFilterSegment, BaseSegment, FlowSender, Segment, SegmentConfig,
    SegmentError,
};

const DEFAULT_PERCENTILE: f64 = 99.0;
const DEFAULT_WINDOW: usize = 1000;

/// Forwards flows whose byte count reaches a percentile of the recently seen
/// traffic; everything below goes to drops.
///
/// Config: `percentile` (0 < p <= 100, default 99) and `window` (number of
/// samples the percentile is computed over, default 1000). While the window
/// is empty every flow passes, so the filter warms itself up.
pub struct Elephant {
    filter: BaseFilterSegment,
    percentile: f64,
    window_size: usize,
    window: VecDeque<u64>,
}

impl Elephant {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let percentile =
            parse_optional::<f64>(config, "elephant", "percentile")?.unwrap_or(DEFAULT_PERCENTILE);
        if !(percentile > 0.0 && percentile <= 100.0) {
            return Err(SegmentError::InvalidConfig {
                segment: "elephant",
                key: "percentile",
                value: percentile.to_string(),
                reason: "must be in (0, 100]".into(),
            });
        }
        let window_size =
            parse_optional::<usize>(config, "elephant", "window")?.unwrap_or(DEFAULT_WINDOW);
        if window_size == 0 {
            return Err(SegmentError::InvalidConfig {
                segment: "elephant",
                key: "window",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(Self {
            filter: BaseFilterSegment::default(),
            percentile,
            window_size,
            window: VecDeque::with_capacity(window_size),
        })
    }

    /// Current byte threshold: the configured percentile of the window.
    fn threshold(&self) -> u64 {
        if self.window.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.window.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (self.percentile / 100.0 * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }

    fn observe(&mut self, bytes: u64) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(bytes);
    }
}

#[async_trait]
impl Segment for Elephant {
    fn name(&self) -> &'static str {
        "elephant"
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
        let (mut input, output) = self.filter.base.take_wiring();
        let drops = self.filter.take_drops();
        while let Some(flow) = input.recv().await {
            let threshold = self.threshold();
            self.observe(flow.bytes);
            if flow.bytes >= threshold {
                if output.send(flow).await.is_err() {
                    break;
                }
            } else {
                reject(&drops, flow).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_segment;
    use model::EnrichedFlow;

    fn flow_with_bytes(bytes: u64) -> Box<EnrichedFlow> {
        Box::new(EnrichedFlow {
            bytes,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn keeps_large_flows_and_drops_small_ones() {
        let segment = Elephant::from_config(&Default::default()).expect("config");
        let (input, mut output, handle) = run_segment(Box::new(segment));

        input.send(flow_with_bytes(10)).await.expect("send");
        assert_eq!(output.recv().await.expect("warm-up flow passes").bytes, 10);

        input.send(flow_with_bytes(9)).await.expect("send");
        input.send(flow_with_bytes(100)).await.expect("send");
        let result = output.recv().await.expect("large flow passes");
        assert_eq!(result.bytes, 100, "small flow was forwarded");

        drop(input);
        handle.await.expect("segment task");
    }

    #[test]
    fn rejects_bad_percentile() {
        let mut config = SegmentConfig::new();
        config.insert("percentile".into(), "0".into());
        assert!(Elephant::from_config(&config).is_err());
    }
}
