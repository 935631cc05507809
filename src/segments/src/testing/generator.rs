//! Synthetic flow source for tests and demos.

use std::time::Duration;

use async_trait::async_trait;
use model::EnrichedFlow;

use crate::base::{parse_optional, BaseSegment, Segment, SegmentConfig, SegmentError};

const DEFAULT_INTERVAL_MS: u64 = 10;

/// Emits a synthetic TCP flow on a fixed interval while forwarding upstream
/// records unchanged. The injected records are what the branch deadlock
/// tests count.
pub struct Generator {
    base: BaseSegment,
    interval: Duration,
}

impl Generator {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let millis =
            parse_optional::<u64>(config, "generator", "interval")?.unwrap_or(DEFAULT_INTERVAL_MS);
        if millis == 0 {
            return Err(SegmentError::InvalidConfig {
                segment: "generator",
                key: "interval",
                value: "0".into(),
                reason: "must be positive milliseconds".into(),
            });
        }
        Ok(Self {
            base: BaseSegment::default(),
            interval: Duration::from_millis(millis),
        })
    }

    fn synthetic_flow() -> Box<EnrichedFlow> {
        Box::new(EnrichedFlow {
            proto: 6,
            src_port: 12345,
            dst_port: 443,
            bytes: 230,
            packets: 3,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Segment for Generator {
    fn name(&self) -> &'static str {
        "generator"
    }

    fn base(&self) -> &BaseSegment {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.base
    }

    async fn run(&mut self) {
        let (mut input, output) = self.base.take_wiring();
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                received = input.recv() => match received {
                    Some(flow) => {
                        if output.send(flow).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if output.send(Self::synthetic_flow()).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
