//! Clears named fields from passing flows, or everything but them.

use async_trait::async_trait;
use model::EnrichedFlow;

use crate::base::{BaseSegment, Segment, SegmentConfig, SegmentError};

enum Policy {
    Drop,
    Keep,
}

/// Field scrubber. `policy: drop` clears the listed `fields`; `policy: keep`
/// clears every field except them. Unknown field names abort the build.
pub struct DropFields {
    base: BaseSegment,
    policy: Policy,
    fields: Vec<String>,
}

impl DropFields {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let policy = match config.get("policy").map(String::as_str) {
            Some("drop") => Policy::Drop,
            Some("keep") => Policy::Keep,
            Some(other) => {
                return Err(SegmentError::InvalidConfig {
                    segment: "dropfields",
                    key: "policy",
                    value: other.to_string(),
                    reason: "must be `drop` or `keep`".into(),
                })
            }
            None => {
                return Err(SegmentError::MissingConfig {
                    segment: "dropfields",
                    key: "policy",
                })
            }
        };
        let fields: Vec<String> = config
            .get("fields")
            .map(|raw| {
                raw.split(',')
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if fields.is_empty() {
            return Err(SegmentError::MissingConfig {
                segment: "dropfields",
                key: "fields",
            });
        }
        // Validate names once at build time so typos fail the build rather
        // than silently doing nothing per record.
        let mut probe = EnrichedFlow::default();
        for name in &fields {
            probe
                .clear_field(name)
                .map_err(|err| SegmentError::InvalidConfig {
                    segment: "dropfields",
                    key: "fields",
                    value: name.clone(),
                    reason: err.to_string(),
                })?;
        }
        Ok(Self {
            base: BaseSegment::default(),
            policy,
            fields,
        })
    }

    fn apply(&self, flow: &mut EnrichedFlow) {
        match self.policy {
            Policy::Drop => {
                for name in &self.fields {
                    // Names were validated at build time.
                    let _ = flow.clear_field(name);
                }
            }
            Policy::Keep => flow.retain_fields(&self.fields),
        }
    }
}

#[async_trait]
impl Segment for DropFields {
    fn name(&self) -> &'static str {
        "dropfields"
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
            self.apply(&mut flow);
            if output.send(flow).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, test_segment};

    #[tokio::test]
    async fn drop_policy_clears_listed_fields() {
        let flow = EnrichedFlow {
            in_if: 1,
            out_if: 1,
            ..Default::default()
        };
        let result = test_segment(
            "dropfields",
            &config(&[("policy", "drop"), ("fields", "InIf")]),
            flow,
        )
        .await
        .expect("flow forwarded");
        assert_eq!(result.in_if, 0);
        assert_eq!(result.out_if, 1);
    }

    #[tokio::test]
    async fn keep_policy_clears_everything_else() {
        let flow = EnrichedFlow {
            bytes: 42,
            packets: 7,
            proto: 6,
            ..Default::default()
        };
        let result = test_segment(
            "dropfields",
            &config(&[("policy", "keep"), ("fields", "bytes,proto")]),
            flow,
        )
        .await
        .expect("flow forwarded");
        assert_eq!(result.bytes, 42);
        assert_eq!(result.proto, 6);
        assert_eq!(result.packets, 0);
    }

    #[tokio::test]
    async fn unknown_field_aborts_build() {
        let result = DropFields::from_config(&config(&[
            ("policy", "drop"),
            ("fields", "NoSuchField"),
        ]));
        assert!(result.is_err());
    }
}
