//! Tags flows whose addresses appear in an address list file.

mod tagging;

pub use tagging::{tag_as_listed, tag_with_id, TAG_ID_LISTED};

use std::collections::HashSet;
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::base::{BaseSegment, Segment, SegmentConfig, SegmentError};

/// Matches source and destination addresses against a line-oriented address
/// list (`path` key; `#` comments and blank lines ignored) and tags hits via
/// [`tag_as_listed`]. The list is loaded once when the segment starts; an
/// unreadable list is a fatal resource error that shuts the pipeline down.
pub struct Matching {
    base: BaseSegment,
    path: String,
}

impl Matching {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let path = config
            .get("path")
            .filter(|p| !p.trim().is_empty())
            .ok_or(SegmentError::MissingConfig {
                segment: "matching",
                key: "path",
            })?
            .clone();
        Ok(Self {
            base: BaseSegment::default(),
            path,
        })
    }

    async fn load_list(&self) -> std::io::Result<HashSet<IpAddr>> {
        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut list = HashSet::new();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.parse::<IpAddr>() {
                Ok(addr) => {
                    list.insert(addr);
                }
                Err(_) => {
                    tracing::warn!(segment = "matching", line, "not an address, skipping line");
                }
            }
        }
        Ok(list)
    }
}

#[async_trait]
impl Segment for Matching {
    fn name(&self) -> &'static str {
        "matching"
    }

    fn base(&self) -> &BaseSegment {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.base
    }

    async fn run(&mut self) {
        let (mut input, output) = self.base.take_wiring();
        let list = match self.load_list().await {
            Ok(list) => {
                tracing::info!(
                    segment = "matching",
                    path = %self.path,
                    addresses = list.len(),
                    "address list loaded"
                );
                list
            }
            Err(err) => {
                tracing::error!(
                    segment = "matching",
                    path = %self.path,
                    error = %err,
                    "address list not readable, shutting down pipeline"
                );
                self.base.shutdown_parent_pipeline();
                return;
            }
        };
        while let Some(mut flow) = input.recv().await {
            let matched = flow.src_addr.is_some_and(|a| list.contains(&a))
                || flow.dst_addr.is_some_and(|a| list.contains(&a));
            if matched {
                tag_as_listed(&mut flow);
            }
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
    use model::EnrichedFlow;
    use std::io::Write;

    #[tokio::test]
    async fn tags_listed_addresses() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "# known-bad hosts").expect("write");
        writeln!(file, "198.51.100.7").expect("write");
        let cfg = config(&[("path", file.path().to_str().expect("utf8 path"))]);

        let flow = EnrichedFlow {
            dst_addr: Some("198.51.100.7".parse().expect("addr")),
            ..Default::default()
        };
        let result = test_segment("matching", &cfg, flow).await.expect("forwarded");
        assert!(result.inlist);
        assert_eq!(result.tid, TAG_ID_LISTED);
        assert_eq!(result.note, "bad_ip");

        let clean = EnrichedFlow {
            dst_addr: Some("198.51.100.8".parse().expect("addr")),
            ..Default::default()
        };
        let result = test_segment("matching", &cfg, clean).await.expect("forwarded");
        assert!(!result.inlist);
    }
}
