//! Determines which address of a flow is the remote one.

use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use model::{EnrichedFlow, FlowDirection, RemoteAddr};

use crate::base::{BaseSegment, Segment, SegmentConfig, SegmentError};

enum Policy {
    /// Derive from the flow direction reported by the exporter: incoming
    /// flows are remote on the source side, outgoing flows on the
    /// destination side.
    Border,
    /// Remote address is always the source.
    Src,
    /// Remote address is always the destination.
    Dst,
    /// Match both addresses against a list of local prefixes; the first
    /// address not covered by any prefix is the remote one.
    Cidr(Vec<Prefix>),
}

/// Annotates flows with the remote address side according to `policy`
/// (`border`, `src`, `dst`, or `cidr` with a `filename` CSV of local
/// prefixes).
pub struct RemoteAddress {
    base: BaseSegment,
    policy: Policy,
}

impl RemoteAddress {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let policy = match config.get("policy").map(String::as_str) {
            Some("border") => Policy::Border,
            Some("src") => Policy::Src,
            Some("dst") => Policy::Dst,
            Some("cidr") => {
                let filename = config.get("filename").filter(|f| !f.is_empty()).ok_or(
                    SegmentError::MissingConfig {
                        segment: "remoteaddress",
                        key: "filename",
                    },
                )?;
                Policy::Cidr(load_prefixes(Path::new(filename))?)
            }
            Some(other) => {
                return Err(SegmentError::InvalidConfig {
                    segment: "remoteaddress",
                    key: "policy",
                    value: other.to_string(),
                    reason: "must be `border`, `src`, `dst` or `cidr`".into(),
                })
            }
            None => {
                return Err(SegmentError::MissingConfig {
                    segment: "remoteaddress",
                    key: "policy",
                })
            }
        };
        Ok(Self {
            base: BaseSegment::default(),
            policy,
        })
    }

    fn annotate(&self, flow: &mut EnrichedFlow) {
        flow.remote_addr = match &self.policy {
            Policy::Border => match flow.flow_direction {
                FlowDirection::Incoming => RemoteAddr::Src,
                FlowDirection::Outgoing => RemoteAddr::Dst,
            },
            Policy::Src => RemoteAddr::Src,
            Policy::Dst => RemoteAddr::Dst,
            Policy::Cidr(prefixes) => {
                let src_local = flow.src_addr.is_some_and(|a| covered(prefixes, a));
                let dst_local = flow.dst_addr.is_some_and(|a| covered(prefixes, a));
                if !src_local && flow.src_addr.is_some() {
                    RemoteAddr::Src
                } else if !dst_local && flow.dst_addr.is_some() {
                    RemoteAddr::Dst
                } else {
                    RemoteAddr::Neither
                }
            }
        };
    }
}

#[async_trait]
impl Segment for RemoteAddress {
    fn name(&self) -> &'static str {
        "remoteaddress"
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
            self.annotate(&mut flow);
            if output.send(flow).await.is_err() {
                break;
            }
        }
    }
}

/// An IP prefix, stored as masked bits for quick containment checks.
struct Prefix {
    bits: u128,
    mask: u128,
    v4: bool,
}

impl Prefix {
    fn parse(raw: &str) -> Option<Self> {
        let (addr_part, len_part) = raw.trim().split_once('/')?;
        let addr: IpAddr = addr_part.parse().ok()?;
        let len: u32 = len_part.parse().ok()?;
        let (bits, mask, v4) = match addr {
            IpAddr::V4(a) => {
                if len > 32 {
                    return None;
                }
                let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
                ((u32::from(a) & mask) as u128, mask as u128, true)
            }
            IpAddr::V6(a) => {
                if len > 128 {
                    return None;
                }
                let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
                (u128::from(a) & mask, mask, false)
            }
        };
        Some(Self { bits, mask, v4 })
    }

    fn contains(&self, addr: IpAddr) -> bool {
        let (bits, v4) = match addr {
            IpAddr::V4(a) => (u32::from(a) as u128, true),
            IpAddr::V6(a) => (u128::from(a), false),
        };
        self.v4 == v4 && bits & self.mask == self.bits
    }
}

fn covered(prefixes: &[Prefix], addr: IpAddr) -> bool {
    prefixes.iter().any(|p| p.contains(addr))
}

/// Load prefixes from a CSV file. The prefix may sit in any column; rows
/// without one are skipped with a warning so annotated lists keep working.
fn load_prefixes(path: &Path) -> Result<Vec<Prefix>, SegmentError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|err| SegmentError::InvalidConfig {
            segment: "remoteaddress",
            key: "filename",
            value: path.display().to_string(),
            reason: err.to_string(),
        })?;
    let mut prefixes = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| SegmentError::InvalidConfig {
            segment: "remoteaddress",
            key: "filename",
            value: path.display().to_string(),
            reason: err.to_string(),
        })?;
        match record.iter().find_map(Prefix::parse) {
            Some(prefix) => prefixes.push(prefix),
            None => {
                tracing::warn!(
                    segment = "remoteaddress",
                    row = ?record,
                    "no prefix found in row, skipping"
                );
            }
        }
    }
    if prefixes.is_empty() {
        return Err(SegmentError::InvalidConfig {
            segment: "remoteaddress",
            key: "filename",
            value: path.display().to_string(),
            reason: "no usable prefixes in file".into(),
        });
    }
    Ok(prefixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, test_segment};
    use std::io::Write;

    #[tokio::test]
    async fn border_policy_follows_flow_direction() {
        let flow = EnrichedFlow {
            flow_direction: FlowDirection::Incoming,
            ..Default::default()
        };
        let result = test_segment("remoteaddress", &config(&[("policy", "border")]), flow)
            .await
            .expect("forwarded");
        assert_eq!(result.remote_addr, RemoteAddr::Src);
    }

    #[tokio::test]
    async fn cidr_policy_marks_uncovered_address_as_remote() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "10.0.0.0/8,1").expect("write");
        writeln!(file, "192.168.88.0/24,2").expect("write");
        let cfg = config(&[
            ("policy", "cidr"),
            ("filename", file.path().to_str().expect("utf8 path")),
        ]);

        // Source outside all local prefixes: the source is remote.
        let flow = EnrichedFlow {
            src_addr: Some("203.0.113.9".parse().expect("addr")),
            dst_addr: Some("10.1.2.3".parse().expect("addr")),
            ..Default::default()
        };
        let result = test_segment("remoteaddress", &cfg, flow)
            .await
            .expect("forwarded");
        assert_eq!(result.remote_addr, RemoteAddr::Src);

        // Source local, destination not: the destination is remote.
        let flow = EnrichedFlow {
            src_addr: Some("192.168.88.42".parse().expect("addr")),
            dst_addr: Some("203.0.113.9".parse().expect("addr")),
            ..Default::default()
        };
        let result = test_segment("remoteaddress", &cfg, flow)
            .await
            .expect("forwarded");
        assert_eq!(result.remote_addr, RemoteAddr::Dst);
    }

    #[test]
    fn prefix_matching() {
        let prefix = Prefix::parse("192.168.88.0/24").expect("parse");
        assert!(prefix.contains("192.168.88.42".parse().expect("addr")));
        assert!(!prefix.contains("192.168.89.1".parse().expect("addr")));
        assert!(!prefix.contains("::1".parse().expect("addr")));
    }
}
