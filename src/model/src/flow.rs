use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Export protocol the flow was originally received over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    #[default]
    Unknown,
    SflowV5,
    NetflowV5,
    NetflowV9,
    Ipfix,
    Ebpf,
}

/// Direction of the flow relative to the observing network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowDirection {
    #[default]
    Incoming,
    Outgoing,
}

/// Which address of a flow is the remote one, as determined by the
/// `remoteaddress` segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteAddr {
    #[default]
    Neither,
    Src,
    Dst,
}

/// A single enriched flow record.
///
/// Records move through the pipeline as `Box<EnrichedFlow>`; ownership is
/// linear, a segment that forwards a record gives it up. Field defaults are
/// the "absent" value, so clearing a field is resetting it to default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichedFlow {
    pub flow_type: FlowType,
    /// Timestamps in nanoseconds since the epoch.
    pub time_received: u64,
    pub time_flow_start: u64,
    pub time_flow_end: u64,
    pub bytes: u64,
    pub packets: u64,
    pub src_addr: Option<IpAddr>,
    pub dst_addr: Option<IpAddr>,
    pub sampler_address: Option<IpAddr>,
    pub next_hop: Option<IpAddr>,
    pub src_port: u16,
    pub dst_port: u16,
    pub in_if: u32,
    pub out_if: u32,
    pub proto: u8,
    pub flow_direction: FlowDirection,
    pub sampling_rate: u64,
    /// Set by the `normalize` segment once counters are scaled up.
    pub normalized: bool,
    pub remote_addr: RemoteAddr,
    /// Customer id, as assigned by enrichment segments.
    pub cid: u32,
    /// Tag id, as assigned by tagging segments.
    pub tid: u32,
    /// Convenience flag for list-membership tagging.
    pub inlist: bool,
    /// Short machine-friendly annotation.
    pub note: String,
}

/// Canonical field names accepted by [`EnrichedFlow::clear_field`] and
/// [`EnrichedFlow::field_display`], in display order.
pub const FIELD_NAMES: &[&str] = &[
    "flow_type",
    "time_received",
    "time_flow_start",
    "time_flow_end",
    "bytes",
    "packets",
    "src_addr",
    "dst_addr",
    "sampler_address",
    "next_hop",
    "src_port",
    "dst_port",
    "in_if",
    "out_if",
    "proto",
    "flow_direction",
    "sampling_rate",
    "normalized",
    "remote_addr",
    "cid",
    "tid",
    "inlist",
    "note",
];

/// A field name that does not exist on [`EnrichedFlow`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown flow field `{field}`")]
pub struct UnknownFieldError {
    pub field: String,
}

impl EnrichedFlow {
    /// Reset one named field to its default value. Names are matched
    /// case-insensitively, with `InIf`-style spellings normalized the same
    /// way as `in_if`.
    pub fn clear_field(&mut self, name: &str) -> Result<(), UnknownFieldError> {
        match normalize_field_name(name).as_str() {
            "flow_type" => self.flow_type = FlowType::default(),
            "time_received" => self.time_received = 0,
            "time_flow_start" => self.time_flow_start = 0,
            "time_flow_end" => self.time_flow_end = 0,
            "bytes" => self.bytes = 0,
            "packets" => self.packets = 0,
            "src_addr" => self.src_addr = None,
            "dst_addr" => self.dst_addr = None,
            "sampler_address" => self.sampler_address = None,
            "next_hop" => self.next_hop = None,
            "src_port" => self.src_port = 0,
            "dst_port" => self.dst_port = 0,
            "in_if" => self.in_if = 0,
            "out_if" => self.out_if = 0,
            "proto" => self.proto = 0,
            "flow_direction" => self.flow_direction = FlowDirection::default(),
            "sampling_rate" => self.sampling_rate = 0,
            "normalized" => self.normalized = false,
            "remote_addr" => self.remote_addr = RemoteAddr::default(),
            "cid" => self.cid = 0,
            "tid" => self.tid = 0,
            "inlist" => self.inlist = false,
            "note" => self.note = String::new(),
            _ => {
                return Err(UnknownFieldError {
                    field: name.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Reset every field not named in `keep`.
    pub fn retain_fields(&mut self, keep: &[String]) {
        let kept: Vec<String> = keep.iter().map(|n| normalize_field_name(n)).collect();
        for name in FIELD_NAMES {
            if !kept.iter().any(|k| k == name) {
                // All names in FIELD_NAMES are known.
                let _ = self.clear_field(name);
            }
        }
    }

    /// Textual rendering of one named field, for line-oriented outputs.
    /// Returns `None` for unknown names; absent addresses render empty.
    pub fn field_display(&self, name: &str) -> Option<String> {
        let value = match normalize_field_name(name).as_str() {
            "flow_type" => format!("{:?}", self.flow_type),
            "time_received" => self.time_received.to_string(),
            "time_flow_start" => self.time_flow_start.to_string(),
            "time_flow_end" => self.time_flow_end.to_string(),
            "bytes" => self.bytes.to_string(),
            "packets" => self.packets.to_string(),
            "src_addr" => display_addr(&self.src_addr),
            "dst_addr" => display_addr(&self.dst_addr),
            "sampler_address" => display_addr(&self.sampler_address),
            "next_hop" => display_addr(&self.next_hop),
            "src_port" => self.src_port.to_string(),
            "dst_port" => self.dst_port.to_string(),
            "in_if" => self.in_if.to_string(),
            "out_if" => self.out_if.to_string(),
            "proto" => self.proto.to_string(),
            "flow_direction" => format!("{:?}", self.flow_direction),
            "sampling_rate" => self.sampling_rate.to_string(),
            "normalized" => self.normalized.to_string(),
            "remote_addr" => format!("{:?}", self.remote_addr),
            "cid" => self.cid.to_string(),
            "tid" => self.tid.to_string(),
            "inlist" => self.inlist.to_string(),
            "note" => self.note.clone(),
            _ => return None,
        };
        Some(value)
    }
}

fn display_addr(addr: &Option<IpAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_default()
}

/// Accept `in_if`, `InIf`, `inif` and friends as the same name.
fn normalize_field_name(name: &str) -> String {
    let lowered: String = name
        .chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();
    for canonical in FIELD_NAMES {
        if canonical.replace('_', "") == lowered {
            return (*canonical).to_string();
        }
    }
    name.to_ascii_lowercase()
}
