//! Flow record model shared by all pipeline segments.
//!
//! The pipeline runtime treats records as opaque boxes; only segments look
//! inside. Everything a segment may touch lives on [`EnrichedFlow`].

mod flow;

pub use flow::{EnrichedFlow, FlowDirection, FlowType, RemoteAddr, UnknownFieldError, FIELD_NAMES};
