//! Segment contract and built-in segments.
//!
//! A segment is one stage of a flow pipeline: it consumes records from an
//! input channel, emits records on an output channel, and runs as its own
//! tokio task. This crate defines the [`Segment`] trait, the reusable
//! [`BaseSegment`]/[`BaseFilterSegment`] carriers, the process-wide
//! [`registry`] of segment factories, and every built-in segment.
//!
//! The pipeline runtime that wires segments together lives in the
//! `pipeline` crate.

mod base;
mod parallelized;
mod registry;
mod shutdown;

pub mod filter;
pub mod input;
pub mod matching;
pub mod modify;
pub mod output;
pub mod pass;
pub mod testing;

pub use base::{
    BaseFilterSegment, BaseSegment, FlowReceiver, FlowSender, Segment, SegmentConfig,
    SegmentError, DEFAULT_CHANNEL_CAPACITY,
};
pub use parallelized::ParallelizedSegment;
pub use registry::{registry, SegmentFactory, SegmentRegistry};
pub use shutdown::ShutdownLatch;
