//! The segment contract and the reusable channel carriers.

use std::collections::HashMap;

use async_trait::async_trait;
use model::EnrichedFlow;
use tokio::sync::mpsc;

use crate::shutdown::ShutdownLatch;

/// Default capacity of a segment's input channel, overridable per segment
/// through the `bufsize` entry of the pipeline description.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 65535;

/// Sending end of a flow channel.
pub type FlowSender = mpsc::Sender<Box<EnrichedFlow>>;
/// Receiving end of a flow channel.
pub type FlowReceiver = mpsc::Receiver<Box<EnrichedFlow>>;

/// Errors raised while constructing a segment from its config map.
///
/// Construction is pure validation; a segment that returns an error here has
/// acquired no resources and started no tasks, and the pipeline build is
/// aborted.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("unknown segment `{0}`")]
    UnknownSegment(String),
    #[error("segment `{segment}`: missing required config key `{key}`")]
    MissingConfig {
        segment: &'static str,
        key: &'static str,
    },
    #[error("segment `{segment}`: invalid value `{value}` for `{key}`: {reason}")]
    InvalidConfig {
        segment: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("segment `{segment}`: {source}")]
    Io {
        segment: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// One processing stage of a pipeline.
///
/// Segments are constructed unwired by a registry factory, wired exactly once
/// by the pipeline ([`Segment::rewire`]), and then driven by [`Segment::run`]
/// as a dedicated tokio task. `run` must return promptly once the input
/// channel is observed closed and drained, and the output channel closes by
/// sender drop when `run` returns.
///
/// Plumbing methods have default implementations that delegate to the
/// embedded [`BaseSegment`]; concrete segments only implement `name`, the
/// base accessors and `run`.
#[async_trait]
pub trait Segment: Send {
    /// Stable tag, identical to the registry key.
    fn name(&self) -> &'static str;

    fn base(&self) -> &BaseSegment;

    fn base_mut(&mut self) -> &mut BaseSegment;

    /// The long-lived task body.
    async fn run(&mut self);

    /// Set the input and output endpoints. Called once, before `run`.
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.base_mut().rewire(input, output);
    }

    /// Hand the segment the one-shot shutdown capability of its pipeline.
    fn attach_pipeline(&mut self, shutdown: ShutdownLatch) {
        self.base_mut().attach_pipeline(shutdown);
    }

    /// Route rejected records to `drops` instead of discarding them.
    /// Only filter segments honor this; the default is a no-op.
    fn subscribe_drops(&mut self, _drops: FlowSender) {}

    fn input_capacity(&self) -> usize {
        self.base().input_capacity()
    }

    fn set_input_capacity(&mut self, capacity: usize) {
        self.base_mut().set_input_capacity(capacity);
    }
}

impl std::fmt::Debug for dyn Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Carrier of the channel endpoints and the pipeline back-capability shared
/// by every segment. Held by value inside concrete segments.
#[derive(Default)]
pub struct BaseSegment {
    input: Option<FlowReceiver>,
    output: Option<FlowSender>,
    shutdown: Option<ShutdownLatch>,
    input_capacity: Option<usize>,
}

impl BaseSegment {
    pub fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.input = Some(input);
        self.output = Some(output);
    }

    /// Hand both endpoints to `run`. Running a segment that was never
    /// rewired is a programmer error.
    pub fn take_wiring(&mut self) -> (FlowReceiver, FlowSender) {
        let input = self.input.take().expect("segment started before rewire");
        let output = self.output.take().expect("segment started before rewire");
        (input, output)
    }

    pub fn attach_pipeline(&mut self, shutdown: ShutdownLatch) {
        self.shutdown = Some(shutdown);
    }

    /// A clone of the attached shutdown capability, if any.
    pub fn pipeline_shutdown(&self) -> Option<ShutdownLatch> {
        self.shutdown.clone()
    }

    /// Ask the owning pipeline to begin shutdown. Safe to call repeatedly
    /// and from multiple segments concurrently.
    pub fn shutdown_parent_pipeline(&self) {
        match &self.shutdown {
            Some(latch) => latch.trigger(),
            None => {
                tracing::warn!("shutdown requested by a segment not attached to any pipeline")
            }
        }
    }

    pub fn input_capacity(&self) -> usize {
        self.input_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn set_input_capacity(&mut self, capacity: usize) {
        self.input_capacity = Some(capacity.max(1));
    }
}

/// [`BaseSegment`] extended with the optional drops side-channel of filter
/// segments. The main output carries only accepted records; when a drops
/// sender is subscribed, rejected records go there instead of being
/// discarded.
#[derive(Default)]
pub struct BaseFilterSegment {
    pub base: BaseSegment,
    drops: Option<FlowSender>,
}

impl BaseFilterSegment {
    pub fn subscribe_drops(&mut self, drops: FlowSender) {
        self.drops = Some(drops);
    }

    /// Hand the drops sender to `run`, if one was subscribed.
    pub fn take_drops(&mut self) -> Option<FlowSender> {
        self.drops.take()
    }
}

/// Forward a rejected record to the drops channel, or discard it when no
/// subscriber exists.
pub async fn reject(drops: &Option<FlowSender>, flow: Box<EnrichedFlow>) {
    if let Some(drops) = drops {
        // A closed drops channel means its consumer is gone; the record is
        // discarded like an unsubscribed one.
        let _ = drops.send(flow).await;
    }
}

/// Flat string map every segment is configured from.
pub type SegmentConfig = HashMap<String, String>;

/// Parse an optional config value, failing with a config error on malformed
/// input rather than silently falling back.
pub(crate) fn parse_optional<T: std::str::FromStr>(
    config: &SegmentConfig,
    segment: &'static str,
    key: &'static str,
) -> Result<Option<T>, SegmentError>
where
    T::Err: std::fmt::Display,
{
    match config.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|err: T::Err| {
            SegmentError::InvalidConfig {
                segment,
                key,
                value: raw.to_string(),
                reason: err.to_string(),
            }
        }),
    }
}
