//! The pipeline proper: channel wiring, lifecycle, shutdown cascade.

use model::EnrichedFlow;
use segments::{
    FlowReceiver, FlowSender, Segment, ShutdownLatch, DEFAULT_CHANNEL_CAPACITY,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The pipeline stopped accepting records; the rejected record is handed
/// back to the caller.
#[derive(Debug, thiserror::Error)]
#[error("pipeline input closed")]
pub struct InputClosed(pub Box<EnrichedFlow>);

/// Ordered chain of segments with external In and Out channels.
///
/// Lifecycle: build → [`Pipeline::start`] → feed records / consume `Out` →
/// [`Pipeline::close`]. A caller that feeds records without consuming `Out`
/// must call [`Pipeline::auto_drain`] first, otherwise the tail segment
/// blocks once the output buffer fills. That is a documented contract of
/// the runtime, not a defect.
///
/// Shutdown can be initiated three ways: dropping/closing `In` (the
/// cascade starts as soon as the buffered records are drained), calling
/// `close`, or any segment firing the shared [`ShutdownLatch`]. All three
/// end with every segment task joined.
pub struct Pipeline {
    segments: Vec<Box<dyn Segment>>,
    input: Option<FlowSender>,
    intake: Option<FlowReceiver>,
    head: Option<FlowSender>,
    output: Option<FlowReceiver>,
    shutdown: ShutdownLatch,
    handles: Vec<JoinHandle<()>>,
    started: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("segments", &self.segments.len())
            .field("started", &self.started)
            .finish()
    }
}

impl Pipeline {
    /// Wire `segments` into a chain. For each adjacent pair one channel is
    /// allocated and shared: the upstream segment's output sender and the
    /// downstream segment's input receiver are the two ends of the same
    /// channel. Capacities come from each segment's `bufsize`.
    pub fn new(mut segments: Vec<Box<dyn Segment>>) -> Self {
        assert!(!segments.is_empty(), "a pipeline needs at least one segment");
        let shutdown = ShutdownLatch::new();
        let capacities: Vec<usize> = segments.iter().map(|s| s.input_capacity()).collect();

        let (input, intake) = mpsc::channel(capacities[0]);
        let (head, mut upstream) = mpsc::channel(capacities[0]);
        for (index, segment) in segments.iter_mut().enumerate() {
            segment.attach_pipeline(shutdown.clone());
            let capacity = capacities
                .get(index + 1)
                .copied()
                .unwrap_or(DEFAULT_CHANNEL_CAPACITY);
            let (out_tx, out_rx) = mpsc::channel(capacity);
            let in_rx = std::mem::replace(&mut upstream, out_rx);
            segment.rewire(in_rx, out_tx);
        }

        Self {
            segments,
            input: Some(input),
            intake: Some(intake),
            head: Some(head),
            output: Some(upstream),
            shutdown,
            handles: Vec::new(),
            started: false,
        }
    }

    /// Launch every segment as its own task, plus the intake forwarder that
    /// pumps the public In channel into the head segment. The forwarder is
    /// the shutdown coordinator: it owns the head sender and drops it — thus
    /// closing the head segment's input — when the latch fires or In closes.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for mut segment in self.segments.drain(..) {
            self.handles
                .push(tokio::spawn(async move { segment.run().await }));
        }

        let mut intake = self.intake.take().expect("pipeline intake already taken");
        let head = self.head.take().expect("pipeline head already taken");
        let latch = self.shutdown.clone();
        self.handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = latch.triggered() => break,
                    received = intake.recv() => match received {
                        Some(flow) => {
                            if head.send(flow).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        }));
    }

    /// Send one record into the pipeline.
    pub async fn feed(&self, flow: Box<EnrichedFlow>) -> Result<(), InputClosed> {
        match &self.input {
            Some(input) => input
                .send(flow)
                .await
                .map_err(|err| InputClosed(err.0)),
            None => Err(InputClosed(flow)),
        }
    }

    /// A sender for the public In channel, for callers that feed the
    /// pipeline from their own tasks. Clones held across `close` keep the
    /// input open and stall the shutdown cascade.
    pub fn sender(&self) -> Option<FlowSender> {
        self.input.clone()
    }

    /// Receive the next record from the pipeline's Out.
    pub async fn recv(&mut self) -> Option<Box<EnrichedFlow>> {
        self.output.as_mut()?.recv().await
    }

    /// Detach the Out receiver, e.g. to consume it from another task.
    pub fn take_output(&mut self) -> Option<FlowReceiver> {
        self.output.take()
    }

    /// Detach the In sender. Used by composite segments that pump records
    /// into an embedded pipeline.
    pub fn take_input(&mut self) -> Option<FlowSender> {
        self.input.take()
    }

    /// Spawn a task that reads Out and discards every record, so producers
    /// never block on an unconsumed tail.
    pub fn auto_drain(&mut self) {
        if let Some(mut output) = self.output.take() {
            self.handles
                .push(tokio::spawn(
                    async move { while output.recv().await.is_some() {} },
                ));
        }
    }

    /// Close In and wait for every task to exit. Idempotent, and safe to
    /// call after a segment already triggered shutdown through the latch.
    pub async fn close(&mut self) {
        drop(self.input.take());
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "pipeline task panicked");
            }
        }
    }

    /// Route records rejected by the pipeline's filter segments to `drops`.
    /// Must be called before `start`. The sender is cloned into each filter
    /// segment; the channel closes once they have all exited.
    pub fn subscribe_drops(&mut self, drops: FlowSender) {
        for segment in &mut self.segments {
            segment.subscribe_drops(drops.clone());
        }
    }

    /// The shutdown capability shared by every segment of this pipeline.
    pub fn shutdown(&self) -> ShutdownLatch {
        self.shutdown.clone()
    }

    /// Replace the shutdown latch with `latch`, re-attaching it to every
    /// segment. Composites use this to let an embedded pipeline share its
    /// parent's shutdown signal. Must be called before `start`.
    pub(crate) fn adopt_shutdown(&mut self, latch: ShutdownLatch) {
        self.shutdown = latch;
        for segment in &mut self.segments {
            segment.attach_pipeline(self.shutdown.clone());
        }
    }
}
