//! Conditional composite segment.

use async_trait::async_trait;
use segments::{BaseSegment, FlowReceiver, FlowSender, Segment, ShutdownLatch};
use tokio::sync::mpsc;

use crate::pipeline::Pipeline;

/// Capacity of the internal routing channels. Every one of them is drained
/// by a dedicated forwarder task, so the buffer only smooths bursts; it must
/// merely be positive for the deadlock-freedom argument to hold.
const ROUTING_CAPACITY: usize = 128;

/// Routes each record through a condition sub-pipeline, then through `then`
/// or `else`.
///
/// A record the condition pipeline emits continues into `then`; a record a
/// filter inside the condition consumed without emitting surfaces on the
/// condition's drops channel and continues into `else`. The branch output is
/// the merge of both paths. Condition pipelines may emit more records than
/// they consume (generators): every emission goes to `then`, and no `else`
/// records are synthesized for them.
///
/// All three sub-pipelines and all four routing forwarders run as
/// independent tasks connected only through buffered channels; no task holds
/// an upstream receive and a downstream send of the same sub-tree, which is
/// what keeps injection-heavy configurations deadlock-free. No record order
/// is preserved across the two paths.
pub struct Branch {
    base: BaseSegment,
    condition: Option<Pipeline>,
    then_branch: Option<Pipeline>,
    else_branch: Option<Pipeline>,
}

impl Branch {
    pub fn new(condition: Pipeline, then_branch: Pipeline, else_branch: Pipeline) -> Self {
        Self {
            base: BaseSegment::default(),
            condition: Some(condition),
            then_branch: Some(then_branch),
            else_branch: Some(else_branch),
        }
    }
}

async fn forward(mut from: FlowReceiver, to: FlowSender) {
    while let Some(flow) = from.recv().await {
        if to.send(flow).await.is_err() {
            break;
        }
    }
}

#[async_trait]
impl Segment for Branch {
    fn name(&self) -> &'static str {
        "branch"
    }

    fn base(&self) -> &BaseSegment {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.base
    }

    /// Share the parent pipeline's shutdown signal with all three
    /// sub-pipelines, so a shutdown raised anywhere tears the whole tree
    /// down.
    fn attach_pipeline(&mut self, shutdown: ShutdownLatch) {
        for sub in [
            &mut self.condition,
            &mut self.then_branch,
            &mut self.else_branch,
        ]
        .into_iter()
        .flatten()
        {
            sub.adopt_shutdown(shutdown.clone());
        }
        self.base.attach_pipeline(shutdown);
    }

    async fn run(&mut self) {
        let (mut input, output) = self.base.take_wiring();
        let mut condition = self.condition.take().expect("branch run twice");
        let mut then_branch = self.then_branch.take().expect("branch run twice");
        let mut else_branch = self.else_branch.take().expect("branch run twice");

        // Records the condition consumes without emitting surface here. The
        // sender is cloned into the condition's filter segments and closes
        // when the condition pipeline has fully drained.
        let (drops_tx, drops_rx) = mpsc::channel(ROUTING_CAPACITY);
        condition.subscribe_drops(drops_tx);

        condition.start();
        then_branch.start();
        else_branch.start();

        let condition_in = condition.take_input().expect("condition input");
        let condition_out = condition.take_output().expect("condition output");
        let then_in = then_branch.take_input().expect("then input");
        let then_out = then_branch.take_output().expect("then output");
        let else_in = else_branch.take_input().expect("else input");
        let else_out = else_branch.take_output().expect("else output");

        // Upstream reader: pumps the branch input into the condition and
        // closes the condition's input when the branch input closes.
        let upstream = tokio::spawn(async move {
            while let Some(flow) = input.recv().await {
                if condition_in.send(flow).await.is_err() {
                    break;
                }
            }
        });
        // Dispatchers and output forwarders; the two output forwarders each
        // hold one clone of the branch output, which therefore closes
        // exactly when both paths have drained.
        let to_then = tokio::spawn(forward(condition_out, then_in));
        let to_else = tokio::spawn(forward(drops_rx, else_in));
        let from_then = tokio::spawn(forward(then_out, output.clone()));
        let from_else = tokio::spawn(forward(else_out, output));

        for task in [upstream, to_then, to_else, from_then, from_else] {
            if let Err(err) = task.await {
                tracing::error!(segment = "branch", error = %err, "forwarder panicked");
            }
        }
        condition.close().await;
        then_branch.close().await;
        else_branch.close().await;
    }
}
