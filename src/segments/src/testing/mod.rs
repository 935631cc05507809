//! Helpers for exercising segments in isolation, plus the `generator`
//! segment used to drive timing-sensitive tests.

pub mod generator;

use std::collections::HashMap;

use model::EnrichedFlow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::base::{FlowReceiver, FlowSender, Segment};
use crate::registry::registry;

/// Build a config map from literal pairs.
pub fn config(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Wire a segment to fresh channels and spawn its task.
///
/// Returns the input sender, the output receiver and the task handle. The
/// segment exits once the returned sender is dropped and its input drained.
pub fn run_segment(mut segment: Box<dyn Segment>) -> (FlowSender, FlowReceiver, JoinHandle<()>) {
    let (input_tx, input_rx) = mpsc::channel(16);
    let (output_tx, output_rx) = mpsc::channel(16);
    segment.rewire(input_rx, output_tx);
    let handle = tokio::spawn(async move { segment.run().await });
    (input_tx, output_rx, handle)
}

/// One-shot segment check: instantiate `tag` from the registry, feed a
/// single flow, and return what comes out (or `None` when the segment
/// swallowed it). Panics on config errors, like a misconfigured pipeline
/// build would.
pub async fn test_segment(
    tag: &str,
    config: &HashMap<String, String>,
    flow: EnrichedFlow,
) -> Option<Box<EnrichedFlow>> {
    let segment = registry()
        .instantiate(tag, config)
        .unwrap_or_else(|err| panic!("segment `{tag}` could not be initialized: {err}"));
    let (input, mut output, handle) = run_segment(segment);
    input.send(Box::new(flow)).await.expect("segment input open");
    drop(input);
    let result = output.recv().await;
    handle.await.expect("segment task panicked");
    result
}
