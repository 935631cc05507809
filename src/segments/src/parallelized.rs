//! Composite segment running N identical inner segments in parallel.

use async_trait::async_trait;
use futures::stream::{SelectAll, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::base::{BaseSegment, Segment};

/// Fan-out/fan-in wrapper for throughput: each incoming record is dispatched
/// to exactly one inner segment (round robin), and all inner outputs are
/// multiplexed into the outer output. No ordering is preserved across the
/// stage — downstream must not rely on record order.
///
/// With no inner segments the composite degrades to a passthrough.
#[derive(Default)]
pub struct ParallelizedSegment {
    base: BaseSegment,
    inners: Vec<Box<dyn Segment>>,
}

impl ParallelizedSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_segment(&mut self, segment: Box<dyn Segment>) {
        self.inners.push(segment);
    }

    pub fn len(&self) -> usize {
        self.inners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inners.is_empty()
    }
}

#[async_trait]
impl Segment for ParallelizedSegment {
    fn name(&self) -> &'static str {
        "parallelized"
    }

    fn base(&self) -> &BaseSegment {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.base
    }

    async fn run(&mut self) {
        let (mut input, output) = self.base.take_wiring();
        if self.inners.is_empty() {
            while let Some(flow) = input.recv().await {
                if output.send(flow).await.is_err() {
                    break;
                }
            }
            return;
        }

        let shutdown = self.base.pipeline_shutdown();
        let mut inner_inputs = Vec::with_capacity(self.inners.len());
        let mut inner_outputs = SelectAll::new();
        let mut tasks = Vec::with_capacity(self.inners.len());
        for mut segment in self.inners.drain(..) {
            let capacity = segment.input_capacity();
            let (in_tx, in_rx) = mpsc::channel(capacity);
            let (out_tx, out_rx) = mpsc::channel(capacity);
            if let Some(latch) = &shutdown {
                segment.attach_pipeline(latch.clone());
            }
            segment.rewire(in_rx, out_tx);
            inner_inputs.push(in_tx);
            inner_outputs.push(ReceiverStream::new(out_rx));
            tasks.push(tokio::spawn(async move { segment.run().await }));
        }

        // Collector: multiplexes every inner output into the outer output and
        // closes it once all inner outputs are observed closed.
        let collector = tokio::spawn(async move {
            while let Some(flow) = inner_outputs.next().await {
                if output.send(flow).await.is_err() {
                    break;
                }
            }
        });

        // Dispatch round robin until the outer input closes.
        let mut next = 0;
        while let Some(flow) = input.recv().await {
            if inner_inputs[next].send(flow).await.is_err() {
                tracing::warn!(
                    segment = "parallelized",
                    inner = next,
                    "inner segment exited early, record lost"
                );
                break;
            }
            next = (next + 1) % inner_inputs.len();
        }

        drop(inner_inputs);
        for task in tasks {
            let _ = task.await;
        }
        let _ = collector.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::Pass;
    use crate::testing::run_segment;
    use model::EnrichedFlow;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn preserves_the_record_multiset() {
        let mut parallelized = ParallelizedSegment::new();
        for _ in 0..8 {
            parallelized.add_segment(Box::new(Pass::from_config(&Default::default()).expect(
                "pass config",
            )));
        }
        let (input, mut output, handle) = run_segment(Box::new(parallelized));

        for bytes in 0..100u64 {
            let flow = Box::new(EnrichedFlow {
                bytes,
                ..Default::default()
            });
            input.send(flow).await.expect("input open");
        }
        drop(input);

        let mut seen = Vec::new();
        while let Some(flow) = timeout(Duration::from_secs(2), output.recv())
            .await
            .expect("output must make progress")
        {
            seen.push(flow.bytes);
        }
        seen.sort_unstable();
        let expected: Vec<u64> = (0..100).collect();
        assert_eq!(seen, expected, "records lost or duplicated");

        handle.await.expect("segment task");
    }
}
