//! Integration tests for the pipeline runtime: wiring, lifecycle, the
//! declarative builder, branch routing and its deadlock freedom.

use std::io::Write;
use std::time::Duration;

use model::{EnrichedFlow, FlowType};
use pipeline::Pipeline;
use segments::pass::Pass;
use segments::{ParallelizedSegment, Segment};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Upper bound for every await in here; a hit means a stalled pipeline.
const BOUND: Duration = Duration::from_secs(2);

async fn recv(pipeline: &mut Pipeline) -> Box<EnrichedFlow> {
    timeout(BOUND, pipeline.recv())
        .await
        .expect("pipeline made no progress within the bound")
        .expect("pipeline output closed unexpectedly")
}

fn pass_segment() -> Box<dyn Segment> {
    Box::new(Pass::from_config(&Default::default()).expect("pass takes no config"))
}

#[tokio::test]
async fn programmatic_build_and_passthrough() {
    let mut parallelized = ParallelizedSegment::new();
    parallelized.add_segment(pass_segment());
    let mut pipeline = Pipeline::new(vec![pass_segment(), Box::new(parallelized)]);
    pipeline.start();

    pipeline
        .feed(Box::new(EnrichedFlow {
            flow_type: FlowType::NetflowV9,
            ..Default::default()
        }))
        .await
        .expect("input open");
    let flow = recv(&mut pipeline).await;
    assert_eq!(flow.flow_type, FlowType::NetflowV9);

    pipeline.close().await;
}

#[tokio::test]
async fn teardown_with_auto_drain() {
    let mut parallelized = ParallelizedSegment::new();
    parallelized.add_segment(pass_segment());
    let mut pipeline = Pipeline::new(vec![pass_segment(), Box::new(parallelized)]);
    pipeline.start();
    pipeline.auto_drain();

    pipeline
        .feed(Box::new(EnrichedFlow {
            flow_type: FlowType::NetflowV9,
            ..Default::default()
        }))
        .await
        .expect("input open");

    timeout(BOUND, pipeline.close())
        .await
        .expect("close must return once all tasks joined");
}

#[tokio::test]
async fn close_drains_buffered_records_and_closes_out() {
    let mut pipeline = Pipeline::new(vec![pass_segment()]);
    pipeline.start();
    for bytes in 1..=3u64 {
        pipeline
            .feed(Box::new(EnrichedFlow {
                bytes,
                ..Default::default()
            }))
            .await
            .expect("input open");
    }
    timeout(BOUND, pipeline.close()).await.expect("close returns");

    // Records fed before close survive in order; then Out is closed.
    for bytes in 1..=3u64 {
        assert_eq!(recv(&mut pipeline).await.bytes, bytes);
    }
    assert!(
        timeout(BOUND, pipeline.recv()).await.expect("no stall").is_none(),
        "Out must be closed after the cascade"
    );
}

#[tokio::test]
async fn build_from_config_with_variable_substitution() {
    let mut pipeline = Pipeline::from_config(
        b"---
- segment: pass
  config:
    foo: $BAZ
    bar: $0
",
    )
    .expect("pipeline built from config");
    pipeline.start();

    pipeline
        .feed(Box::new(EnrichedFlow {
            flow_type: FlowType::NetflowV9,
            ..Default::default()
        }))
        .await
        .expect("input open");
    let flow = recv(&mut pipeline).await;
    assert_eq!(flow.flow_type, FlowType::NetflowV9);

    pipeline.close().await;
}

#[tokio::test]
async fn branch_routes_by_predicate() {
    let mut pipeline = Pipeline::from_config(
        b"---
- segment: branch
  if:
  - segment: flowfilter
    config:
      filter: proto tcp
  then:
  - segment: dropfields
    config:
      policy: drop
      fields: InIf
  else:
  - segment: dropfields
    config:
      policy: drop
      fields: OutIf
",
    )
    .expect("pipeline built from config");
    pipeline.start();

    pipeline
        .feed(Box::new(EnrichedFlow {
            proto: 6,
            in_if: 1,
            out_if: 1,
            ..Default::default()
        }))
        .await
        .expect("input open");
    let flow = recv(&mut pipeline).await;
    assert_eq!((flow.proto, flow.in_if, flow.out_if), (6, 0, 1));

    pipeline
        .feed(Box::new(EnrichedFlow {
            proto: 42,
            in_if: 1,
            out_if: 1,
            ..Default::default()
        }))
        .await
        .expect("input open");
    let flow = recv(&mut pipeline).await;
    assert_eq!((flow.proto, flow.in_if, flow.out_if), (42, 1, 0));

    pipeline.close().await;
}

#[tokio::test]
async fn branch_stays_live_with_generator_in_if() {
    let mut pipeline = Pipeline::from_config(
        b"---
- segment: branch
  if:
  - segment: generator
  - segment: flowfilter
    config:
      filter: proto tcp
  then:
  - segment: dropfields
    config:
      policy: drop
      fields: Bytes
",
    )
    .expect("pipeline built from config");
    pipeline.start();

    pipeline
        .feed(Box::new(EnrichedFlow {
            proto: 42,
            bytes: 42,
            ..Default::default()
        }))
        .await
        .expect("input open");
    for _ in 0..5 {
        let flow = recv(&mut pipeline).await;
        match flow.proto {
            // Generated flows are TCP, took the then-path, lost their bytes.
            6 => assert_eq!(flow.bytes, 0),
            // The fed flow failed the predicate and passed the empty else.
            42 => assert_eq!(flow.bytes, 42),
            other => panic!("unexpected proto {other}"),
        }
    }
}

#[tokio::test]
async fn branch_stays_live_with_generator_in_then() {
    let mut pipeline = Pipeline::from_config(
        b"---
- segment: branch
  then:
  - segment: generator
",
    )
    .expect("pipeline built from config");
    pipeline.start();

    pipeline
        .feed(Box::new(EnrichedFlow {
            proto: 42,
            bytes: 42,
            ..Default::default()
        }))
        .await
        .expect("input open");
    // The bound covers all five records together: one fed flow must yield
    // at least five outputs within a second.
    timeout(Duration::from_secs(1), async {
        for _ in 0..5 {
            pipeline
                .recv()
                .await
                .expect("pipeline output closed unexpectedly");
        }
    })
    .await
    .expect("five records must arrive within one second");
}

#[tokio::test]
async fn branch_stays_live_with_generator_in_else() {
    let mut pipeline = Pipeline::from_config(
        b"---
- segment: branch
  else:
  - segment: generator
",
    )
    .expect("pipeline built from config");
    pipeline.start();

    pipeline
        .feed(Box::new(EnrichedFlow {
            proto: 42,
            bytes: 42,
            ..Default::default()
        }))
        .await
        .expect("input open");
    timeout(Duration::from_secs(1), async {
        for _ in 0..5 {
            pipeline
                .recv()
                .await
                .expect("pipeline output closed unexpectedly");
        }
    })
    .await
    .expect("five records must arrive within one second");
}

#[tokio::test]
async fn parallelized_stage_preserves_the_multiset() {
    let mut pipeline = Pipeline::from_config(
        b"---
- segment: pass
  parallelize: 8
",
    )
    .expect("pipeline built from config");
    pipeline.start();

    for bytes in 0..100u64 {
        pipeline
            .feed(Box::new(EnrichedFlow {
                bytes,
                ..Default::default()
            }))
            .await
            .expect("input open");
    }
    timeout(BOUND, pipeline.close()).await.expect("close returns");

    let mut seen = Vec::new();
    while let Some(flow) = timeout(BOUND, pipeline.recv()).await.expect("no stall") {
        seen.push(flow.bytes);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..100).collect::<Vec<u64>>());
}

#[tokio::test]
async fn filter_drops_surface_on_the_subscribed_channel() {
    let mut pipeline = Pipeline::from_config(
        b"---
- segment: flowfilter
  config:
    filter: proto tcp
",
    )
    .expect("pipeline built from config");
    let (drops_tx, mut drops_rx) = mpsc::channel(8);
    pipeline.subscribe_drops(drops_tx);
    pipeline.start();

    pipeline
        .feed(Box::new(EnrichedFlow {
            proto: 6,
            ..Default::default()
        }))
        .await
        .expect("input open");
    pipeline
        .feed(Box::new(EnrichedFlow {
            proto: 17,
            ..Default::default()
        }))
        .await
        .expect("input open");

    assert_eq!(recv(&mut pipeline).await.proto, 6);
    let dropped = timeout(BOUND, drops_rx.recv())
        .await
        .expect("drops channel made no progress")
        .expect("drops channel open");
    assert_eq!(dropped.proto, 17);

    pipeline.close().await;
}

#[tokio::test]
async fn source_segment_shuts_the_pipeline_down_at_eof() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    for bytes in [7u64, 8] {
        let flow = EnrichedFlow {
            bytes,
            ..Default::default()
        };
        writeln!(file, "{}", serde_json::to_string(&flow).expect("encode")).expect("write");
    }

    let description = format!(
        "---
- segment: stdin
  config:
    filename: {}
    eofcloses: true
",
        file.path().display()
    );
    let mut pipeline = Pipeline::from_config(description.as_bytes()).expect("pipeline built");
    pipeline.start();

    let mut seen = Vec::new();
    while let Some(flow) = timeout(BOUND, pipeline.recv()).await.expect("no stall") {
        seen.push(flow.bytes);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![7, 8]);

    // The stdin segment triggered shutdown itself; close only joins tasks
    // and must return promptly without anyone dropping In.
    timeout(BOUND, pipeline.close())
        .await
        .expect("close must return after a segment-initiated shutdown");
}
