//! Integration tests: full pipeline (ingest -> batch -> detect -> drain)

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use edgeflow::prelude::*;

const FRAME: [u8; 4] = [1, 2, 3, 4];

fn echo_detector() -> Arc<dyn Detector> {
    Arc::new(|items: &[WorkItem]| -> edgeflow::Result<Vec<DetectionOutcome>> {
        Ok(items
            .iter()
            .map(|_| {
                DetectionOutcome::Detections(vec![Detection {
                    label: "object".to_string(),
                    score: 0.9,
                    bbox: [0.0, 0.0, 4.0, 4.0],
                }])
            })
            .collect())
    })
}

fn meta(frame_id: usize) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("frame_id".to_string(), frame_id.to_string());
    metadata
}

fn small_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_frame_format(vec![4], DType::U8)
        .with_batch_size(4)
        .with_batch_timeout_secs(0.1)
        .with_worker_count(1)
}

fn drain_results(pipeline: &InferencePipeline, n: usize) -> Vec<InferenceResult> {
    let mut results = Vec::with_capacity(n);
    while results.len() < n {
        match pipeline.get_result(Duration::from_secs(2)) {
            Some(result) => results.push(result),
            None => break,
        }
    }
    results
}

#[test]
fn test_end_to_end_processing() {
    let pipeline = InferencePipeline::new(small_config(), echo_detector()).unwrap();
    pipeline.start().unwrap();

    let n = 10;
    for i in 0..n {
        assert!(pipeline.add_item(&FRAME, meta(i)));
    }

    let results = drain_results(&pipeline, n);
    assert_eq!(results.len(), n);
    for result in &results {
        match &result.outcome {
            Outcome::Success(detections) => {
                assert_eq!(detections.len(), 1);
                assert_eq!(detections[0].label, "object");
            }
            Outcome::Error { message, .. } => panic!("unexpected error: {message}"),
        }
        assert!(result.processed_at >= result.enqueued_at);
    }

    pipeline.stop();

    let stats = pipeline.get_statistics();
    assert_eq!(stats.images_processed, n as u64);
    assert!(stats.batches_processed >= (n / 4) as u64);
    assert_eq!(stats.processing_errors, 0);
}

#[test]
fn test_every_batch_within_size_bound() {
    // Count batch sizes seen by the detector
    let sizes: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let detector: Arc<dyn Detector> = {
        let sizes = Arc::clone(&sizes);
        Arc::new(move |items: &[WorkItem]| -> edgeflow::Result<Vec<DetectionOutcome>> {
            sizes.lock().unwrap().push(items.len());
            Ok(items
                .iter()
                .map(|_| DetectionOutcome::Detections(Vec::new()))
                .collect())
        })
    };

    let pipeline = InferencePipeline::new(small_config(), detector).unwrap();
    pipeline.start().unwrap();

    let n = 23;
    for i in 0..n {
        assert!(pipeline.add_item(&FRAME, meta(i)));
    }
    let results = drain_results(&pipeline, n);
    assert_eq!(results.len(), n);
    pipeline.stop();

    let sizes = sizes.lock().unwrap();
    assert!(!sizes.is_empty());
    assert!(sizes.iter().all(|&s| (1..=4).contains(&s)), "sizes: {sizes:?}");
    assert_eq!(sizes.iter().sum::<usize>(), n);
}

#[test]
fn test_partial_batch_dispatched_on_timeout() {
    // batch_size 4, timeout 0.3s, exactly 2 items: a batch of 2 arrives
    // within the timeout plus scheduling slack
    let config = small_config()
        .with_batch_size(4)
        .with_batch_timeout_secs(0.3);
    let pipeline = InferencePipeline::new(config, echo_detector()).unwrap();
    pipeline.start().unwrap();

    let started = Instant::now();
    assert!(pipeline.add_item(&FRAME, meta(0)));
    assert!(pipeline.add_item(&FRAME, meta(1)));

    let results = drain_results(&pipeline, 2);
    let elapsed = started.elapsed();
    assert_eq!(results.len(), 2);
    assert!(elapsed >= Duration::from_millis(250), "dispatched early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "dispatched late: {elapsed:?}");

    pipeline.stop();
    let stats = pipeline.get_statistics();
    assert_eq!(stats.batches_processed, 1);
    assert_eq!(stats.images_processed, 2);
}

#[test]
fn test_item_failure_isolated_and_order_preserved() {
    // The frame tagged 3 fails inside the detector; its siblings succeed
    let detector: Arc<dyn Detector> = Arc::new(|items: &[WorkItem]| -> edgeflow::Result<Vec<DetectionOutcome>> {
        Ok(items
            .iter()
            .map(|item| {
                if item.metadata()["frame_id"] == "3" {
                    DetectionOutcome::Failed("corrupt frame".to_string())
                } else {
                    DetectionOutcome::Detections(Vec::new())
                }
            })
            .collect())
    });

    let config = small_config().with_batch_size(5).with_worker_count(1);
    let pipeline = InferencePipeline::new(config, detector).unwrap();
    pipeline.start().unwrap();

    for i in 0..5 {
        assert!(pipeline.add_item(&FRAME, meta(i)));
    }
    let results = drain_results(&pipeline, 5);
    pipeline.stop();

    assert_eq!(results.len(), 5);
    for (i, result) in results.iter().enumerate() {
        // One worker preserves submission order end to end
        assert_eq!(result.metadata["frame_id"], i.to_string());
        if i == 3 {
            match &result.outcome {
                Outcome::Error { kind, message } => {
                    assert_eq!(*kind, FailureKind::Detector);
                    assert!(message.contains("corrupt frame"));
                }
                Outcome::Success(_) => panic!("frame 3 should fail"),
            }
        } else {
            assert!(!result.outcome.is_error());
        }
    }

    assert_eq!(pipeline.get_statistics().processing_errors, 1);
}

/// Blocks every detector call until the gate sender is dropped
struct GateDetector {
    gate: Mutex<mpsc::Receiver<()>>,
}

impl Detector for GateDetector {
    fn process_batch(&self, items: &[WorkItem]) -> edgeflow::Result<Vec<DetectionOutcome>> {
        // recv returns Err once the sender is dropped, which releases the gate
        let _ = self.gate.lock().unwrap().recv();
        Ok(items
            .iter()
            .map(|_| DetectionOutcome::Detections(Vec::new()))
            .collect())
    }
}

#[test]
fn test_overflow_accounting_under_stall() {
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let detector: Arc<dyn Detector> = Arc::new(GateDetector {
        gate: Mutex::new(gate_rx),
    });

    let mut config = small_config()
        .with_batch_size(1)
        .with_worker_count(1)
        .with_max_queue_size(4);
    // Never drop results while the drain loop catches up
    config.result_push_timeout_ms = 5_000;
    let pipeline = InferencePipeline::new(config, detector).unwrap();
    pipeline.start().unwrap();

    // With the detector stalled, the pipeline can absorb only a handful
    // of items before the ingest queue rejects the rest
    let n = 50;
    let mut successes = 0;
    for i in 0..n {
        if pipeline.add_item(&FRAME, meta(i)) {
            successes += 1;
        }
    }
    assert!(successes < n, "expected rejections, all {n} accepted");

    let stats = pipeline.get_statistics();
    assert_eq!(successes as u64 + stats.queue_overflows, n as u64);

    // Release the gate and confirm every accepted item produces a result
    drop(gate_tx);
    let results = drain_results(&pipeline, successes);
    assert_eq!(results.len(), successes);

    pipeline.stop();
}

#[test]
fn test_stop_flushes_partial_batch() {
    // A 60s batch timeout would never fire on its own; stop must flush
    let config = small_config()
        .with_batch_size(8)
        .with_batch_timeout_secs(60.0);
    let pipeline = InferencePipeline::new(config, echo_detector()).unwrap();
    pipeline.start().unwrap();

    assert!(pipeline.add_item(&FRAME, meta(0)));
    assert!(pipeline.add_item(&FRAME, meta(1)));
    std::thread::sleep(Duration::from_millis(100));

    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    // Results are still drainable after the pipeline stopped
    let results = drain_results(&pipeline, 2);
    assert_eq!(results.len(), 2);
    assert_eq!(pipeline.get_statistics().images_processed, 2);
}

#[test]
fn test_buffer_reuse_across_waves() {
    let pipeline = InferencePipeline::new(small_config(), echo_detector()).unwrap();
    pipeline.start().unwrap();

    for wave in 0..3 {
        for i in 0..4 {
            assert!(pipeline.add_item(&FRAME, meta(wave * 4 + i)));
        }
        let results = drain_results(&pipeline, 4);
        assert_eq!(results.len(), 4);
    }
    pipeline.stop();

    let stats = pipeline.get_statistics();
    // Later waves reuse buffers released by earlier ones
    assert!(stats.pool_hits > 0, "expected pool hits, got {stats:?}");
    assert_eq!(
        stats.pool_hits + stats.pool_misses,
        stats.images_processed,
        "one acquire per processed frame"
    );
}

#[test]
fn test_simulated_memory_pressure_evicts_pool() {
    let pipeline = InferencePipeline::new(small_config(), echo_detector()).unwrap();
    pipeline.start().unwrap();

    assert!(pipeline.add_item(&FRAME, meta(0)));
    assert_eq!(drain_results(&pipeline, 1).len(), 1);
    assert!(pipeline.pool_size() > 0);

    // Far above any plausible threshold
    assert!(pipeline.memory_monitor().check_pressure(1_000_000.0));
    assert_eq!(pipeline.pool_size(), 0);
    assert_eq!(pipeline.get_statistics().memory_cleanups, 1);

    pipeline.stop();
}

#[test]
fn test_performance_report_reflects_activity() {
    let pipeline = InferencePipeline::new(small_config(), echo_detector()).unwrap();
    pipeline.start().unwrap();

    for i in 0..4 {
        assert!(pipeline.add_item(&FRAME, meta(i)));
    }
    assert_eq!(drain_results(&pipeline, 4).len(), 4);
    pipeline.stop();

    let report = pipeline.get_performance_report();
    assert!(report.contains("Images processed:   4"));
    assert!(report.contains("State:              Stopped"));
}
