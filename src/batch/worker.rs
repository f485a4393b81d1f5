//! Worker dispatch
//!
//! Each worker consumes one batch at a time, invokes the detector, and
//! emits one result per item in item order. A failure inside the model
//! for one item never affects its siblings; a batch-level detector
//! failure produces synthesized error results for every item instead of
//! unwinding the worker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::{Batch, WorkItem};
use crate::detector::{Detection, DetectionOutcome, Detector};
use crate::monitoring::StatsRegistry;
use crate::queue::{BoundedQueue, PopResult};

/// How long an idle worker waits before re-checking its queue
const WORKER_POLL: Duration = Duration::from_millis(200);

/// Classification of a failed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The payload could not be loaded into a frame buffer
    ItemLoad,
    /// The detector failed for this item or its whole batch
    Detector,
}

/// Outcome of processing one item
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Vec<Detection>),
    Error { kind: FailureKind, message: String },
}

impl Outcome {
    /// Whether this outcome is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }
}

/// Per-item result emitted to the output queue.
///
/// The frame buffer is released back to the pool when the result is
/// built; results carry the item's metadata and timestamps onward.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Metadata of the originating item, ordered by key
    pub metadata: BTreeMap<String, String>,
    /// When the item entered the pipeline
    pub enqueued_at: Instant,
    /// What happened to the item
    pub outcome: Outcome,
    /// When processing finished
    pub processed_at: Instant,
}

impl InferenceResult {
    /// Consume an item and wrap its outcome, releasing the payload buffer
    pub fn from_item(item: WorkItem, outcome: Outcome) -> Self {
        let WorkItem {
            payload,
            metadata,
            enqueued_at,
        } = item;
        drop(payload);
        Self {
            metadata,
            enqueued_at,
            outcome,
            processed_at: Instant::now(),
        }
    }
}

/// One member of the worker pool
pub struct Worker {
    id: usize,
    batches: Arc<BoundedQueue<Batch>>,
    output: Arc<BoundedQueue<InferenceResult>>,
    detector: Arc<dyn Detector>,
    stats: Arc<StatsRegistry>,
    result_push_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        batches: Arc<BoundedQueue<Batch>>,
        output: Arc<BoundedQueue<InferenceResult>>,
        detector: Arc<dyn Detector>,
        stats: Arc<StatsRegistry>,
        result_push_timeout: Duration,
    ) -> Self {
        Self {
            id,
            batches,
            output,
            detector,
            stats,
            result_push_timeout,
        }
    }

    /// Consume batches until the batch channel is closed and drained
    pub fn run(&self) {
        loop {
            match self.batches.pop_timeout(WORKER_POLL) {
                PopResult::Item(batch) => self.process(batch),
                PopResult::Timeout => continue,
                PopResult::Closed => break,
            }
        }
        debug!(worker = self.id, "worker exiting");
    }

    fn process(&self, batch: Batch) {
        let started = Instant::now();
        let batch_len = batch.items.len();

        // No lock is held across this call
        let outcomes = match self.detector.process_batch(&batch.items) {
            Ok(outcomes) if outcomes.len() == batch_len => outcomes,
            Ok(outcomes) => {
                warn!(
                    worker = self.id,
                    expected = batch_len,
                    got = outcomes.len(),
                    "detector returned wrong-length output, failing whole batch"
                );
                vec![
                    DetectionOutcome::Failed("detector output length mismatch".to_string());
                    batch_len
                ]
            }
            Err(err) => {
                warn!(
                    worker = self.id,
                    error = %err,
                    "detector failed, synthesizing error results for batch"
                );
                vec![DetectionOutcome::Failed(err.to_string()); batch_len]
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.record_batch(batch_len, elapsed_ms);

        for (item, detection) in batch.items.into_iter().zip(outcomes) {
            let outcome = match detection {
                DetectionOutcome::Detections(detections) => Outcome::Success(detections),
                DetectionOutcome::Failed(message) => {
                    self.stats.record_processing_error();
                    Outcome::Error {
                        kind: FailureKind::Detector,
                        message,
                    }
                }
            };
            let result = InferenceResult::from_item(item, outcome);
            if !self.output.push_timeout(result, self.result_push_timeout) {
                self.stats.record_processing_error();
                warn!(worker = self.id, "output queue full, result dropped");
            }
        }
    }
}
