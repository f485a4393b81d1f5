//! Batch assembly
//!
//! The assembler is the single consumer of the ingest queue. It parks
//! until the first item of a batch arrives, then collects more until the
//! batch fills or the deadline passes. The deadline is anchored at the
//! moment the first item joins the current partial batch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::memory::PooledBuffer;
use crate::queue::{BoundedQueue, PopResult};

/// One unit of work flowing through the pipeline. Immutable once
/// enqueued.
pub struct WorkItem {
    pub(crate) payload: PooledBuffer,
    pub(crate) metadata: BTreeMap<String, String>,
    pub(crate) enqueued_at: Instant,
}

impl WorkItem {
    /// Create an item around a loaded frame buffer
    pub fn new(payload: PooledBuffer, metadata: BTreeMap<String, String>) -> Self {
        Self {
            payload,
            metadata,
            enqueued_at: Instant::now(),
        }
    }

    /// The loaded frame buffer
    pub fn payload(&self) -> &PooledBuffer {
        &self.payload
    }

    /// Caller-supplied metadata, ordered by key
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// When the item entered the pipeline
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("payload", &self.payload)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// An ordered group of items dispatched together to the detector
#[derive(Debug)]
pub struct Batch {
    /// Items in arrival order
    pub items: Vec<WorkItem>,
    /// When the batch was sealed for dispatch
    pub assembled_at: Instant,
}

impl Batch {
    /// Number of items in the batch
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch is empty (never true for dispatched batches)
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Pulls items off the ingest queue and groups them into batches
pub struct BatchAssembler {
    ingest: Arc<BoundedQueue<WorkItem>>,
    batches: Arc<BoundedQueue<Batch>>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl BatchAssembler {
    pub fn new(
        ingest: Arc<BoundedQueue<WorkItem>>,
        batches: Arc<BoundedQueue<Batch>>,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        Self {
            ingest,
            batches,
            batch_size,
            batch_timeout,
        }
    }

    /// Run until the ingest queue is closed and drained.
    ///
    /// On shutdown any non-empty partial batch is dispatched before the
    /// batch channel is closed, so no accepted item is silently dropped.
    pub fn run(&self) {
        loop {
            // Park until the first item of the next batch arrives. An
            // empty deadline just resets.
            let first = match self.ingest.pop_timeout(self.batch_timeout) {
                PopResult::Item(item) => item,
                PopResult::Timeout => continue,
                PopResult::Closed => break,
            };

            // Deadline anchored at the first item's arrival
            let deadline = Instant::now() + self.batch_timeout;
            let mut items = vec![first];
            let mut ingest_closed = false;

            while items.len() < self.batch_size {
                match self.ingest.pop_deadline(deadline) {
                    PopResult::Item(item) => items.push(item),
                    PopResult::Timeout => break,
                    PopResult::Closed => {
                        ingest_closed = true;
                        break;
                    }
                }
            }

            self.dispatch(items);
            if ingest_closed {
                break;
            }
        }

        // Workers drain what is in flight, then exit
        self.batches.close();
        debug!("batch assembler exiting");
    }

    fn dispatch(&self, items: Vec<WorkItem>) {
        let batch = Batch {
            items,
            assembled_at: Instant::now(),
        };
        debug!(batch_size = batch.len(), "dispatching batch");
        // Blocking push: a saturated worker pool backpressures into the
        // ingest queue instead of losing batches.
        self.batches.push(batch);
    }
}
