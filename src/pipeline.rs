//! Inference pipeline
//!
//! The top-level engine: owns the queues, buffer pool, statistics, and
//! memory monitor, and drives the assembler and worker threads through
//! the Stopped -> Starting -> Running -> Stopping -> Stopped lifecycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::batch::{Batch, BatchAssembler, FailureKind, InferenceResult, Outcome, WorkItem, Worker};
use crate::config::PipelineConfig;
use crate::detector::Detector;
use crate::error::{EdgeflowError, Result};
use crate::memory::{BufferPool, MemoryPressureMonitor};
use crate::monitoring::{PipelineStats, StatsRegistry};
use crate::queue::{BoundedQueue, PopResult};

/// Lifecycle state of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl From<u8> for PipelineState {
    fn from(value: u8) -> Self {
        match value {
            1 => PipelineState::Starting,
            2 => PipelineState::Running,
            3 => PipelineState::Stopping,
            _ => PipelineState::Stopped,
        }
    }
}

/// Edge inference pipeline: bounded ingest, batch assembly, worker
/// dispatch, and pooled frame buffers.
pub struct InferencePipeline {
    config: PipelineConfig,
    frame_byte_len: usize,

    detector: Arc<dyn Detector>,
    stats: Arc<StatsRegistry>,
    pool: Arc<BufferPool>,
    monitor: Arc<MemoryPressureMonitor>,

    ingest: Arc<BoundedQueue<WorkItem>>,
    batches: Arc<BoundedQueue<Batch>>,
    output: Arc<BoundedQueue<InferenceResult>>,

    state: AtomicU8,
    threads: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl InferencePipeline {
    /// Build a pipeline around a detector. Fails on invalid configuration.
    pub fn new(config: PipelineConfig, detector: Arc<dyn Detector>) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(StatsRegistry::default());
        let pool = BufferPool::new(config.max_pool_size, Arc::clone(&stats));
        let monitor = Arc::new(MemoryPressureMonitor::new(
            config.max_memory_mb,
            config.memory_threshold_fraction,
            Duration::from_secs_f64(config.cleanup_interval_secs),
            config.max_history_size,
            Arc::clone(&pool),
            Arc::clone(&stats),
        ));

        let ingest = Arc::new(BoundedQueue::new(config.max_queue_size));
        // Small hand-off channel so a saturated worker pool
        // backpressures into the ingest queue
        let batches = Arc::new(BoundedQueue::new(config.worker_count * 2));
        let output = Arc::new(BoundedQueue::new(config.max_queue_size));

        let frame_byte_len = config.frame_byte_len();

        Ok(Self {
            config,
            frame_byte_len,
            detector,
            stats,
            pool,
            monitor,
            ingest,
            batches,
            output,
            state: AtomicU8::new(PipelineState::Stopped as u8),
            threads: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        PipelineState::from(self.state.load(Ordering::SeqCst))
    }

    /// Spin up the monitor, assembler, and worker threads.
    ///
    /// Thread spawn failure is the only fatal error; everything later is
    /// reported through results and counters.
    pub fn start(&self) -> Result<()> {
        self.state
            .compare_exchange(
                PipelineState::Stopped as u8,
                PipelineState::Starting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|actual| {
                EdgeflowError::Pipeline(format!(
                    "cannot start from state {:?}",
                    PipelineState::from(actual)
                ))
            })?;

        self.ingest.reopen();
        self.batches.reopen();
        self.output.reopen();
        self.monitor.reset_shutdown();

        let mut handles = Vec::with_capacity(self.config.worker_count + 2);
        let spawn_result = (|| -> Result<()> {
            let monitor = Arc::clone(&self.monitor);
            handles.push(spawn_named("edgeflow-memmon", move || monitor.run())?);

            let assembler = BatchAssembler::new(
                Arc::clone(&self.ingest),
                Arc::clone(&self.batches),
                self.config.batch_size,
                Duration::from_secs_f64(self.config.batch_timeout_secs),
            );
            handles.push(spawn_named("edgeflow-assembler", move || assembler.run())?);

            for id in 0..self.config.worker_count {
                let worker = Worker::new(
                    id,
                    Arc::clone(&self.batches),
                    Arc::clone(&self.output),
                    Arc::clone(&self.detector),
                    Arc::clone(&self.stats),
                    Duration::from_millis(self.config.result_push_timeout_ms),
                );
                handles.push(spawn_named(&format!("edgeflow-worker-{id}"), move || {
                    worker.run()
                })?);
            }
            Ok(())
        })();

        if let Err(err) = spawn_result {
            // Unwind the partial start before reporting failure
            self.ingest.close();
            self.monitor.signal_shutdown();
            for handle in handles {
                let _ = handle.join();
            }
            self.state
                .store(PipelineState::Stopped as u8, Ordering::SeqCst);
            return Err(err);
        }

        *self.threads.lock() = handles;
        self.state
            .store(PipelineState::Running as u8, Ordering::SeqCst);
        info!(
            workers = self.config.worker_count,
            batch_size = self.config.batch_size,
            "pipeline started"
        );
        Ok(())
    }

    /// Stop the pipeline: the assembler flushes its partial batch,
    /// workers drain in-flight batches, and threads are joined with a
    /// bounded timeout. Queued results stay drainable afterwards.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(
                PipelineState::Running as u8,
                PipelineState::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        // Closing the ingest queue cascades: the assembler drains it,
        // dispatches the final partial batch, and closes the batch
        // channel, which winds the workers down.
        self.ingest.close();
        self.monitor.signal_shutdown();

        let deadline = Instant::now() + Duration::from_secs_f64(self.config.join_timeout_secs);
        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in handles {
            // JoinHandle has no timed join; poll against the deadline
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(
                    thread = handle.thread().name().unwrap_or("unnamed"),
                    "thread did not stop within the join timeout, detaching"
                );
            }
        }

        self.state
            .store(PipelineState::Stopped as u8, Ordering::SeqCst);
        info!("pipeline stopped");
    }

    /// Submit one frame payload with its metadata.
    ///
    /// Returns false when the pipeline is not running or the ingest
    /// queue rejects the item. A payload that fails loading is accepted
    /// and surfaces as an error result on the output queue.
    pub fn add_item(&self, payload: &[u8], metadata: BTreeMap<String, String>) -> bool {
        if self.state() != PipelineState::Running {
            return false;
        }

        if payload.len() != self.frame_byte_len {
            let message = format!(
                "payload is {} bytes, expected {} for shape {:?} {:?}",
                payload.len(),
                self.frame_byte_len,
                self.config.frame_shape,
                self.config.frame_dtype,
            );
            warn!(%message, "item load failed");
            self.stats.record_processing_error();
            let now = Instant::now();
            let result = InferenceResult {
                metadata,
                enqueued_at: now,
                outcome: Outcome::Error {
                    kind: FailureKind::ItemLoad,
                    message,
                },
                processed_at: now,
            };
            if !self
                .output
                .push_timeout(result, Duration::from_millis(self.config.result_push_timeout_ms))
            {
                warn!("output queue full, load-error result dropped");
            }
            return true;
        }

        let mut buffer = self
            .pool
            .acquire(&self.config.frame_shape, self.config.frame_dtype);
        buffer.load(payload);
        let item = WorkItem::new(buffer, metadata);

        let accepted = if self.config.ingest_push_timeout_ms == 0 {
            self.ingest.try_push(item)
        } else {
            self.ingest
                .push_timeout(item, Duration::from_millis(self.config.ingest_push_timeout_ms))
        };
        if !accepted {
            self.stats.record_queue_overflow();
        }
        accepted
    }

    /// Wait up to `timeout` for the next result
    pub fn get_result(&self, timeout: Duration) -> Option<InferenceResult> {
        match self.output.pop_timeout(timeout) {
            PopResult::Item(result) => Some(result),
            PopResult::Timeout | PopResult::Closed => None,
        }
    }

    /// Point-in-time statistics snapshot
    pub fn get_statistics(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Human-readable report of counters plus live gauges
    pub fn get_performance_report(&self) -> String {
        format!(
            "{}State:              {:?}\n\
             Ingest queue:       {}/{}\n\
             Pending results:    {}\n\
             Pooled buffers:     {}\n",
            self.stats.report(),
            self.state(),
            self.ingest.len(),
            self.ingest.capacity(),
            self.output.len(),
            self.pool.pooled_count(),
        )
    }

    /// Items currently waiting in the ingest queue
    pub fn queue_depth(&self) -> usize {
        self.ingest.len()
    }

    /// Results waiting to be drained
    pub fn pending_results(&self) -> usize {
        self.output.len()
    }

    /// Free buffers currently pooled
    pub fn pool_size(&self) -> usize {
        self.pool.pooled_count()
    }

    /// The memory pressure monitor, for diagnostics
    pub fn memory_monitor(&self) -> &MemoryPressureMonitor {
        &self.monitor
    }
}

impl Drop for InferencePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| EdgeflowError::ThreadSpawn(format!("{name}: {e}")))
}
