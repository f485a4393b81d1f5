//! Pipeline configuration

use serde::{Deserialize, Serialize};

use crate::error::{EdgeflowError, Result};
use crate::memory::DType;

/// Configuration for the inference pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of items per batch
    pub batch_size: usize,
    /// Maximum seconds to wait for a batch to fill, measured from the
    /// arrival of the first item in the current partial batch
    pub batch_timeout_secs: f64,
    /// Maximum number of items waiting in the ingest queue
    pub max_queue_size: usize,
    /// Number of worker threads
    pub worker_count: usize,
    /// Maximum free buffers retained per (shape, dtype) pool bucket
    pub max_pool_size: usize,
    /// Process memory budget in megabytes
    pub max_memory_mb: f64,
    /// Fraction of the budget above which forced cleanup runs
    pub memory_threshold_fraction: f64,
    /// Seconds between memory pressure checks
    pub cleanup_interval_secs: f64,
    /// Expected frame shape, e.g. [3, 480, 640]
    pub frame_shape: Vec<usize>,
    /// Expected frame element type
    pub frame_dtype: DType,
    /// Maximum memory samples retained by the pressure monitor
    pub max_history_size: usize,
    /// Milliseconds `add_item` may block waiting for queue space.
    /// Zero means fail-fast rejection.
    pub ingest_push_timeout_ms: u64,
    /// Milliseconds a worker may block pushing a result before dropping it
    pub result_push_timeout_ms: u64,
    /// Seconds `stop` waits for threads before detaching them
    pub join_timeout_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            batch_timeout_secs: 0.5,
            max_queue_size: 100,
            worker_count: 2,
            max_pool_size: 16,
            max_memory_mb: 2048.0,
            memory_threshold_fraction: 0.8,
            cleanup_interval_secs: 30.0,
            frame_shape: vec![3, 480, 640],
            frame_dtype: DType::U8,
            max_history_size: 100,
            ingest_push_timeout_ms: 0,
            result_push_timeout_ms: 250,
            join_timeout_secs: 5.0,
        }
    }
}

impl PipelineConfig {
    /// Set the maximum batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the batch collection timeout in seconds
    pub fn with_batch_timeout_secs(mut self, secs: f64) -> Self {
        self.batch_timeout_secs = secs;
        self
    }

    /// Set the ingest queue capacity
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the per-bucket buffer pool capacity
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the expected frame shape and element type
    pub fn with_frame_format(mut self, shape: Vec<usize>, dtype: DType) -> Self {
        self.frame_shape = shape;
        self.frame_dtype = dtype;
        self
    }

    /// Set the memory budget and cleanup threshold fraction
    pub fn with_memory_budget(mut self, max_memory_mb: f64, threshold_fraction: f64) -> Self {
        self.max_memory_mb = max_memory_mb;
        self.memory_threshold_fraction = threshold_fraction;
        self
    }

    /// Set the memory check interval in seconds
    pub fn with_cleanup_interval_secs(mut self, secs: f64) -> Self {
        self.cleanup_interval_secs = secs;
        self
    }

    /// Number of bytes in one frame payload
    pub fn frame_byte_len(&self) -> usize {
        self.frame_shape.iter().product::<usize>() * self.frame_dtype.size_of()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EdgeflowError::Config("batch_size must be at least 1".into()));
        }
        if self.max_queue_size == 0 {
            return Err(EdgeflowError::Config("max_queue_size must be at least 1".into()));
        }
        if self.worker_count == 0 {
            return Err(EdgeflowError::Config("worker_count must be at least 1".into()));
        }
        if self.batch_timeout_secs <= 0.0 {
            return Err(EdgeflowError::Config("batch_timeout_secs must be positive".into()));
        }
        if self.cleanup_interval_secs <= 0.0 {
            return Err(EdgeflowError::Config(
                "cleanup_interval_secs must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.memory_threshold_fraction) {
            return Err(EdgeflowError::Config(
                "memory_threshold_fraction must be within [0, 1]".into(),
            ));
        }
        if self.frame_shape.is_empty() || self.frame_shape.iter().any(|&d| d == 0) {
            return Err(EdgeflowError::Config(
                "frame_shape must have non-zero dimensions".into(),
            ));
        }
        Ok(())
    }
}
