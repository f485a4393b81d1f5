//! Edgeflow - Edge-device inference pipeline
//!
//! This crate provides the batching and resource-management core of an
//! edge inference service:
//! - Bounded ingest with fail-fast backpressure
//! - Size/timeout batch assembly
//! - A fixed worker pool in front of a pluggable [`Detector`]
//! - Reusable frame buffers pooled by shape and element type
//! - Memory-pressure monitoring with forced pool eviction
//!
//! # Modules
//!
//! - [`pipeline`] - The [`InferencePipeline`] facade and lifecycle
//! - [`batch`] - Batch assembly and worker dispatch
//! - [`memory`] - Buffer pooling and memory pressure monitoring
//! - [`monitoring`] - Shared counters and timers
//! - [`queue`] - Bounded condvar-backed queues
//! - [`detector`] - The inference backend capability
//!
//! Camera capture, result upload, and UI concerns live outside this
//! crate; callers feed frames through [`InferencePipeline::add_item`]
//! and drain results with [`InferencePipeline::get_result`].
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use edgeflow::prelude::*;
//!
//! let detector: Arc<dyn Detector> = Arc::new(|items: &[WorkItem]| -> Result<Vec<DetectionOutcome>> {
//!     Ok(items
//!         .iter()
//!         .map(|_| DetectionOutcome::Detections(Vec::new()))
//!         .collect())
//! });
//!
//! let config = PipelineConfig::default().with_frame_format(vec![4], DType::U8);
//! let pipeline = InferencePipeline::new(config, detector)?;
//! pipeline.start()?;
//!
//! pipeline.add_item(&[0u8; 4], BTreeMap::new());
//! if let Some(result) = pipeline.get_result(Duration::from_secs(1)) {
//!     println!("{:?}", result.outcome);
//! }
//!
//! pipeline.stop();
//! # Ok::<(), edgeflow::EdgeflowError>(())
//! ```

pub mod error;

pub mod batch;
pub mod config;
pub mod detector;
pub mod memory;
pub mod monitoring;
pub mod pipeline;
pub mod queue;

pub use error::{EdgeflowError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{EdgeflowError, Result};

    // Pipeline
    pub use crate::config::PipelineConfig;
    pub use crate::pipeline::{InferencePipeline, PipelineState};

    // Batching
    pub use crate::batch::{Batch, FailureKind, InferenceResult, Outcome, WorkItem};

    // Detection
    pub use crate::detector::{Detection, DetectionOutcome, Detector};

    // Memory management
    pub use crate::memory::{BufferPool, DType, MemoryPressureMonitor, PooledBuffer};

    // Monitoring
    pub use crate::monitoring::{PipelineStats, StatsRegistry};
}
