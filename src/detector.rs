//! Detector capability
//!
//! The engine never inspects concrete model types; any inference backend
//! plugs in through this narrow trait.

use serde::{Deserialize, Serialize};

use crate::batch::WorkItem;
use crate::error::Result;

/// One detection produced for a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label
    pub label: String,
    /// Confidence in [0, 1]
    pub score: f32,
    /// Bounding box as [x, y, width, height] in pixels
    pub bbox: [f32; 4],
}

/// Per-item outcome of a detector call
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// The frame was processed; zero detections is a valid outcome
    Detections(Vec<Detection>),
    /// The frame failed inside the model without affecting its siblings
    Failed(String),
}

/// An inference backend that consumes whole batches.
///
/// The returned vector must have one outcome per input item, in input
/// order. Returning `Err` is treated as a batch-level failure and every
/// item in the batch receives an error result.
pub trait Detector: Send + Sync {
    fn process_batch(&self, items: &[WorkItem]) -> Result<Vec<DetectionOutcome>>;
}

impl<F> Detector for F
where
    F: Fn(&[WorkItem]) -> Result<Vec<DetectionOutcome>> + Send + Sync,
{
    fn process_batch(&self, items: &[WorkItem]) -> Result<Vec<DetectionOutcome>> {
        self(items)
    }
}
