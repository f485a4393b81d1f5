//! Batch Module
//!
//! Batch assembly from the ingest queue and worker dispatch to the
//! detector.

mod assembler;
mod worker;

pub use assembler::{Batch, BatchAssembler, WorkItem};
pub use worker::{FailureKind, InferenceResult, Outcome, Worker};
