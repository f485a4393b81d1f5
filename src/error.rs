//! Error types for the edgeflow pipeline

use thiserror::Error;

/// Result type alias for edgeflow operations
pub type Result<T> = std::result::Result<T, EdgeflowError>;

/// Main error type for the edgeflow pipeline
#[derive(Error, Debug)]
pub enum EdgeflowError {
    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Item load error: {0}")]
    ItemLoad(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Thread spawn error: {0}")]
    ThreadSpawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
