//! Memory Module
//!
//! Reusable frame buffer pooling keyed by shape and element type, plus
//! interval-based memory pressure monitoring and eviction.

mod monitor;
mod pool;

pub use monitor::{MemoryPressureMonitor, MemorySample};
pub use pool::{BufferPool, DType, PooledBuffer};
