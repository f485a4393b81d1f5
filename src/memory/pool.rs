//! Frame buffer pool
//!
//! Reuses fixed-shape byte buffers to cut allocation churn under
//! sustained frame ingest. Buffers are keyed by (shape, dtype); each key
//! bucket keeps a stack of free buffers so acquire and release stay O(1)
//! on average.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::monitoring::StatsRegistry;

/// Element type of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    U8,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes
    pub fn size_of(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BufferKey {
    shape: Vec<usize>,
    dtype: DType,
}

/// A pooled byte buffer that returns to its pool when dropped
pub struct PooledBuffer {
    data: Vec<u8>,
    shape: Vec<usize>,
    dtype: DType,
    /// Weak reference avoids an Arc cycle through the free lists
    pool: Option<Weak<BufferPool>>,
}

impl PooledBuffer {
    fn new(data: Vec<u8>, shape: Vec<usize>, dtype: DType, pool: &Arc<BufferPool>) -> Self {
        Self {
            data,
            shape,
            dtype,
            pool: Some(Arc::downgrade(pool)),
        }
    }

    /// Shape of the buffer
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type of the buffer
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Length in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Read access to the raw bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Write access to the raw bytes
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy `src` into the buffer; lengths must match
    pub fn load(&mut self, src: &[u8]) {
        self.data.copy_from_slice(src);
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("byte_len", &self.data.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(weak) = self.pool.take() {
            if let Some(pool) = weak.upgrade() {
                let data = std::mem::take(&mut self.data);
                let shape = std::mem::take(&mut self.shape);
                pool.release(data, shape, self.dtype);
            }
        }
    }
}

/// Pool of reusable frame buffers keyed by (shape, dtype)
pub struct BufferPool {
    /// Maximum free buffers retained per key bucket
    max_per_key: usize,
    buckets: Mutex<HashMap<BufferKey, Vec<Vec<u8>>>>,
    stats: Arc<StatsRegistry>,
}

impl BufferPool {
    /// Create a pool retaining at most `max_per_key` free buffers per bucket
    pub fn new(max_per_key: usize, stats: Arc<StatsRegistry>) -> Arc<Self> {
        Arc::new(Self {
            max_per_key,
            buckets: Mutex::new(HashMap::new()),
            stats,
        })
    }

    /// Acquire a buffer with the exact shape and dtype.
    ///
    /// A pooled buffer is reused when available; otherwise a fresh zeroed
    /// buffer is allocated. Exhaustion is never an error.
    pub fn acquire(self: &Arc<Self>, shape: &[usize], dtype: DType) -> PooledBuffer {
        let key = BufferKey {
            shape: shape.to_vec(),
            dtype,
        };

        let reused = {
            let mut buckets = self.buckets.lock();
            buckets.get_mut(&key).and_then(|bucket| bucket.pop())
        };

        if let Some(data) = reused {
            self.stats.record_pool_hit();
            return PooledBuffer::new(data, key.shape, dtype, self);
        }

        self.stats.record_pool_miss();
        self.stats.record_allocation();
        let byte_len = shape.iter().product::<usize>() * dtype.size_of();
        PooledBuffer::new(vec![0u8; byte_len], key.shape, dtype, self)
    }

    /// Return a buffer to its bucket, or discard it past capacity.
    /// Either way the release is counted as a deallocation.
    fn release(&self, mut data: Vec<u8>, shape: Vec<usize>, dtype: DType) {
        self.stats.record_deallocation();

        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(BufferKey { shape, dtype })
            .or_insert_with(Vec::new);
        if bucket.len() < self.max_per_key {
            data.fill(0);
            bucket.push(data);
        }
    }

    /// Drop every pooled buffer
    pub fn clear(&self) {
        self.buckets.lock().clear();
    }

    /// Total free buffers across all buckets
    pub fn pooled_count(&self) -> usize {
        self.buckets.lock().values().map(|b| b.len()).sum()
    }

    /// Free buffers held for one (shape, dtype) bucket
    pub fn bucket_len(&self, shape: &[usize], dtype: DType) -> usize {
        let key = BufferKey {
            shape: shape.to_vec(),
            dtype,
        };
        self.buckets.lock().get(&key).map(|b| b.len()).unwrap_or(0)
    }

    /// Total bytes held by free buffers
    pub fn pooled_bytes(&self) -> usize {
        self.buckets
            .lock()
            .values()
            .flat_map(|bucket| bucket.iter())
            .map(|data| data.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_stats(max_per_key: usize) -> (Arc<BufferPool>, Arc<StatsRegistry>) {
        let stats = Arc::new(StatsRegistry::default());
        (BufferPool::new(max_per_key, Arc::clone(&stats)), stats)
    }

    #[test]
    fn test_acquire_allocates_zeroed() {
        let (pool, stats) = pool_with_stats(4);
        let buffer = pool.acquire(&[2, 3], DType::F32);

        assert_eq!(buffer.byte_len(), 24);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pool_misses, 1);
        assert_eq!(snapshot.total_allocations, 1);
    }

    #[test]
    fn test_release_then_acquire_reuses_same_buffer() {
        let (pool, stats) = pool_with_stats(4);

        let mut buffer = pool.acquire(&[4, 4], DType::U8);
        buffer.as_mut_slice()[0] = 7;
        let ptr = buffer.as_slice().as_ptr();
        drop(buffer);

        let buffer = pool.acquire(&[4, 4], DType::U8);
        assert_eq!(buffer.as_slice().as_ptr(), ptr);
        // Zeroed on release
        assert_eq!(buffer.as_slice()[0], 0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pool_hits, 1);
        assert_eq!(snapshot.pool_misses, 1);
    }

    #[test]
    fn test_exact_match_only() {
        let (pool, stats) = pool_with_stats(4);
        drop(pool.acquire(&[4, 4], DType::U8));

        // Same shape, different dtype: no reuse
        drop(pool.acquire(&[4, 4], DType::F32));
        // Different shape: no reuse
        drop(pool.acquire(&[2, 8], DType::U8));

        assert_eq!(stats.snapshot().pool_hits, 0);
        assert_eq!(stats.snapshot().pool_misses, 3);
    }

    #[test]
    fn test_capacity_bound_discards_excess() {
        let (pool, stats) = pool_with_stats(2);

        let buffers: Vec<_> = (0..3).map(|_| pool.acquire(&[8], DType::U8)).collect();
        for buffer in buffers {
            drop(buffer);
        }

        assert_eq!(pool.bucket_len(&[8], DType::U8), 2);
        // Discard still counts as a deallocation
        assert_eq!(stats.snapshot().total_deallocations, 3);
    }

    #[test]
    fn test_clear_empties_pool() {
        let (pool, _stats) = pool_with_stats(4);
        drop(pool.acquire(&[8], DType::U8));
        drop(pool.acquire(&[16], DType::F64));
        assert_eq!(pool.pooled_count(), 2);

        pool.clear();
        assert_eq!(pool.pooled_count(), 0);
        assert_eq!(pool.pooled_bytes(), 0);
    }

    #[test]
    fn test_load_copies_payload() {
        let (pool, _stats) = pool_with_stats(4);
        let mut buffer = pool.acquire(&[4], DType::U8);
        buffer.load(&[1, 2, 3, 4]);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);
    }
}
