//! Pipeline statistics
//!
//! Counters updated by every component under short critical sections,
//! plus a rolling window of batch processing times. No business logic
//! lives here.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of pipeline statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Buffers allocated fresh on pool misses
    pub total_allocations: u64,
    /// Buffers released back (re-pooled or discarded)
    pub total_deallocations: u64,
    /// Buffer requests served from the pool
    pub pool_hits: u64,
    /// Buffer requests that required allocation
    pub pool_misses: u64,
    /// Batches dispatched through the detector
    pub batches_processed: u64,
    /// Items processed across all batches
    pub images_processed: u64,
    /// Items rejected by a full ingest queue
    pub queue_overflows: u64,
    /// Item-level failures plus dropped results
    pub processing_errors: u64,
    /// Forced cleanups triggered by memory pressure
    pub memory_cleanups: u64,
    /// Rolling average batch processing time in milliseconds
    pub average_batch_time_ms: f64,
    /// Seconds since the registry was created
    pub uptime_secs: f64,
    /// Items per second over the registry lifetime
    pub throughput_items_per_sec: f64,
}

/// Shared registry of pipeline counters and timers
pub struct StatsRegistry {
    total_allocations: AtomicU64,
    total_deallocations: AtomicU64,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
    batches_processed: AtomicU64,
    images_processed: AtomicU64,
    queue_overflows: AtomicU64,
    processing_errors: AtomicU64,
    memory_cleanups: AtomicU64,

    batch_times_ms: RwLock<VecDeque<f64>>,
    window_size: usize,
    start_time: Instant,
}

impl StatsRegistry {
    /// Create a registry with the given rolling window size
    pub fn new(window_size: usize) -> Self {
        Self {
            total_allocations: AtomicU64::new(0),
            total_deallocations: AtomicU64::new(0),
            pool_hits: AtomicU64::new(0),
            pool_misses: AtomicU64::new(0),
            batches_processed: AtomicU64::new(0),
            images_processed: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            processing_errors: AtomicU64::new(0),
            memory_cleanups: AtomicU64::new(0),
            batch_times_ms: RwLock::new(VecDeque::with_capacity(window_size)),
            window_size,
            start_time: Instant::now(),
        }
    }

    pub fn record_allocation(&self) {
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deallocation(&self) {
        self.total_deallocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_hit(&self) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_miss(&self) {
        self.pool_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_overflow(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_cleanup(&self) {
        self.memory_cleanups.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed batch and its processing time
    pub fn record_batch(&self, batch_size: usize, processing_time_ms: f64) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.images_processed
            .fetch_add(batch_size as u64, Ordering::Relaxed);

        let mut times = self.batch_times_ms.write();
        times.push_back(processing_time_ms);
        while times.len() > self.window_size {
            times.pop_front();
        }
    }

    /// Rolling average batch processing time in milliseconds
    pub fn average_batch_time_ms(&self) -> f64 {
        let times = self.batch_times_ms.read();
        if times.is_empty() {
            0.0
        } else {
            times.iter().sum::<f64>() / times.len() as f64
        }
    }

    /// Point-in-time copy of all counters and derived timers
    pub fn snapshot(&self) -> PipelineStats {
        let images = self.images_processed.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed().as_secs_f64();
        let throughput = if uptime > 0.0 {
            images as f64 / uptime
        } else {
            0.0
        };

        PipelineStats {
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            total_deallocations: self.total_deallocations.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.pool_misses.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            images_processed: images,
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
            memory_cleanups: self.memory_cleanups.load(Ordering::Relaxed),
            average_batch_time_ms: self.average_batch_time_ms(),
            uptime_secs: uptime,
            throughput_items_per_sec: throughput,
        }
    }

    /// Human-readable multi-line report of the current counters
    pub fn report(&self) -> String {
        let stats = self.snapshot();
        let pool_total = stats.pool_hits + stats.pool_misses;
        let hit_rate = if pool_total > 0 {
            stats.pool_hits as f64 / pool_total as f64 * 100.0
        } else {
            0.0
        };

        format!(
            "Pipeline Performance Report\n\
             ===========================\n\
             Uptime:             {:.1}s\n\
             Batches processed:  {}\n\
             Images processed:   {} ({:.1} items/s)\n\
             Avg batch time:     {:.2} ms\n\
             Queue overflows:    {}\n\
             Processing errors:  {}\n\
             Pool hits/misses:   {}/{} ({:.1}% hit rate)\n\
             Allocations:        {} (released {})\n\
             Memory cleanups:    {}\n",
            stats.uptime_secs,
            stats.batches_processed,
            stats.images_processed,
            stats.throughput_items_per_sec,
            stats.average_batch_time_ms,
            stats.queue_overflows,
            stats.processing_errors,
            stats.pool_hits,
            stats.pool_misses,
            hit_rate,
            stats.total_allocations,
            stats.total_deallocations,
            stats.memory_cleanups,
        )
    }

    /// Reset every counter and the timing window
    pub fn reset(&self) {
        self.total_allocations.store(0, Ordering::Relaxed);
        self.total_deallocations.store(0, Ordering::Relaxed);
        self.pool_hits.store(0, Ordering::Relaxed);
        self.pool_misses.store(0, Ordering::Relaxed);
        self.batches_processed.store(0, Ordering::Relaxed);
        self.images_processed.store(0, Ordering::Relaxed);
        self.queue_overflows.store(0, Ordering::Relaxed);
        self.processing_errors.store(0, Ordering::Relaxed);
        self.memory_cleanups.store(0, Ordering::Relaxed);
        self.batch_times_ms.write().clear();
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_batch() {
        let stats = StatsRegistry::new(100);
        stats.record_batch(4, 10.0);
        stats.record_batch(8, 20.0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batches_processed, 2);
        assert_eq!(snapshot.images_processed, 12);
        assert!((snapshot.average_batch_time_ms - 15.0).abs() < 0.01);
    }

    #[test]
    fn test_window_bound() {
        let stats = StatsRegistry::new(3);
        for i in 0..10 {
            stats.record_batch(1, i as f64);
        }
        // Window keeps the last 3 observations: 7, 8, 9
        assert!((stats.average_batch_time_ms() - 8.0).abs() < 0.01);
        assert_eq!(stats.snapshot().batches_processed, 10);
    }

    #[test]
    fn test_counters() {
        let stats = StatsRegistry::default();
        stats.record_pool_hit();
        stats.record_pool_miss();
        stats.record_allocation();
        stats.record_deallocation();
        stats.record_queue_overflow();
        stats.record_processing_error();
        stats.record_memory_cleanup();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pool_hits, 1);
        assert_eq!(snapshot.pool_misses, 1);
        assert_eq!(snapshot.total_allocations, 1);
        assert_eq!(snapshot.total_deallocations, 1);
        assert_eq!(snapshot.queue_overflows, 1);
        assert_eq!(snapshot.processing_errors, 1);
        assert_eq!(snapshot.memory_cleanups, 1);
    }

    #[test]
    fn test_report_contains_counters() {
        let stats = StatsRegistry::default();
        stats.record_batch(5, 12.5);
        let report = stats.report();
        assert!(report.contains("Batches processed:  1"));
        assert!(report.contains("Images processed:   5"));
    }

    #[test]
    fn test_reset() {
        let stats = StatsRegistry::default();
        stats.record_batch(5, 12.5);
        stats.record_pool_hit();
        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batches_processed, 0);
        assert_eq!(snapshot.pool_hits, 0);
        assert_eq!(snapshot.average_batch_time_ms, 0.0);
    }
}
