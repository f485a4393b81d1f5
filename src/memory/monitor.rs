//! Memory pressure monitoring
//!
//! Samples process resident memory on a fixed interval and evicts the
//! buffer pool when usage crosses the configured fraction of the memory
//! budget. Cleanup is advisory: in-flight batches are never paused.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::{debug, warn};

use crate::memory::BufferPool;
use crate::monitoring::StatsRegistry;

/// One memory observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySample {
    /// Seconds since UNIX epoch
    pub timestamp: f64,
    /// Process resident memory in megabytes
    pub resident_mb: f64,
    /// Whether this sample triggered a forced cleanup
    pub triggered_cleanup: bool,
}

/// Monitors process memory and clears the buffer pool under pressure
pub struct MemoryPressureMonitor {
    max_memory_mb: f64,
    threshold_fraction: f64,
    interval: Duration,
    max_history: usize,

    pool: Arc<BufferPool>,
    stats: Arc<StatsRegistry>,
    history: RwLock<VecDeque<MemorySample>>,
    system: parking_lot::Mutex<System>,

    /// Interval waits park here so `signal_shutdown` wakes them promptly
    shutdown: (Mutex<bool>, Condvar),
}

impl MemoryPressureMonitor {
    pub fn new(
        max_memory_mb: f64,
        threshold_fraction: f64,
        interval: Duration,
        max_history: usize,
        pool: Arc<BufferPool>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            max_memory_mb,
            threshold_fraction,
            interval,
            max_history,
            pool,
            stats,
            history: RwLock::new(VecDeque::with_capacity(max_history)),
            system: parking_lot::Mutex::new(System::new()),
            shutdown: (Mutex::new(false), Condvar::new()),
        }
    }

    /// Current process resident memory in megabytes
    pub fn sample_resident_mb(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_all();
        let pid = Pid::from_u32(std::process::id());
        system
            .process(pid)
            .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }

    /// Evaluate one memory reading against the budget.
    ///
    /// Above threshold: clear the buffer pool, count the cleanup, and
    /// warn. Below: record the sample for diagnostics only. Returns
    /// whether a cleanup ran.
    pub fn check_pressure(&self, current_mb: f64) -> bool {
        let threshold_mb = self.max_memory_mb * self.threshold_fraction;
        let triggered = current_mb > threshold_mb;

        if triggered {
            let evicted = self.pool.pooled_count();
            self.pool.clear();
            self.stats.record_memory_cleanup();
            warn!(
                current_mb,
                threshold_mb,
                evicted_buffers = evicted,
                "memory pressure: buffer pool cleared"
            );
        } else {
            debug!(current_mb, threshold_mb, "memory sample");
        }

        self.push_sample(MemorySample {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            resident_mb: current_mb,
            triggered_cleanup: triggered,
        });

        triggered
    }

    /// Sample once and evaluate pressure
    pub fn tick(&self) -> bool {
        let current_mb = self.sample_resident_mb();
        self.check_pressure(current_mb)
    }

    fn push_sample(&self, sample: MemorySample) {
        let mut history = self.history.write();
        history.push_back(sample);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    /// The last `last_n` memory samples, oldest first
    pub fn history(&self, last_n: usize) -> Vec<MemorySample> {
        let history = self.history.read();
        let start = history.len().saturating_sub(last_n);
        history.iter().skip(start).cloned().collect()
    }

    /// Run the sampling loop until shutdown is signalled
    pub fn run(&self) {
        loop {
            let stop = {
                let (lock, cvar) = &self.shutdown;
                let guard = match lock.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                if *guard {
                    true
                } else {
                    match cvar.wait_timeout(guard, self.interval) {
                        Ok((guard, _)) => *guard,
                        Err(_) => return,
                    }
                }
            };
            if stop {
                return;
            }
            self.tick();
        }
    }

    /// Wake the sampling loop and make it exit
    pub fn signal_shutdown(&self) {
        let (lock, cvar) = &self.shutdown;
        if let Ok(mut guard) = lock.lock() {
            *guard = true;
        }
        cvar.notify_all();
    }

    /// Re-arm the monitor so a stopped pipeline can start again
    pub fn reset_shutdown(&self) {
        let (lock, _) = &self.shutdown;
        if let Ok(mut guard) = lock.lock() {
            *guard = false;
        }
    }
}
