//! Bounded queue primitives
//!
//! A condvar-backed bounded MPMC queue used for the ingest, batch, and
//! output stages. Producers either fail fast or wait with a timeout for
//! space; consumers park until an item arrives, a deadline passes, or the
//! queue is closed and drained.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of a timed pop
#[derive(Debug, PartialEq, Eq)]
pub enum PopResult<T> {
    /// An item was dequeued
    Item(T),
    /// The deadline passed with the queue still empty
    Timeout,
    /// The queue is closed and fully drained
    Closed,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer multi-consumer queue
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Push without waiting; returns false when the queue is full or closed
    pub fn try_push(&self, item: T) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        if inner.closed || inner.items.len() >= self.capacity {
            return false;
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Push, waiting up to `timeout` for space; returns false on timeout or close
    pub fn push_timeout(&self, item: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        loop {
            if inner.closed {
                return false;
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                self.not_empty.notify_one();
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.not_full.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => inner = guard,
                Err(_) => return false,
            }
        }
    }

    /// Push, waiting indefinitely for space; returns false only if closed
    pub fn push(&self, item: T) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        loop {
            if inner.closed {
                return false;
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                self.not_empty.notify_one();
                return true;
            }
            match self.not_full.wait(inner) {
                Ok(guard) => inner = guard,
                Err(_) => return false,
            }
        }
    }

    /// Pop, waiting until `deadline` for an item.
    ///
    /// A closed queue keeps yielding items until drained, then reports
    /// `Closed`.
    pub fn pop_deadline(&self, deadline: Instant) -> PopResult<T> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return PopResult::Closed,
        };
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return PopResult::Item(item);
            }
            if inner.closed {
                return PopResult::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return PopResult::Timeout;
            }
            match self.not_empty.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => inner = guard,
                Err(_) => return PopResult::Closed,
            }
        }
    }

    /// Pop, waiting up to `timeout` for an item
    pub fn pop_timeout(&self, timeout: Duration) -> PopResult<T> {
        self.pop_deadline(Instant::now() + timeout)
    }

    /// Close the queue: pushes fail, poppers drain remaining items and
    /// then observe `Closed`. All waiters are woken.
    pub fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Reopen a closed queue so a stopped pipeline can start again
    pub fn reopen(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.closed = false;
        }
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|inner| inner.closed).unwrap_or(true)
    }

    /// Current number of queued items
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.items.len()).unwrap_or(0)
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items the queue holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
