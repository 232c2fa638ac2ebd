//! Shared work queues and worker parking.

use std::time::Duration;

use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};

use crate::Job;

/// Lock-free multi-producer multi-consumer queue of callbacks.
///
/// FIFO is guaranteed per producer; consumers may interleave batches from
/// different producers.
pub struct WorkQueue {
    inner: Injector<Job>,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Injector::new(),
        }
    }

    /// Push a callback. Never blocks, never rejects.
    pub fn push(&self, job: Job) {
        self.inner.push(job);
    }

    /// Pop one callback, retrying through concurrent interference.
    pub fn pop(&self) -> Option<Job> {
        loop {
            match self.inner.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Approximate number of queued callbacks.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the queue is empty (approximate under concurrency).
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every queued callback.
    pub fn clear(&self) {
        while self.pop().is_some() {}
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue").field("len", &self.len()).finish()
    }
}

/// Condvar-based parking spot for worker threads.
///
/// Producers notify after pushing; consumers park with a bounded wait so a
/// notification that lands between their empty-check and the park costs at
/// most one timeout, never a lost wakeup.
pub struct WakeSignal {
    lock: Mutex<()>,
    cond: Condvar,
}

impl WakeSignal {
    /// Create a signal with no waiters.
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Wake one parked waiter, if any.
    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    /// Wake every parked waiter.
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Park the calling thread until notified or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        self.cond.wait_for(&mut guard, timeout);
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WakeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WakeSignal")
    }
}
