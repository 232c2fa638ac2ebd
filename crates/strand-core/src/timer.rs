//! Ordered queue of pending one-shot and repeating callbacks.
//!
//! Entries are keyed by absolute expiry time in a `BTreeMap`; colliding
//! timestamps are perturbed forward by the smallest representable unit so
//! every entry keeps a unique key and firing order stays strict.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::Job;

/// Opaque cancellation token for a pending timer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// Get the numeric token value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A repeating callback; cloned back into the queue on every fire.
pub type IntervalJob = Arc<dyn Fn() + Send + Sync + 'static>;

enum TimerJob {
    Once(Option<Job>),
    Every(IntervalJob),
}

struct TimerEntry {
    id: TimerId,
    period: Duration,
    job: TimerJob,
}

/// Pending timers ordered by absolute expiry time.
///
/// The ordered store sits under a single lock; timer traffic is rare next
/// to work-queue traffic, so contention stays negligible. Fired callbacks
/// are handed to the caller's sink for queueing, never executed under the
/// lock or on the timer structure's own stack.
pub struct TimerQueue {
    entries: Mutex<BTreeMap<Instant, TimerEntry>>,
    next_id: AtomicU64,
}

impl TimerQueue {
    /// Create an empty timer queue.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert at `at`, nudging the key forward 1ns at a time until unique.
    fn insert_at(
        entries: &mut BTreeMap<Instant, TimerEntry>,
        mut at: Instant,
        entry: TimerEntry,
    ) {
        while entries.contains_key(&at) {
            at += Duration::from_nanos(1);
        }
        entries.insert(at, entry);
    }

    /// Schedule `job` once, `delay` from now. Returns the cancellation id.
    pub fn set_timeout(&self, delay: Duration, job: Job) -> TimerId {
        let id = self.allocate_id();
        let mut entries = self.entries.lock();
        Self::insert_at(
            &mut entries,
            Instant::now() + delay,
            TimerEntry {
                id,
                period: delay,
                job: TimerJob::Once(Some(job)),
            },
        );
        id
    }

    /// Schedule `job` every `period`, first firing one period from now.
    pub fn set_interval(&self, period: Duration, job: IntervalJob) -> TimerId {
        let id = self.allocate_id();
        let mut entries = self.entries.lock();
        Self::insert_at(
            &mut entries,
            Instant::now() + period,
            TimerEntry {
                id,
                period,
                job: TimerJob::Every(job),
            },
        );
        id
    }

    /// Remove a pending timer. Returns `false` when the id is unknown —
    /// including the race where the timer already fired; "already fired"
    /// silently wins.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.id != id);
        entries.len() != before
    }

    /// Pop every entry expiring at or before `now` and hand its callback
    /// to `sink` in expiry order.
    ///
    /// Repeating entries are reinserted at `now + period` — rescheduling
    /// from the fire time, not the old expiry, so a slow callback cannot
    /// cause runaway catch-up fires. Returns how many callbacks fired.
    pub fn fire_into(&self, now: Instant, mut sink: impl FnMut(Job)) -> usize {
        let mut entries = self.entries.lock();
        let mut fired = 0;

        loop {
            match entries.keys().next() {
                Some(&key) if key <= now => {}
                _ => break,
            }
            let (_, mut entry) = entries.pop_first().expect("entry observed above");
            match &mut entry.job {
                TimerJob::Once(job) => {
                    if let Some(job) = job.take() {
                        sink(job);
                        fired += 1;
                    }
                }
                TimerJob::Every(job) => {
                    let run = job.clone();
                    sink(Box::new(move || run()));
                    fired += 1;
                    let at = now + entry.period;
                    Self::insert_at(&mut entries, at, entry);
                }
            }
        }

        fired
    }

    /// Expiry time of the earliest pending entry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.lock().keys().next().copied()
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every pending entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.len())
            .finish()
    }
}
