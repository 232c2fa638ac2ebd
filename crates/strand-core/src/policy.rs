//! Scheduler configuration.

use std::time::Duration;

use crate::trace::TraceHook;

/// Difficulty class of a submitted callback, determining which worker
/// group and queue it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Difficulty {
    /// Plain callbacks, invoked directly on a worker.
    Sync,
    /// Coroutine-bound callbacks, multiplexed by a worker's carrier.
    Async,
    /// Callbacks fed by fired timers.
    Timeout,
}

impl Difficulty {
    /// All classes, in queue-index order.
    pub const ALL: [Difficulty; 3] = [Difficulty::Sync, Difficulty::Async, Difficulty::Timeout];

    pub(crate) fn index(self) -> usize {
        match self {
            Difficulty::Sync => 0,
            Difficulty::Async => 1,
            Difficulty::Timeout => 2,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Difficulty::Sync => "sync",
            Difficulty::Async => "async",
            Difficulty::Timeout => "timeout",
        }
    }
}

/// Worker arrangement for one difficulty class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassPolicy {
    /// Spawn this many dedicated OS threads.
    Threads(usize),
    /// No thread: the caller of `start` owns the class and pumps it
    /// through `dispatch` on its own thread.
    Daemon,
}

impl ClassPolicy {
    pub(crate) fn thread_count(self) -> usize {
        match self {
            ClassPolicy::Threads(n) => n,
            ClassPolicy::Daemon => 0,
        }
    }
}

/// Everything the scheduler needs to lay out its workers.
#[derive(Clone)]
pub struct Policy {
    /// Worker arrangement for the Sync class.
    pub sync_workers: ClassPolicy,
    /// Worker arrangement for the Async class.
    pub async_workers: ClassPolicy,
    /// Worker arrangement for the Timeout class.
    pub timeout_workers: ClassPolicy,
    /// Stack size in bytes for every coroutine execution context.
    pub stack_size: usize,
    /// Most coroutines one carrier multiplexes at a time.
    pub max_coroutines: usize,
    /// Finished coroutines a carrier retains for stack reuse.
    pub coroutine_cache: usize,
    /// Capacity of each worker's private fast-bypass queue.
    pub bypass_capacity: usize,
    /// Longest a worker parks before rechecking its queues.
    pub idle_wait: Duration,
    /// Observer for per-thread lifecycle events.
    pub trace: Option<TraceHook>,
}

impl Policy {
    /// Policy running every class on the caller's own thread; work is
    /// pumped manually through `dispatch`. For single-threaded embedding.
    pub fn daemon() -> Self {
        Self {
            sync_workers: ClassPolicy::Daemon,
            async_workers: ClassPolicy::Daemon,
            timeout_workers: ClassPolicy::Daemon,
            ..Self::default()
        }
    }

    pub(crate) fn class(&self, difficulty: Difficulty) -> ClassPolicy {
        match difficulty {
            Difficulty::Sync => self.sync_workers,
            Difficulty::Async => self.async_workers,
            Difficulty::Timeout => self.timeout_workers,
        }
    }

    pub(crate) fn has_daemon(&self) -> bool {
        Difficulty::ALL
            .iter()
            .any(|&d| self.class(d) == ClassPolicy::Daemon)
    }
}

impl Default for Policy {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            sync_workers: ClassPolicy::Threads(cpus),
            async_workers: ClassPolicy::Threads((cpus / 2).max(1)),
            timeout_workers: ClassPolicy::Threads(1),
            stack_size: 128 * 1024,
            max_coroutines: 16,
            coroutine_cache: 8,
            bypass_capacity: 32,
            idle_wait: Duration::from_millis(10),
            trace: None,
        }
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("sync_workers", &self.sync_workers)
            .field("async_workers", &self.async_workers)
            .field("timeout_workers", &self.timeout_workers)
            .field("stack_size", &self.stack_size)
            .field("max_coroutines", &self.max_coroutines)
            .field("coroutine_cache", &self.coroutine_cache)
            .field("bypass_capacity", &self.bypass_capacity)
            .field("idle_wait", &self.idle_wait)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}
