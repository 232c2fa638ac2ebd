//! Lifecycle observability for tooling.

use std::sync::Arc;

use crate::policy::Difficulty;

/// Per-thread lifecycle events delivered to the trace hook.
///
/// Events fire on the thread they describe; hooks must be cheap and must
/// not call back into the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// A worker thread came up.
    Spawn {
        /// Class the worker serves.
        class: Difficulty,
        /// Slot index within the class.
        index: usize,
    },
    /// A worker thread exited its loop.
    Despawn {
        /// Class the worker served.
        class: Difficulty,
        /// Slot index within the class.
        index: usize,
    },
    /// A callback landed in a queue of this class.
    Enqueue {
        /// Class whose queue received the callback.
        class: Difficulty,
    },
    /// A worker picked up a callback for execution.
    Process {
        /// Class of the executing worker.
        class: Difficulty,
    },
    /// A worker parked waiting for work.
    Sleep {
        /// Class of the parking worker.
        class: Difficulty,
        /// Slot index within the class.
        index: usize,
    },
    /// A parked worker woke up.
    Awake {
        /// Class of the woken worker.
        class: Difficulty,
        /// Slot index within the class.
        index: usize,
    },
}

/// Observer invoked with every [`TraceEvent`].
pub type TraceHook = Arc<dyn Fn(TraceEvent) + Send + Sync + 'static>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_hook_receives_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let hook: TraceHook = Arc::new(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        hook(TraceEvent::Spawn {
            class: Difficulty::Sync,
            index: 0,
        });
        hook(TraceEvent::Enqueue {
            class: Difficulty::Async,
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
