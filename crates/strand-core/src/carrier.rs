//! Per-thread ownership and cooperative multiplexing of coroutines.
//!
//! The carrier's master context is the owning thread's own call stack:
//! every switch into a coroutine implicitly saves it, and every suspend or
//! return restores it.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::coroutine::{Coroutine, CoroutineHandle, ExecutionState};
use crate::queue::WakeSignal;
use crate::{Error, Job};

/// Owns a bounded set of coroutines for exactly one OS thread and
/// multiplexes them cooperatively on that thread's call stack.
///
/// At most one owned coroutine runs at any instant. The active list and
/// free list are touched only by the owning thread; the carrier is `!Send`
/// and additionally asserts the owning thread on every entry point.
pub struct Carrier {
    owner: ThreadId,
    stack_size: usize,
    cache_bound: usize,
    wake: Arc<WakeSignal>,
    active: Vec<Coroutine>,
    free: Vec<Coroutine>,
    running: RefCell<Option<CoroutineHandle>>,
    recycled: u64,
}

impl Carrier {
    /// Create a carrier owned by the calling thread.
    ///
    /// `stack_size` is used for every new execution context;
    /// `cache_bound` caps the free list of finished-but-retained
    /// coroutines; `wake` is the signal cross-thread activations notify.
    pub fn new(stack_size: usize, cache_bound: usize, wake: Arc<WakeSignal>) -> Self {
        Self {
            owner: thread::current().id(),
            stack_size,
            cache_bound,
            wake,
            active: Vec::new(),
            free: Vec::new(),
            running: RefCell::new(None),
            recycled: 0,
        }
    }

    fn assert_owner(&self) {
        let caller = thread::current().id();
        if caller != self.owner {
            crate::fatal(Error::WrongThread {
                owner: self.owner,
                caller,
            });
        }
    }

    /// Bind `job` to a coroutine and add it to the active list.
    ///
    /// A finished instance from the free list is reused when available,
    /// skipping stack allocation; otherwise a fresh execution context is
    /// created. Returns the new coroutine's observer handle.
    pub fn pop(&mut self, job: Job) -> CoroutineHandle {
        self.assert_owner();
        let coroutine = match self.free.pop() {
            Some(mut recycled) => {
                recycled.rebind(job);
                self.recycled += 1;
                recycled
            }
            None => Coroutine::new(job, self.stack_size, self.wake.clone()),
        };
        let handle = coroutine.handle();
        self.active.push(coroutine);
        handle
    }

    /// One scheduling pass in stable insertion order.
    ///
    /// Suspended entries are skipped; everything active or resumable gets
    /// exactly one execute attempt; newly finished coroutines migrate to
    /// the free list in the same pass (or are destroyed once the cache is
    /// full). Returns whether any coroutine ran.
    pub fn dispatch(&mut self) -> bool {
        self.assert_owner();
        let mut progressed = false;
        let mut index = 0;

        while index < self.active.len() {
            match self.active[index].state() {
                ExecutionState::Suspended => {
                    index += 1;
                }
                ExecutionState::Finished => {
                    // Left over from a previous pass; retire without running.
                    let finished = self.active.remove(index);
                    self.retire(finished);
                }
                ExecutionState::Active | ExecutionState::Resumable => {
                    progressed = true;
                    *self.running.borrow_mut() = Some(self.active[index].handle());
                    let after = self.active[index].execute();
                    *self.running.borrow_mut() = None;

                    if after == ExecutionState::Finished {
                        let finished = self.active.remove(index);
                        self.retire(finished);
                    } else {
                        index += 1;
                    }
                }
            }
        }

        progressed
    }

    /// Park a finished coroutine for reuse, or destroy it (freeing its
    /// stack) once the free list is at its bound.
    fn retire(&mut self, coroutine: Coroutine) {
        if self.free.len() < self.cache_bound {
            self.free.push(coroutine);
        }
        // else: drop — the parked stack is unwound and released
    }

    /// Handle of the coroutine currently running on this carrier.
    pub fn current(&self) -> Option<CoroutineHandle> {
        self.running.borrow().clone()
    }

    /// Number of live (active or suspended) coroutines.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no coroutine is owned by this carrier.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Whether any owned coroutine has been activated and awaits the next
    /// pass. Used by the owning worker to decide whether to park.
    pub fn has_resumable(&self) -> bool {
        self.active
            .iter()
            .any(|c| c.state() == ExecutionState::Resumable)
    }

    /// Number of finished coroutines retained for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// How many binds were served from the free list.
    pub fn recycled(&self) -> u64 {
        self.recycled
    }
}

impl std::fmt::Debug for Carrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Carrier")
            .field("owner", &self.owner)
            .field("active", &self.active.len())
            .field("free", &self.free.len())
            .finish()
    }
}
