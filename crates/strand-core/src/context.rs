//! One-shot execution contexts: a dedicated stack plus saved machine state
//! that can be entered and exited like a function-call boundary.
//!
//! The platform-specific switching strategies (hand-written trampolines per
//! architecture, fiber-compatible stacks on Windows) live inside
//! `corosensei`; everything above this module speaks only
//! create / switch / destroy and never learns which backend is active.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult};

use crate::Error;

/// The yielder handed to a context's entry function. Suspending through it
/// is the only way control moves back to the thread that entered the
/// context.
pub(crate) type RawYielder = corosensei::Yielder<(), ()>;

/// Outcome of one entry into an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// The context suspended through its yielder and can be entered again.
    Yielded,
    /// The entry function returned; the context is spent.
    Returned,
}

/// A dedicated stack with an entry trampoline.
///
/// The context is pinned to the thread that created it; it is `!Send` by
/// construction and the caller above it (the carrier) enforces
/// owning-thread access. Switching never allocates and never fails under
/// correct usage; running off the end of the stack is a programmer error,
/// not a recoverable condition.
pub struct ExecutionContext {
    inner: Coroutine<(), (), (), DefaultStack>,
}

impl ExecutionContext {
    /// Allocate a stack of `stack_size` bytes and arm the trampoline so
    /// that the first [`switch_in`](Self::switch_in) invokes `entry`.
    ///
    /// Stack allocation failure is fatal: the fatal hook fires and the
    /// calling thread panics.
    pub fn new<F>(stack_size: usize, entry: F) -> Self
    where
        F: FnOnce(&RawYielder) + 'static,
    {
        let stack = match DefaultStack::new(stack_size) {
            Ok(stack) => stack,
            Err(source) => crate::fatal(Error::StackAllocation {
                size: stack_size,
                source,
            }),
        };

        Self {
            inner: Coroutine::with_stack(stack, move |yielder, ()| entry(yielder)),
        }
    }

    /// Save the caller's state and restore the context's, entering it at
    /// the trampoline (first call) or at its last suspension point.
    pub fn switch_in(&mut self) -> Switch {
        match self.inner.resume(()) {
            CoroutineResult::Yield(()) => Switch::Yielded,
            CoroutineResult::Return(()) => Switch::Returned,
        }
    }

    /// Whether the entry function has run to completion.
    pub fn returned(&self) -> bool {
        self.inner.done()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("returned", &self.returned())
            .finish()
    }
}

// Dropping a suspended context unwinds its stack before the stack memory
// is released; in-flight locals on that stack run their destructors.
