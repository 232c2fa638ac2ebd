//! Strand Core Runtime
//!
//! This crate provides the user-space concurrency engine including:
//! - Stackful coroutine contexts (platform switching behind one interface)
//! - Per-thread coroutine carriers with cooperative round-robin dispatch
//! - A multi-class thread-pool scheduler (Sync / Async / Timeout workers)
//! - An ordered one-shot/repeating timer queue
//!
//! Callbacks submitted through the [`Scheduler`] land in the work queue of
//! their difficulty class and are drained by that class's workers. Async
//! callbacks run inside coroutines and may suspend at any point with
//! [`coroutine::deactivate`] and be woken from any thread with
//! [`coroutine::CoroutineHandle::activate`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod carrier;
pub mod context;
pub mod coroutine;
pub mod global;
pub mod policy;
pub mod queue;
pub mod scheduler;
pub mod timer;
pub mod trace;

pub use carrier::Carrier;
pub use coroutine::{Coroutine, CoroutineHandle, ExecutionState};
pub use global::global;
pub use policy::{ClassPolicy, Difficulty, Policy};
pub use scheduler::{Scheduler, SchedulerStats};
pub use timer::{TimerId, TimerQueue};
pub use trace::{TraceEvent, TraceHook};

use once_cell::sync::OnceCell;

/// A unit of work submitted to the engine.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Engine invariant violations.
///
/// Every variant is a programming error, not a runtime condition: the
/// engine reports it through the fatal hook and panics. Recoverable
/// situations (scheduler not accepting work, timer already fired) are
/// expressed as `bool` returns on the respective entry points instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Allocating a coroutine stack failed. There is no safe continuation
    /// without a runnable stack.
    #[error("stack allocation of {size} bytes failed: {source}")]
    StackAllocation {
        /// Requested stack size in bytes.
        size: usize,
        /// The underlying allocation failure.
        source: std::io::Error,
    },

    /// Carrier or coroutine state touched from a thread that does not own
    /// it. Context switches are not cross-thread safe.
    #[error("state owned by thread {owner:?} touched from thread {caller:?}")]
    WrongThread {
        /// The owning thread.
        owner: std::thread::ThreadId,
        /// The offending caller.
        caller: std::thread::ThreadId,
    },

    /// `resume` was called on a coroutine that already finished.
    #[error("resume called on a finished coroutine")]
    ResumeFinished,

    /// A state change that the coroutine state machine does not allow.
    #[error("invalid coroutine transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the coroutine was actually in.
        from: ExecutionState,
        /// State the caller tried to move it to.
        to: ExecutionState,
    },

    /// `deactivate` was called outside of a running coroutine.
    #[error("deactivate called outside a running coroutine")]
    DeactivateOutsideCoroutine,
}

/// Hook invoked with the error before the engine panics on a fatal
/// invariant violation.
pub type FatalHook = fn(&Error);

static FATAL_HOOK: OnceCell<FatalHook> = OnceCell::new();

/// Install the process-wide fatal-error reporting hook.
///
/// The hook runs once per violation, before the panic that tears the
/// offending thread down. Embedders that must not unwind can abort from
/// the hook. Returns `false` if a hook was already installed.
pub fn set_fatal_hook(hook: FatalHook) -> bool {
    FATAL_HOOK.set(hook).is_ok()
}

/// Report an invariant violation and panic.
pub(crate) fn fatal(err: Error) -> ! {
    if let Some(hook) = FATAL_HOOK.get() {
        hook(&err);
    }
    panic!("fatal: {err}");
}
