//! Coroutines: callbacks bound to their own execution stack.
//!
//! A coroutine is pinned to the carrier thread that created it; only the
//! [`CoroutineHandle`] crosses threads. The callback slot is refilled on
//! reuse, so a finished coroutine parked in its carrier's free list keeps
//! its stack and skips reallocation on the next bind.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::context::{ExecutionContext, RawYielder, Switch};
use crate::queue::WakeSignal;
use crate::{Error, Job};

/// A continuation run exactly once on the carrier thread after a suspend
/// boundary, typically to issue the operation whose completion will
/// activate the coroutine again.
pub type Continuation = Box<dyn FnOnce() + 'static>;

/// Lifecycle of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutionState {
    /// Running, or eligible to run in the current dispatch pass.
    Active = 0,
    /// Cooperatively yielded; waiting for an external activation.
    Suspended = 1,
    /// Activated while suspended; eligible on the next dispatch pass.
    Resumable = 2,
    /// The callback returned; the coroutine is retired or awaiting reuse.
    Finished = 3,
}

impl ExecutionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ExecutionState::Active,
            1 => ExecutionState::Suspended,
            2 => ExecutionState::Resumable,
            _ => ExecutionState::Finished,
        }
    }
}

/// State shared between a coroutine, its handles, and its carrier.
pub(crate) struct Shared {
    state: AtomicU8,
    owner: ThreadId,
    wake: Arc<WakeSignal>,
}

impl Shared {
    fn new(wake: Arc<WakeSignal>) -> Self {
        Self {
            state: AtomicU8::new(ExecutionState::Active as u8),
            owner: thread::current().id(),
            wake,
        }
    }

    pub(crate) fn state(&self) -> ExecutionState {
        ExecutionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Checked transition: the coroutine must currently be in `from`.
    fn transition(&self, from: ExecutionState, to: ExecutionState) {
        if let Err(actual) = self.state.compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            crate::fatal(Error::InvalidTransition {
                from: ExecutionState::from_u8(actual),
                to,
            });
        }
    }

    /// Suspended -> Resumable, from any thread. Returns whether the flip
    /// happened.
    fn try_activate(&self) -> bool {
        self.state
            .compare_exchange(
                ExecutionState::Suspended as u8,
                ExecutionState::Resumable as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Cloneable, thread-safe observer of one coroutine.
///
/// This is the only piece of a coroutine that leaves its owning thread;
/// completion callbacks hold it and call [`activate`](Self::activate) when
/// the awaited work is done.
#[derive(Clone)]
pub struct CoroutineHandle {
    shared: Arc<Shared>,
}

impl CoroutineHandle {
    /// Flip a suspended coroutine to resumable.
    ///
    /// Callable from any thread; a cross-thread activation also wakes the
    /// owning carrier's worker so the next dispatch pass happens promptly.
    /// Returns `false` if the coroutine was not suspended.
    pub fn activate(&self) -> bool {
        if !self.shared.try_activate() {
            return false;
        }
        if thread::current().id() != self.shared.owner {
            self.shared.wake.notify_one();
        }
        true
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutionState {
        self.shared.state()
    }
}

impl std::fmt::Debug for CoroutineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutineHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// The frame of the coroutine currently running on this thread.
struct ActiveFrame {
    yielder: *const RawYielder,
    shared: Arc<Shared>,
    on_suspend: Rc<RefCell<Option<Continuation>>>,
}

impl Clone for ActiveFrame {
    fn clone(&self) -> Self {
        Self {
            yielder: self.yielder,
            shared: self.shared.clone(),
            on_suspend: self.on_suspend.clone(),
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<ActiveFrame>> = const { RefCell::new(None) };
}

fn current_frame() -> Option<ActiveFrame> {
    CURRENT.with(|c| c.borrow().clone())
}

fn install_frame(frame: ActiveFrame) {
    CURRENT.with(|c| *c.borrow_mut() = Some(frame));
}

pub(crate) fn clear_frame() {
    CURRENT.with(|c| *c.borrow_mut() = None);
}

/// Handle of the coroutine currently running on this thread, if any.
pub fn current() -> Option<CoroutineHandle> {
    current_frame().map(|f| CoroutineHandle { shared: f.shared })
}

/// Suspend the running coroutine, optionally storing a continuation that
/// the carrier runs exactly once after the switch back.
///
/// Control returns here after some thread calls
/// [`CoroutineHandle::activate`] and the owning carrier dispatches again.
/// Calling this outside a coroutine is fatal.
pub fn deactivate(continuation: Option<Continuation>) {
    let Some(frame) = current_frame() else {
        crate::fatal(Error::DeactivateOutsideCoroutine);
    };
    frame
        .shared
        .transition(ExecutionState::Active, ExecutionState::Suspended);
    *frame.on_suspend.borrow_mut() = continuation;

    // Valid for the whole suspension: the yielder lives on the carrier's
    // side of the switch and outlives every entry into this context.
    let yielder = unsafe { &*frame.yielder };
    yielder.suspend(());

    // Reactivated; this coroutine is the running one again.
    install_frame(frame);
}

/// A callback bound to one execution context, owned by a carrier.
pub struct Coroutine {
    shared: Arc<Shared>,
    job: Rc<RefCell<Option<Job>>>,
    on_suspend: Rc<RefCell<Option<Continuation>>>,
    context: ExecutionContext,
}

impl Coroutine {
    /// Build a coroutine around `job` with a freshly allocated stack.
    ///
    /// The entry function loops: run the bound callback, mark finished,
    /// suspend. A later [`rebind`](Self::rebind) installs a new callback
    /// and the same stack goes around again.
    pub(crate) fn new(job: Job, stack_size: usize, wake: Arc<WakeSignal>) -> Self {
        let shared = Arc::new(Shared::new(wake));
        let job_slot = Rc::new(RefCell::new(Some(job)));
        let on_suspend: Rc<RefCell<Option<Continuation>>> = Rc::new(RefCell::new(None));

        let entry_shared = shared.clone();
        let entry_job = job_slot.clone();
        let entry_cont = on_suspend.clone();
        let context = ExecutionContext::new(stack_size, move |yielder| loop {
            install_frame(ActiveFrame {
                yielder: yielder as *const RawYielder,
                shared: entry_shared.clone(),
                on_suspend: entry_cont.clone(),
            });
            let job = entry_job.borrow_mut().take();
            let Some(job) = job else { break };
            job();
            entry_shared.transition(ExecutionState::Active, ExecutionState::Finished);
            yielder.suspend(());
        });

        Self {
            shared,
            job: job_slot,
            on_suspend,
            context,
        }
    }

    /// Install a new callback into a finished coroutine, making it
    /// eligible for the next dispatch pass. Skips stack allocation.
    pub(crate) fn rebind(&mut self, job: Job) {
        *self.job.borrow_mut() = Some(job);
        self.shared
            .transition(ExecutionState::Finished, ExecutionState::Resumable);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutionState {
        self.shared.state()
    }

    /// A thread-safe observer handle.
    pub fn handle(&self) -> CoroutineHandle {
        CoroutineHandle {
            shared: self.shared.clone(),
        }
    }

    /// Whether this coroutine is the one currently running on this thread.
    pub fn is_running(&self) -> bool {
        current_frame().is_some_and(|f| Arc::ptr_eq(&f.shared, &self.shared))
    }

    /// Resume execution. Owning thread only.
    ///
    /// No-op returning [`ExecutionState::Active`] when called on the
    /// already-running coroutine; fatal on a finished one.
    pub fn resume(&mut self) -> ExecutionState {
        let caller = thread::current().id();
        if caller != self.shared.owner {
            crate::fatal(Error::WrongThread {
                owner: self.shared.owner,
                caller,
            });
        }
        if self.is_running() {
            return ExecutionState::Active;
        }
        if self.state() == ExecutionState::Finished {
            crate::fatal(Error::ResumeFinished);
        }
        self.execute()
    }

    /// One execute attempt, as made by the carrier's dispatch pass.
    ///
    /// Suspended coroutines are reported without switching; resumable ones
    /// flip to active and get the switch. After control returns, the
    /// pending on-suspend continuation (if any) runs exactly once.
    pub fn execute(&mut self) -> ExecutionState {
        match self.state() {
            ExecutionState::Suspended => return ExecutionState::Suspended,
            ExecutionState::Resumable => self
                .shared
                .transition(ExecutionState::Resumable, ExecutionState::Active),
            ExecutionState::Active => {}
            ExecutionState::Finished => crate::fatal(Error::ResumeFinished),
        }

        let switch = self.context.switch_in();
        clear_frame();

        if let Some(continuation) = self.on_suspend.borrow_mut().take() {
            continuation();
        }

        match switch {
            Switch::Returned => ExecutionState::Finished,
            Switch::Yielded => self.state(),
        }
    }
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("state", &self.state())
            .finish()
    }
}
