//! Worker thread slots and the thread-local fast-bypass registration.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::queue::ArrayQueue;

use crate::policy::Difficulty;
use crate::queue::WakeSignal;
use crate::Job;

/// State one worker shares with the scheduler and with producers on its
/// own thread.
pub(crate) struct SlotShared {
    /// Class this slot serves.
    pub class: Difficulty,
    /// Slot index within the class.
    pub index: usize,
    /// Identity of the scheduler that created the slot. The bypass fast
    /// path matches on it so a thread serving one scheduler never swallows
    /// submissions aimed at another.
    pub tag: usize,
    /// Thread-private queue skipping the shared one when producer and
    /// consumer are the same thread. Single-consumer by ownership.
    pub bypass: ArrayQueue<Job>,
    /// Where this slot's worker parks.
    pub signal: Arc<WakeSignal>,
    live: AtomicBool,
}

impl SlotShared {
    pub fn new(
        class: Difficulty,
        index: usize,
        tag: usize,
        bypass_capacity: usize,
        signal: Arc<WakeSignal>,
    ) -> Self {
        Self {
            class,
            index,
            tag,
            bypass: ArrayQueue::new(bypass_capacity.max(1)),
            signal,
            live: AtomicBool::new(true),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }
}

/// A scheduler-owned worker slot: either a spawned OS thread or a daemon
/// marker meaning the thread that called `start` pumps it manually.
pub(crate) struct ThreadSlot {
    pub shared: Arc<SlotShared>,
    pub handle: Option<JoinHandle<()>>,
}

impl ThreadSlot {
    pub fn is_daemon(&self) -> bool {
        self.handle.is_none()
    }
}

thread_local! {
    /// Slots owned by the current thread, one per class at most. Worker
    /// threads own exactly one; a daemon embedding owns up to three.
    static OWNED: RefCell<[Option<Arc<SlotShared>>; 3]> = const { RefCell::new([None, None, None]) };
}

/// Mark the calling thread as the owner of `slot` for bypass pushes.
pub(crate) fn adopt(slot: Arc<SlotShared>) {
    let index = slot.class.index();
    OWNED.with(|owned| owned.borrow_mut()[index] = Some(slot));
}

/// Drop the calling thread's ownership of its `class` slot.
pub(crate) fn disown(class: Difficulty) {
    OWNED.with(|owned| owned.borrow_mut()[class.index()] = None);
}

/// The live slot of `class` owned by the calling thread and belonging to
/// the scheduler identified by `tag`, if any. Slots retired by a stop are
/// swept out lazily here.
pub(crate) fn owned(class: Difficulty, tag: usize) -> Option<Arc<SlotShared>> {
    OWNED.with(|owned| {
        let mut owned = owned.borrow_mut();
        let entry = &mut owned[class.index()];
        if entry.as_ref().is_some_and(|slot| !slot.is_live()) {
            *entry = None;
            return None;
        }
        entry.as_ref().filter(|slot| slot.tag == tag).cloned()
    })
}
