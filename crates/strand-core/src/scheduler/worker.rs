//! Worker loops, one flavor per difficulty class.
//!
//! Sync and Timeout workers invoke callbacks directly; Async workers hand
//! them to a thread-pinned carrier and pump it. No worker ever steals from
//! a peer: each class drains only its own shared queue plus the worker's
//! private bypass queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::carrier::Carrier;
use crate::policy::Difficulty;
use crate::trace::TraceEvent;

use super::scheduler::Core;
use super::slot::{self, SlotShared};

fn park(core: &Core, slot: &SlotShared, timeout: Duration) {
    core.trace(TraceEvent::Sleep {
        class: slot.class,
        index: slot.index,
    });
    slot.signal.wait_for(timeout);
    core.trace(TraceEvent::Awake {
        class: slot.class,
        index: slot.index,
    });
}

/// Pop from the private bypass queue first, then the class's shared queue.
fn next_job(core: &Core, slot: &SlotShared) -> Option<crate::Job> {
    slot.bypass.pop().or_else(|| core.queue(slot.class).pop())
}

/// Sync worker: one callback per wake, drain-then-exit on stop.
pub(crate) fn run_sync(core: Arc<Core>, slot: Arc<SlotShared>) {
    slot::adopt(slot.clone());
    core.trace(TraceEvent::Spawn {
        class: slot.class,
        index: slot.index,
    });
    let idle = core.policy().idle_wait;

    loop {
        if core.is_suspended() && slot.is_live() {
            park(&core, &slot, idle);
            continue;
        }
        if let Some(job) = next_job(&core, &slot) {
            core.trace(TraceEvent::Process { class: slot.class });
            job();
            continue;
        }
        if !slot.is_live() {
            break;
        }
        park(&core, &slot, idle);
    }

    core.trace(TraceEvent::Despawn {
        class: slot.class,
        index: slot.index,
    });
    slot::disown(slot.class);
}

/// Timeout worker: fires due timers into the class queue, then behaves
/// like a sync worker with its park bounded by the next deadline.
pub(crate) fn run_timeout(core: Arc<Core>, slot: Arc<SlotShared>) {
    slot::adopt(slot.clone());
    core.trace(TraceEvent::Spawn {
        class: slot.class,
        index: slot.index,
    });
    let idle = core.policy().idle_wait;

    loop {
        if core.is_suspended() && slot.is_live() {
            park(&core, &slot, idle);
            continue;
        }
        core.fire_timers();
        if let Some(job) = next_job(&core, &slot) {
            core.trace(TraceEvent::Process { class: slot.class });
            job();
            continue;
        }
        if !slot.is_live() {
            break;
        }
        let wait = match core.timer_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(idle),
            None => idle,
        };
        if wait.is_zero() {
            continue;
        }
        park(&core, &slot, wait);
    }

    core.trace(TraceEvent::Despawn {
        class: slot.class,
        index: slot.index,
    });
    slot::disown(slot.class);
}

/// Async worker: loads callbacks into its carrier up to capacity, pumps
/// one dispatch pass, and parks only when neither queue nor carrier has
/// anything runnable. Exits as soon as the slot is retired.
pub(crate) fn run_async(core: Arc<Core>, slot: Arc<SlotShared>) {
    slot::adopt(slot.clone());
    core.trace(TraceEvent::Spawn {
        class: slot.class,
        index: slot.index,
    });
    let policy = core.policy();
    let mut carrier = Carrier::new(
        policy.stack_size,
        policy.coroutine_cache,
        slot.signal.clone(),
    );

    loop {
        if !slot.is_live() {
            break;
        }
        if core.is_suspended() {
            park(&core, &slot, policy.idle_wait);
            continue;
        }

        let capacity = policy.max_coroutines.saturating_sub(carrier.len());
        let mut loaded = 0;
        while loaded < capacity {
            let Some(job) = next_job(&core, &slot) else {
                break;
            };
            core.trace(TraceEvent::Process {
                class: Difficulty::Async,
            });
            carrier.pop(job);
            loaded += 1;
        }

        let progressed = carrier.dispatch();

        // Park unless something happened this round or an activation is
        // already waiting for the next pass.
        if !progressed && loaded == 0 && !carrier.has_resumable() {
            park(&core, &slot, policy.idle_wait);
        }
    }

    core.trace(TraceEvent::Despawn {
        class: slot.class,
        index: slot.index,
    });
    slot::disown(slot.class);

    #[cfg(debug_assertions)]
    eprintln!(
        "strand-{}-{} shutting down with {} live coroutines",
        slot.class.name(),
        slot.index,
        carrier.len()
    );
}
