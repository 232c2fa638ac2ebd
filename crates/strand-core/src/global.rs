//! The conventional process-wide scheduler instance.
//!
//! Explicit [`Scheduler`] values are the primary API; this default exists
//! for call sites that would otherwise thread one context object through
//! an entire engine.

use once_cell::sync::Lazy;

use crate::scheduler::Scheduler;

static GLOBAL: Lazy<Scheduler> = Lazy::new(Scheduler::new);

/// The process-wide default scheduler. Created stopped; the embedder
/// decides when to `start` it and with which policy.
pub fn global() -> &'static Scheduler {
    &GLOBAL
}
