//! Update Scheduler
//!
//! Batches synchronous bursts of watcher invalidation into a single flush
//! per turn. The browser's microtask queue becomes an explicit thread-local
//! callback queue: `next_tick` enqueues work for the next turn and `tick`
//! drains one turn. Hosts (and tests) drive `tick` after a burst of state
//! mutations; the framework schedules at most one flush per turn.
//!
//! # Guarantees
//!
//! - Multiple synchronous mutations invalidating the same watcher within
//!   one turn cause exactly one re-run; mutations spanning two turns cause
//!   two.
//! - Within one flush, watchers run in enqueue order. (A production-grade
//!   scheduler would sort by watcher creation id to guarantee
//!   parent-before-child updates; that ordering is a known gap here.)
//! - A watcher enqueued during a flush runs in the *next* flush, not the
//!   current one.
//! - A panicking watcher run is isolated: the failure is logged and the
//!   rest of the flush proceeds.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use super::watcher::Watcher;

thread_local! {
    /// Callbacks queued for the next turn.
    static TICK_CALLBACKS: RefCell<Vec<Box<dyn FnOnce()>>> = RefCell::new(Vec::new());

    /// Watchers awaiting the next flush, in enqueue order.
    static QUEUE: RefCell<Vec<Arc<Watcher>>> = const { RefCell::new(Vec::new()) };

    /// Identity set deduplicating the flush queue.
    static PENDING: RefCell<HashSet<u64>> = RefCell::new(HashSet::new());

    /// Whether a flush callback is already scheduled for the next turn.
    static FLUSH_SCHEDULED: Cell<bool> = const { Cell::new(false) };
}

/// Enqueue a watcher for the next flush. Idempotent per watcher identity
/// within one turn; schedules exactly one flush callback per turn.
pub fn queue_watcher(watcher: Arc<Watcher>) {
    let is_new = PENDING.with(|pending| pending.borrow_mut().insert(watcher.id()));
    if !is_new {
        return;
    }
    QUEUE.with(|queue| queue.borrow_mut().push(watcher));

    let scheduled = FLUSH_SCHEDULED.with(|flag| flag.replace(true));
    if !scheduled {
        next_tick(flush_queue);
    }
}

/// Run every queued watcher in enqueue order, isolating failures.
///
/// The queue and pending set are taken up front, so watchers re-enqueued
/// by mutations during the flush land in a fresh queue and a fresh flush
/// is scheduled for the next turn.
fn flush_queue() {
    let watchers: Vec<Arc<Watcher>> = QUEUE.with(|queue| queue.borrow_mut().drain(..).collect());
    PENDING.with(|pending| pending.borrow_mut().clear());
    FLUSH_SCHEDULED.with(|flag| flag.set(false));

    debug!(count = watchers.len(), "flushing watcher queue");
    for watcher in watchers {
        let result = catch_unwind(AssertUnwindSafe(|| watcher.run()));
        if result.is_err() {
            error!(watcher_id = watcher.id(), "watcher run panicked during flush");
        }
    }
}

/// Queue a callback for the next turn.
pub fn next_tick<F: FnOnce() + 'static>(cb: F) {
    TICK_CALLBACKS.with(|callbacks| callbacks.borrow_mut().push(Box::new(cb)));
}

/// Drain one turn of the tick queue. Callbacks queued while draining run
/// on the following turn.
pub fn tick() {
    let callbacks: Vec<Box<dyn FnOnce()>> =
        TICK_CALLBACKS.with(|callbacks| callbacks.borrow_mut().drain(..).collect());
    for cb in callbacks {
        cb();
    }
}

/// Whether any callbacks are waiting for the next turn.
pub fn has_pending_ticks() -> bool {
    TICK_CALLBACKS.with(|callbacks| !callbacks.borrow().is_empty())
}
