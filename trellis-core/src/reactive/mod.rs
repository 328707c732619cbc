//! Reactive Core
//!
//! This module implements the dependency-tracking data layer: deps,
//! watchers, observed data structures, and the batching scheduler.
//!
//! # Concepts
//!
//! ## Deps
//!
//! A Dep is the subject half of the observer pattern: it holds the
//! watchers subscribed to one reactive unit. Every field cell owns a dep;
//! every observed map and list additionally owns a "shape" dep notified on
//! structural changes (field add/remove, list size change).
//!
//! ## Watchers
//!
//! A Watcher wraps an evaluator and re-runs it when any dep it read during
//! its last evaluation notifies. Render watchers drive patching, computed
//! watchers cache lazily, user watchers invoke a callback with the new and
//! old value.
//!
//! ## Observed data
//!
//! Plain data is walked once by `observe` and wrapped in reactive cells.
//! Reads register the active watcher; writes short-circuit on loosely
//! equal scalars and notify otherwise. List mutators notify the list's
//! shape dep and observe newly inserted elements.
//!
//! ## Scheduler
//!
//! Watcher invalidations are deduplicated by identity and batched into a
//! single flush on the next turn of the explicit tick queue.
//!
//! # Implementation Notes
//!
//! Dependency detection uses a thread-local stack of active watchers.
//! When a cell is read, the top of the stack (if any) is registered as a
//! subscriber. The stack discipline makes nested evaluation work: a
//! computed property read during a render suspends the render watcher's
//! registration until the computed evaluation completes.

mod dep;
mod observer;
mod scheduler;
mod watcher;

pub use dep::{current_target, is_tracking, push_target, Dep, TargetGuard};
pub use observer::{del, observe, set, ObservedList, ObservedObject, ObservedValue, ReactiveCell};
pub use scheduler::{has_pending_ticks, next_tick, queue_watcher, tick};
pub use watcher::{Getter, WatchCallback, Watcher, WatcherOptions};
