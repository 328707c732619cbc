//! Dependency Subject (Dep) and the Active-Watcher Stack
//!
//! A `Dep` is the subject half of the observer pattern: it holds the set of
//! watchers subscribed to one reactive unit (a field cell, or an observed
//! collection's shape). Reading through a cell while a watcher is active
//! registers the watcher here; writing notifies every subscriber.
//!
//! # The target stack
//!
//! At most one watcher is "active" (targetable by dependency registration)
//! at any instant. Activation is stack-disciplined push/pop around an
//! evaluation, so nested evaluation (a computed property read during a
//! render) suspends the outer watcher's registration and resumes it when
//! the inner one completes. The stack is thread-local and guarded by an
//! RAII type so it stays balanced even if an evaluation panics.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use super::watcher::Watcher;

/// Counter for generating unique dep IDs.
static DEP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// The active-watcher stack. The top entry receives dependency
    /// registrations from every reactive read on this thread.
    static TARGET_STACK: RefCell<Vec<Arc<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// The subject half of the observer pattern.
///
/// Subscribers are held weakly: a watcher torn down elsewhere simply drops
/// out of the list the next time it is touched.
pub struct Dep {
    id: u64,

    /// Subscribed watchers, each present at most once (keyed by watcher id).
    subs: RwLock<Vec<(u64, Weak<Watcher>)>>,
}

impl Dep {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: DEP_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            subs: RwLock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register the currently active watcher (if any) as a subscriber.
    ///
    /// Registration is bidirectional: the watcher records this dep and the
    /// dep records the watcher, both deduplicated by id.
    pub fn depend(self: &Arc<Self>) {
        if let Some(watcher) = current_target() {
            watcher.add_dep(Arc::clone(self));
        }
    }

    /// Add a subscriber. No-op if the watcher is already subscribed.
    pub fn add_sub(&self, watcher: &Arc<Watcher>) {
        let mut subs = self.subs.write().expect("dep subs lock poisoned");
        if subs.iter().all(|(id, _)| *id != watcher.id()) {
            subs.push((watcher.id(), Arc::downgrade(watcher)));
        }
    }

    /// Remove a subscriber by watcher id.
    pub fn remove_sub(&self, watcher_id: u64) {
        self.subs
            .write()
            .expect("dep subs lock poisoned")
            .retain(|(id, _)| *id != watcher_id);
    }

    /// Synchronously call `update` on every live subscriber, in
    /// registration order. Dead weak references are pruned.
    pub fn notify(&self) {
        let watchers: Vec<Arc<Watcher>> = {
            let mut subs = self.subs.write().expect("dep subs lock poisoned");
            subs.retain(|(_, weak)| weak.strong_count() > 0);
            subs.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for watcher in watchers {
            watcher.update();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs
            .read()
            .expect("dep subs lock poisoned")
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Guard that pops the target stack when dropped.
pub struct TargetGuard {
    watcher_id: u64,
}

/// Push a watcher onto the target stack, making it the active evaluator.
pub fn push_target(watcher: Arc<Watcher>) -> TargetGuard {
    let watcher_id = watcher.id();
    TARGET_STACK.with(|stack| stack.borrow_mut().push(watcher));
    TargetGuard { watcher_id }
}

/// The currently active watcher, if any.
pub fn current_target() -> Option<Arc<Watcher>> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Whether any watcher is currently collecting dependencies.
pub fn is_tracking() -> bool {
    TARGET_STACK.with(|stack| !stack.borrow().is_empty())
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Catch mismatched push/pop pairs early in debug builds.
            if let Some(watcher) = popped {
                debug_assert_eq!(
                    watcher.id(),
                    self.watcher_id,
                    "target stack mismatch: expected watcher {}, got {}",
                    self.watcher_id,
                    watcher.id()
                );
            }
        });
    }
}
