//! Watcher Implementation
//!
//! A Watcher is an observer that re-runs a computation when any dep it
//! depends on notifies. Three variants share one type, distinguished by
//! options:
//!
//! - **Render watcher** (default): no cached value of interest; `run`
//!   invokes an optional before-callback (the instance's beforeUpdate hook)
//!   and then re-evaluates, which re-renders and patches.
//! - **Computed watcher** (`lazy`): evaluation is deferred; a dependency
//!   change only flags the watcher dirty and the cached value is recomputed
//!   on the next read.
//! - **User watcher** (`user`): `run` re-evaluates and invokes a callback
//!   with (new, old) when the value changed; `immediate` fires the callback
//!   once at creation.
//!
//! # Dependency bookkeeping
//!
//! The dep list is rebuilt on every evaluation: `get` first unsubscribes
//! the watcher from all deps of the previous run, then evaluates under the
//! target stack so that reads re-register exactly the current dependency
//! set. Registration is deduplicated by dep id within one evaluation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use smallvec::SmallVec;

use super::dep::{push_target, Dep};
use super::scheduler::queue_watcher;
use crate::value::Value;

/// Counter for generating unique watcher IDs.
static WATCHER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The evaluator a watcher re-runs. Render watchers return `Value::Null`;
/// computed and user watchers return the watched value.
pub type Getter = Arc<dyn Fn() -> Value + Send + Sync>;

/// User-watcher callback, invoked with (new, old).
pub type WatchCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Options selecting the watcher variant.
#[derive(Default, Clone, Copy)]
pub struct WatcherOptions {
    /// Computed watcher: defer evaluation, cache until invalidated.
    pub lazy: bool,
    /// User watcher: invoke the callback with (new, old) on change.
    pub user: bool,
    /// Fire the user callback once immediately after creation.
    pub immediate: bool,
}

/// Dep bookkeeping for one watcher, rebuilt every evaluation.
#[derive(Default)]
struct DepList {
    deps: SmallVec<[Arc<Dep>; 4]>,
    ids: HashSet<u64>,
}

pub struct Watcher {
    id: u64,
    getter: Getter,

    /// User-watcher change callback.
    cb: Option<WatchCallback>,

    /// Invoked before a render watcher re-evaluates (beforeUpdate).
    before: Option<Arc<dyn Fn() + Send + Sync>>,

    lazy: bool,
    user: bool,

    /// Computed watcher invalidation flag.
    dirty: AtomicBool,

    /// False once torn down; a torn-down watcher never runs again.
    active: AtomicBool,

    /// Last computed value (Null for render watchers).
    value: RwLock<Value>,

    deps: Mutex<DepList>,
}

impl Watcher {
    /// Create a watcher. Non-lazy watchers evaluate immediately to
    /// establish their initial dependency set; `immediate` user watchers
    /// additionally fire their callback with the initial value.
    pub fn create(getter: Getter, options: WatcherOptions) -> Arc<Self> {
        Self::create_with(getter, None, None, options)
    }

    /// Create a user watcher with a change callback.
    pub fn create_user(getter: Getter, cb: WatchCallback, options: WatcherOptions) -> Arc<Self> {
        Self::create_with(
            getter,
            Some(cb),
            None,
            WatcherOptions {
                user: true,
                ..options
            },
        )
    }

    /// Create a render watcher with a before-run callback.
    pub fn create_render(getter: Getter, before: Arc<dyn Fn() + Send + Sync>) -> Arc<Self> {
        Self::create_with(getter, None, Some(before), WatcherOptions::default())
    }

    fn create_with(
        getter: Getter,
        cb: Option<WatchCallback>,
        before: Option<Arc<dyn Fn() + Send + Sync>>,
        options: WatcherOptions,
    ) -> Arc<Self> {
        let watcher = Arc::new(Self {
            id: WATCHER_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            getter,
            cb,
            before,
            lazy: options.lazy,
            user: options.user,
            dirty: AtomicBool::new(options.lazy),
            active: AtomicBool::new(true),
            value: RwLock::new(Value::Null),
            deps: Mutex::new(DepList::default()),
        });

        if !watcher.lazy {
            let value = watcher.get();
            *watcher.value.write().expect("watcher value lock poisoned") = value;
        }
        if watcher.user && options.immediate {
            if let Some(cb) = &watcher.cb {
                let value = watcher.value.read().expect("watcher value lock poisoned").clone();
                cb(&value, &Value::Null);
            }
        }
        watcher
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Last computed value.
    pub fn value(&self) -> Value {
        self.value.read().expect("watcher value lock poisoned").clone()
    }

    /// Evaluate under the target stack, rebuilding the dependency set.
    pub fn get(self: &Arc<Self>) -> Value {
        self.clear_deps();
        let guard = push_target(Arc::clone(self));
        let value = (self.getter)();
        drop(guard);
        value
    }

    /// Record a dep this watcher read during the current evaluation.
    /// Deduplicated by dep id; registers the watcher back on the dep.
    pub fn add_dep(self: &Arc<Self>, dep: Arc<Dep>) {
        let is_new = {
            let mut deps = self.deps.lock().expect("watcher deps lock poisoned");
            if deps.ids.contains(&dep.id()) {
                false
            } else {
                deps.ids.insert(dep.id());
                deps.deps.push(Arc::clone(&dep));
                true
            }
        };
        if is_new {
            dep.add_sub(self);
        }
    }

    /// Dependency-change entry point. Lazy watchers are just flagged
    /// dirty; everything else is enqueued for the next flush.
    pub fn update(self: &Arc<Self>) {
        if self.lazy {
            self.dirty.store(true, Ordering::SeqCst);
        } else {
            queue_watcher(Arc::clone(self));
        }
    }

    /// Re-run the watcher. Called by the scheduler during a flush.
    pub fn run(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        if self.user {
            let new_value = self.get();
            let old_value = {
                let mut value = self.value.write().expect("watcher value lock poisoned");
                std::mem::replace(&mut *value, new_value.clone())
            };
            // Composite values never compare loosely equal, so a watcher on
            // an object or list always fires (the contents may have moved
            // under the same handle).
            if !new_value.loose_eq(&old_value) {
                if let Some(cb) = &self.cb {
                    cb(&new_value, &old_value);
                }
            }
        } else {
            if let Some(before) = &self.before {
                before();
            }
            self.get();
        }
    }

    /// Recompute a lazy watcher's value and clear the dirty flag.
    pub fn evaluate(self: &Arc<Self>) {
        let value = self.get();
        *self.value.write().expect("watcher value lock poisoned") = value;
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Re-register every dep of this watcher on the *outer* active watcher.
    ///
    /// Used by computed properties: after a computed read finishes, the
    /// enclosing render watcher must depend on everything the computed
    /// evaluation read.
    pub fn depend(&self) {
        let deps: Vec<Arc<Dep>> = {
            let deps = self.deps.lock().expect("watcher deps lock poisoned");
            deps.deps.iter().cloned().collect()
        };
        for dep in deps {
            dep.depend();
        }
    }

    /// Unsubscribe from every dep and deactivate. Called when the owning
    /// instance is destroyed.
    pub fn teardown(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.clear_deps();
    }

    fn clear_deps(&self) {
        let old: SmallVec<[Arc<Dep>; 4]> = {
            let mut deps = self.deps.lock().expect("watcher deps lock poisoned");
            deps.ids.clear();
            std::mem::take(&mut deps.deps)
        };
        for dep in old {
            dep.remove_sub(self.id);
        }
    }

    #[cfg(test)]
    pub(crate) fn dep_count(&self) -> usize {
        self.deps.lock().expect("watcher deps lock poisoned").deps.len()
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("lazy", &self.lazy)
            .field("user", &self.user)
            .field("dirty", &self.is_dirty())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn non_lazy_watcher_evaluates_on_creation() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let w = Watcher::create(
            Arc::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Value::Num(42.0)
            }),
            WatcherOptions::default(),
        );

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(w.value(), Value::Num(42.0));
    }

    #[test]
    fn lazy_watcher_defers_until_evaluate() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let w = Watcher::create(
            Arc::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Value::Num(1.0)
            }),
            WatcherOptions {
                lazy: true,
                ..Default::default()
            },
        );

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(w.is_dirty());

        w.evaluate();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!w.is_dirty());
        assert_eq!(w.value(), Value::Num(1.0));
    }

    #[test]
    fn lazy_watcher_update_only_flags_dirty() {
        let w = Watcher::create(
            Arc::new(|| Value::Null),
            WatcherOptions {
                lazy: true,
                ..Default::default()
            },
        );
        w.evaluate();
        assert!(!w.is_dirty());

        w.update();
        assert!(w.is_dirty());
    }

    #[test]
    fn immediate_user_watcher_fires_callback_at_creation() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let _w = Watcher::create_user(
            Arc::new(|| Value::Num(5.0)),
            Arc::new(move |new, old| {
                assert_eq!(new, &Value::Num(5.0));
                assert_eq!(old, &Value::Null);
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
            WatcherOptions {
                immediate: true,
                ..Default::default()
            },
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn user_watcher_skips_callback_on_equal_value() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let w = Watcher::create_user(
            Arc::new(|| Value::Num(5.0)),
            Arc::new(move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
            WatcherOptions::default(),
        );

        // Value unchanged between runs: loose-equal, no callback.
        w.run();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deps_are_rebuilt_each_run() {
        let dep_a = Dep::new();
        let dep_b = Dep::new();
        let toggle = Arc::new(AtomicBool::new(false));

        let toggle_clone = toggle.clone();
        let (a, b) = (dep_a.clone(), dep_b.clone());
        let w = Watcher::create(
            Arc::new(move || {
                if toggle_clone.load(Ordering::SeqCst) {
                    b.depend();
                } else {
                    a.depend();
                }
                Value::Null
            }),
            WatcherOptions::default(),
        );

        assert_eq!(dep_a.subscriber_count(), 1);
        assert_eq!(dep_b.subscriber_count(), 0);

        toggle.store(true, Ordering::SeqCst);
        w.run();

        // The stale dep from the first run is gone.
        assert_eq!(dep_a.subscriber_count(), 0);
        assert_eq!(dep_b.subscriber_count(), 1);
        assert_eq!(w.dep_count(), 1);
    }

    #[test]
    fn teardown_unsubscribes_from_all_deps() {
        let dep = Dep::new();
        let dep_clone = dep.clone();

        let w = Watcher::create(
            Arc::new(move || {
                dep_clone.depend();
                Value::Null
            }),
            WatcherOptions::default(),
        );
        assert_eq!(dep.subscriber_count(), 1);

        w.teardown();
        assert_eq!(dep.subscriber_count(), 0);
        assert!(!w.is_active());
    }
}
