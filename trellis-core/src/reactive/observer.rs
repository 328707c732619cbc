//! Reactive Data Layer
//!
//! Walks plain data and wraps it in reactive storage. The source-language
//! trick of installing per-property get/set traps has no equivalent here,
//! so reactivity is explicit: every field of an observed map lives in a
//! `ReactiveCell` (a typed box with `get`/`set` carrying the dependency
//! contract), and arrays become `ObservedList`, an observable collection
//! whose mutating surface performs the real mutation, observes any newly
//! inserted elements, then notifies the list's own dep.
//!
//! # Shape deps
//!
//! Each observed map and list owns a dep for "shape" changes: list size
//! changes, field add/remove. Reading a field whose value is a map or list
//! also registers the active watcher on that child's shape dep, so in-place
//! mutation of the nested structure is observable even though the outer
//! field reference never changed. Nested lists are walked recursively so
//! arrays-of-arrays register at every level.
//!
//! # Idempotence
//!
//! An observed map or list is its own observer: cloning an `ObservedValue`
//! clones the `Arc`, so observing the same data twice trivially yields the
//! same observer. There is no hidden marker to manage.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use super::dep::{is_tracking, Dep};
use crate::value::Value;

/// A value in reactive form: scalars stay plain, maps and lists are
/// wrapped in shared observed storage.
#[derive(Clone, Debug)]
pub enum ObservedValue {
    Scalar(Value),
    Object(Arc<ObservedObject>),
    List(Arc<ObservedList>),
}

impl ObservedValue {
    /// Shape dep of the wrapped collection, if this is one.
    pub fn observer_dep(&self) -> Option<Arc<Dep>> {
        match self {
            ObservedValue::Scalar(_) => None,
            ObservedValue::Object(obj) => Some(obj.dep.clone()),
            ObservedValue::List(list) => Some(list.dep.clone()),
        }
    }

    /// Plain snapshot of the current state. Reads go through the field
    /// cells, so under an active watcher a snapshot registers dependencies
    /// on everything it touches (this is what makes `{{ obj }}`
    /// interpolation reactive to deep changes).
    pub fn snapshot(&self) -> Value {
        match self {
            ObservedValue::Scalar(v) => v.clone(),
            ObservedValue::Object(obj) => obj.snapshot(),
            ObservedValue::List(list) => list.snapshot(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            ObservedValue::Scalar(v) => v.is_truthy(),
            _ => true,
        }
    }
}

/// Wrap plain data in reactive form. Non-composite values are returned
/// as-is (observing a scalar is a silent no-op, not an error).
pub fn observe(value: Value) -> ObservedValue {
    match value {
        Value::Map(entries) => ObservedValue::Object(ObservedObject::new(entries)),
        Value::List(items) => ObservedValue::List(ObservedList::new(items)),
        scalar => ObservedValue::Scalar(scalar),
    }
}

/// A reactive box for one field: the explicit replacement for a
/// per-property accessor pair.
pub struct ReactiveCell {
    dep: Arc<Dep>,
    value: RwLock<ObservedValue>,
}

impl ReactiveCell {
    pub fn new(value: ObservedValue) -> Arc<Self> {
        Arc::new(Self {
            dep: Dep::new(),
            value: RwLock::new(value),
        })
    }

    /// Read the cell. Under an active watcher this registers the watcher
    /// on the cell's dep, on the child observer's shape dep when the value
    /// is a map or list, and recursively on nested lists.
    pub fn get(&self) -> ObservedValue {
        let value = self.value.read().expect("cell value lock poisoned").clone();
        if is_tracking() {
            self.dep.depend();
            match &value {
                ObservedValue::Object(obj) => obj.dep.depend(),
                ObservedValue::List(list) => {
                    list.dep.depend();
                    depend_list(list);
                }
                ObservedValue::Scalar(_) => {}
            }
        }
        value
    }

    /// Write the cell. Loosely-equal scalar writes (including NaN over
    /// NaN) are a no-op with no notification; otherwise the new value is
    /// observed and subscribers are notified.
    pub fn set(&self, new_value: Value) {
        {
            let current = self.value.read().expect("cell value lock poisoned");
            if let ObservedValue::Scalar(old) = &*current {
                if old.loose_eq(&new_value) {
                    return;
                }
            }
        }
        let observed = observe(new_value);
        *self.value.write().expect("cell value lock poisoned") = observed;
        self.dep.notify();
    }

    /// Read without touching the dependency machinery.
    pub fn peek(&self) -> ObservedValue {
        self.value.read().expect("cell value lock poisoned").clone()
    }

    pub fn dep(&self) -> &Arc<Dep> {
        &self.dep
    }
}

/// Register the active watcher on every nested list reachable from
/// `list`'s items, and on any observed map items. Deeply nested
/// arrays-of-arrays must notify at every level.
fn depend_list(list: &Arc<ObservedList>) {
    let items = list.items.read().expect("list items lock poisoned").clone();
    for item in &items {
        match item {
            ObservedValue::Object(obj) => obj.dep.depend(),
            ObservedValue::List(inner) => {
                inner.dep.depend();
                depend_list(inner);
            }
            ObservedValue::Scalar(_) => {}
        }
    }
}

/// Reactive storage for a plain map: one cell per field, plus a shape dep
/// notified on field add/remove.
pub struct ObservedObject {
    dep: Arc<Dep>,
    fields: RwLock<IndexMap<String, Arc<ReactiveCell>>>,
}

impl ObservedObject {
    pub fn new(entries: IndexMap<String, Value>) -> Arc<Self> {
        let fields = entries
            .into_iter()
            .map(|(k, v)| (k, ReactiveCell::new(observe(v))))
            .collect();
        Arc::new(Self {
            dep: Dep::new(),
            fields: RwLock::new(fields),
        })
    }

    pub fn dep(&self) -> &Arc<Dep> {
        &self.dep
    }

    pub fn field(&self, key: &str) -> Option<Arc<ReactiveCell>> {
        self.fields
            .read()
            .expect("object fields lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.fields
            .read()
            .expect("object fields lock poisoned")
            .contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.fields
            .read()
            .expect("object fields lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Assign a field. An existing field goes through its cell (already
    /// reactive); a new field gets a fresh reactive cell and the shape dep
    /// is notified so renders that enumerated the map re-run.
    pub fn set(&self, key: &str, value: Value) {
        let existing = self.field(key);
        match existing {
            Some(cell) => cell.set(value),
            None => {
                self.fields
                    .write()
                    .expect("object fields lock poisoned")
                    .insert(key.to_string(), ReactiveCell::new(observe(value)));
                self.dep.notify();
            }
        }
    }

    /// Remove a field. Missing keys are a silent no-op.
    pub fn del(&self, key: &str) {
        let removed = self
            .fields
            .write()
            .expect("object fields lock poisoned")
            .shift_remove(key)
            .is_some();
        if removed {
            self.dep.notify();
        }
    }

    pub fn snapshot(&self) -> Value {
        let cells: Vec<(String, Arc<ReactiveCell>)> = {
            let fields = self.fields.read().expect("object fields lock poisoned");
            fields.iter().map(|(k, c)| (k.clone(), c.clone())).collect()
        };
        Value::Map(
            cells
                .into_iter()
                .map(|(k, cell)| (k, cell.get().snapshot()))
                .collect(),
        )
    }
}

impl std::fmt::Debug for ObservedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedObject")
            .field("dep", &self.dep.id())
            .field("keys", &self.keys())
            .finish()
    }
}

/// Observable collection replacing array-prototype interception: the
/// mutating surface mirrors the seven intercepted array methods.
pub struct ObservedList {
    dep: Arc<Dep>,
    items: RwLock<Vec<ObservedValue>>,
}

impl ObservedList {
    pub fn new(items: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            dep: Dep::new(),
            items: RwLock::new(items.into_iter().map(observe).collect()),
        })
    }

    pub fn dep(&self) -> &Arc<Dep> {
        &self.dep
    }

    pub fn len(&self) -> usize {
        self.items.read().expect("list items lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positional read. Per-index reads are not individually tracked; the
    /// dependency on the list as a whole comes from the field cell that
    /// holds it.
    pub fn get(&self, index: usize) -> Option<ObservedValue> {
        self.items
            .read()
            .expect("list items lock poisoned")
            .get(index)
            .cloned()
    }

    pub fn push(&self, value: Value) {
        self.items
            .write()
            .expect("list items lock poisoned")
            .push(observe(value));
        self.dep.notify();
    }

    pub fn pop(&self) -> Option<Value> {
        let removed = self.items.write().expect("list items lock poisoned").pop();
        self.dep.notify();
        removed.map(|v| v.snapshot())
    }

    pub fn shift(&self) -> Option<Value> {
        let removed = {
            let mut items = self.items.write().expect("list items lock poisoned");
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        self.dep.notify();
        removed.map(|v| v.snapshot())
    }

    pub fn unshift(&self, value: Value) {
        self.items
            .write()
            .expect("list items lock poisoned")
            .insert(0, observe(value));
        self.dep.notify();
    }

    /// Remove `delete_count` items at `start`, inserting `inserted` in
    /// their place. Returns the removed items as plain values.
    pub fn splice(&self, start: usize, delete_count: usize, inserted: Vec<Value>) -> Vec<Value> {
        let removed: Vec<Value> = {
            let mut items = self.items.write().expect("list items lock poisoned");
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            items
                .splice(start..end, inserted.into_iter().map(observe))
                .map(|v| v.snapshot())
                .collect()
        };
        self.dep.notify();
        removed
    }

    pub fn reverse(&self) {
        self.items
            .write()
            .expect("list items lock poisoned")
            .reverse();
        self.dep.notify();
    }

    /// Sort by a comparator over plain snapshots of the items.
    pub fn sort_by<F>(&self, mut cmp: F)
    where
        F: FnMut(&Value, &Value) -> std::cmp::Ordering,
    {
        self.items
            .write()
            .expect("list items lock poisoned")
            .sort_by(|a, b| cmp(&a.snapshot(), &b.snapshot()));
        self.dep.notify();
    }

    /// Index assignment via the splice-equivalent: extends the list with
    /// nulls when assigning past the end, then notifies.
    pub fn set_index(&self, index: usize, value: Value) {
        {
            let mut items = self.items.write().expect("list items lock poisoned");
            while items.len() <= index {
                items.push(ObservedValue::Scalar(Value::Null));
            }
            items[index] = observe(value);
        }
        self.dep.notify();
    }

    /// Remove one item by index (the `del` path for lists).
    pub fn remove_index(&self, index: usize) {
        let removed = {
            let mut items = self.items.write().expect("list items lock poisoned");
            if index < items.len() {
                items.remove(index);
                true
            } else {
                false
            }
        };
        if removed {
            self.dep.notify();
        }
    }

    pub fn iter_snapshot(&self) -> Vec<ObservedValue> {
        self.items.read().expect("list items lock poisoned").clone()
    }

    pub fn snapshot(&self) -> Value {
        let items = self.iter_snapshot();
        Value::List(items.into_iter().map(|v| v.snapshot()).collect())
    }
}

impl std::fmt::Debug for ObservedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedList")
            .field("dep", &self.dep.id())
            .field("len", &self.len())
            .finish()
    }
}

/// Ad-hoc reactive assignment on an observed target: lists take numeric
/// keys through the splice-equivalent, maps install fresh reactive fields.
/// Observing a scalar target silently does nothing.
pub fn set(target: &ObservedValue, key: &str, value: Value) {
    match target {
        ObservedValue::List(list) => {
            if let Ok(index) = key.parse::<usize>() {
                list.set_index(index, value);
            }
        }
        ObservedValue::Object(obj) => obj.set(key, value),
        ObservedValue::Scalar(_) => {}
    }
}

/// Mirror of [`set`] for removal.
pub fn del(target: &ObservedValue, key: &str) {
    match target {
        ObservedValue::List(list) => {
            if let Ok(index) = key.parse::<usize>() {
                list.remove_index(index);
            }
        }
        ObservedValue::Object(obj) => obj.del(key),
        ObservedValue::Scalar(_) => {}
    }
}
