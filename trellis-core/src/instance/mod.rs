//! Component Instances
//!
//! Ties the layers together: a `ComponentDef` pairs a name with options
//! (template, data, methods, computed, watchers, child components, hooks)
//! and memoizes its compiled render program; an `Instance` is one mounted
//! occurrence of a definition, owning its observed data, its watchers,
//! and its current render tree.
//!
//! The update cycle: the render watcher evaluates the render program,
//! which reads data through reactive cells and thereby subscribes the
//! watcher; the resulting tree is patched against the previous one; a
//! later data write notifies the watcher, the scheduler batches it, and
//! the next `tick` re-renders.
//!
//! A render that fails after the initial mount is logged and the previous
//! tree is kept on screen; errors never unwind through the framework.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::compiler::{
    self,
    codegen::{self, ElementOp, HandlerCode},
    expr::{self, EvalError, Expr, Scope, ScopeResolver},
    CompileError, HandlerSpec, KeyFilter,
};
use crate::dom::{Document, DomEvent, ListenerOptions, NodeId};
use crate::reactive::{
    is_tracking, observe, ObservedValue, Watcher, WatcherOptions,
};
use crate::value::Value;
use crate::vdom::{self, VNode};

static INSTANCE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
static COMPONENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A component method: receives the owning instance and evaluated
/// arguments, returns a plain value.
pub type Method = Arc<dyn Fn(&Arc<Instance>, &[Value]) -> Value + Send + Sync>;

/// A computed property getter.
pub type Computed = Arc<dyn Fn(&Arc<Instance>) -> Value + Send + Sync>;

/// A lifecycle hook.
pub type Hook = Arc<dyn Fn(&Arc<Instance>) + Send + Sync>;

/// A user watcher callback: (instance, new value, old value).
pub type WatchHandler = Arc<dyn Fn(&Arc<Instance>, &Value, &Value) + Send + Sync>;

/// An instance-emitter callback: (instance, emitted arguments).
pub type EventCallback = Arc<dyn Fn(&Arc<Instance>, &[Value]) + Send + Sync>;

#[derive(Debug, Clone, Error)]
pub enum InstanceError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    BeforeCreate,
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeDestroy,
    Destroyed,
}

#[derive(Default, Clone)]
struct Hooks {
    before_create: Vec<Hook>,
    created: Vec<Hook>,
    before_mount: Vec<Hook>,
    mounted: Vec<Hook>,
    before_update: Vec<Hook>,
    updated: Vec<Hook>,
    before_destroy: Vec<Hook>,
    destroyed: Vec<Hook>,
}

impl Hooks {
    fn get(&self, hook: Lifecycle) -> &[Hook] {
        match hook {
            Lifecycle::BeforeCreate => &self.before_create,
            Lifecycle::Created => &self.created,
            Lifecycle::BeforeMount => &self.before_mount,
            Lifecycle::Mounted => &self.mounted,
            Lifecycle::BeforeUpdate => &self.before_update,
            Lifecycle::Updated => &self.updated,
            Lifecycle::BeforeDestroy => &self.before_destroy,
            Lifecycle::Destroyed => &self.destroyed,
        }
    }
}

#[derive(Clone)]
struct WatchSpec {
    expr: String,
    handler: WatchHandler,
    immediate: bool,
}

/// Declarative component options, assembled builder-style.
#[derive(Default, Clone)]
pub struct ComponentOptions {
    template: Option<String>,
    data: Option<Arc<dyn Fn() -> Value + Send + Sync>>,
    props: Vec<String>,
    methods: IndexMap<String, Method>,
    computed: IndexMap<String, Computed>,
    watchers: Vec<WatchSpec>,
    components: IndexMap<String, Arc<ComponentDef>>,
    hooks: Hooks,
}

impl ComponentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(mut self, template: &str) -> Self {
        self.template = Some(template.to_string());
        self
    }

    /// Initial data, cloned per instance.
    pub fn data(self, value: Value) -> Self {
        self.data_fn(move || value.clone())
    }

    /// Initial data as a factory, for state that must be computed fresh
    /// per instance.
    pub fn data_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.data = Some(Arc::new(f));
        self
    }

    /// Declare a prop the parent may pass through a bound attribute.
    pub fn prop(mut self, name: &str) -> Self {
        self.props.push(name.to_string());
        self
    }

    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Arc<Instance>, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn computed<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Arc<Instance>) -> Value + Send + Sync + 'static,
    {
        self.computed.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn watch<F>(mut self, expr: &str, handler: F) -> Self
    where
        F: Fn(&Arc<Instance>, &Value, &Value) + Send + Sync + 'static,
    {
        self.watchers.push(WatchSpec {
            expr: expr.to_string(),
            handler: Arc::new(handler),
            immediate: false,
        });
        self
    }

    /// Like `watch`, but fires the handler once at creation with the
    /// initial value.
    pub fn watch_immediate<F>(mut self, expr: &str, handler: F) -> Self
    where
        F: Fn(&Arc<Instance>, &Value, &Value) + Send + Sync + 'static,
    {
        self.watchers.push(WatchSpec {
            expr: expr.to_string(),
            handler: Arc::new(handler),
            immediate: true,
        });
        self
    }

    /// Register a child component usable as a tag in the template.
    pub fn component(mut self, tag: &str, def: Arc<ComponentDef>) -> Self {
        self.components.insert(tag.to_string(), def);
        self
    }

    pub fn before_create<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Instance>) + Send + Sync + 'static,
    {
        self.hooks.before_create.push(Arc::new(f));
        self
    }

    pub fn created<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Instance>) + Send + Sync + 'static,
    {
        self.hooks.created.push(Arc::new(f));
        self
    }

    pub fn before_mount<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Instance>) + Send + Sync + 'static,
    {
        self.hooks.before_mount.push(Arc::new(f));
        self
    }

    pub fn mounted<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Instance>) + Send + Sync + 'static,
    {
        self.hooks.mounted.push(Arc::new(f));
        self
    }

    pub fn before_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Instance>) + Send + Sync + 'static,
    {
        self.hooks.before_update.push(Arc::new(f));
        self
    }

    pub fn updated<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Instance>) + Send + Sync + 'static,
    {
        self.hooks.updated.push(Arc::new(f));
        self
    }

    pub fn before_destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Instance>) + Send + Sync + 'static,
    {
        self.hooks.before_destroy.push(Arc::new(f));
        self
    }

    pub fn destroyed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Instance>) + Send + Sync + 'static,
    {
        self.hooks.destroyed.push(Arc::new(f));
        self
    }
}

/// A component definition: options plus a lazily compiled render program.
/// Definitions are plain shared values; registering one under several
/// tags or parents is fine.
pub struct ComponentDef {
    cid: u64,
    name: String,
    options: ComponentOptions,
    render: OnceLock<Result<Arc<ElementOp>, CompileError>>,
}

impl ComponentDef {
    pub fn new(name: &str, options: ComponentOptions) -> Arc<Self> {
        Arc::new(Self {
            cid: COMPONENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            options,
            render: OnceLock::new(),
        })
    }

    pub fn cid(&self) -> u64 {
        self.cid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compile the template once; every instance shares the program.
    fn render_program(&self) -> Result<Arc<ElementOp>, CompileError> {
        self.render
            .get_or_init(|| {
                compiler::compile(self.options.template.as_deref().unwrap_or("")).map(Arc::new)
            })
            .clone()
    }
}

struct EventEntry {
    id: u64,
    cb: EventCallback,
    once: bool,
}

pub struct Instance {
    id: u64,
    def: Arc<ComponentDef>,
    doc: Document,
    program: Arc<ElementOp>,

    data: ObservedValue,
    props: ObservedValue,

    computed: RwLock<IndexMap<String, Arc<Watcher>>>,
    render_watcher: RwLock<Option<Arc<Watcher>>>,
    user_watchers: RwLock<Vec<Arc<Watcher>>>,

    current_tree: RwLock<Option<Arc<VNode>>>,
    root_el: RwLock<Option<NodeId>>,
    pending_target: RwLock<Option<NodeId>>,
    render_error: RwLock<Option<EvalError>>,

    events: RwLock<HashMap<String, Vec<EventEntry>>>,
    next_event_id: AtomicU64,

    active: AtomicBool,
    self_ref: Weak<Instance>,
}

impl Instance {
    /// Mount a root component: render it and replace `target` in the
    /// document with the rendered tree.
    pub fn mount(
        def: &Arc<ComponentDef>,
        doc: &Document,
        target: NodeId,
    ) -> Result<Arc<Self>, InstanceError> {
        let inst = Self::create(def, doc, IndexMap::new())?;
        inst.mount_at(Some(target))?;
        Ok(inst)
    }

    /// Mount a child component detached; the patcher adopts its root
    /// element. Declared props are taken from the placeholder's evaluated
    /// attributes.
    pub(crate) fn mount_child(
        def: &Arc<ComponentDef>,
        doc: &Document,
        data: &vdom::VNodeData,
    ) -> Result<Arc<Self>, InstanceError> {
        let mut props = IndexMap::new();
        for name in &def.options.props {
            let value = data.attrs.get(name).cloned().unwrap_or(Value::Null);
            props.insert(name.clone(), value);
        }
        let inst = Self::create(def, doc, props)?;
        inst.mount_at(None)?;
        Ok(inst)
    }

    fn create(
        def: &Arc<ComponentDef>,
        doc: &Document,
        props: IndexMap<String, Value>,
    ) -> Result<Arc<Self>, InstanceError> {
        let program = def.render_program()?;
        let options = &def.options;

        let inst = Arc::new_cyclic(|weak| Self {
            id: INSTANCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            def: Arc::clone(def),
            doc: doc.clone(),
            program,
            data: observe(
                options
                    .data
                    .as_ref()
                    .map(|f| f())
                    .unwrap_or_else(|| Value::Map(IndexMap::new())),
            ),
            props: observe(Value::Map(props)),
            computed: RwLock::new(IndexMap::new()),
            render_watcher: RwLock::new(None),
            user_watchers: RwLock::new(Vec::new()),
            current_tree: RwLock::new(None),
            root_el: RwLock::new(None),
            pending_target: RwLock::new(None),
            render_error: RwLock::new(None),
            events: RwLock::new(HashMap::new()),
            next_event_id: AtomicU64::new(0),
            active: AtomicBool::new(true),
            self_ref: weak.clone(),
        });

        inst.call_hook(Lifecycle::BeforeCreate);
        inst.init_computed();
        for spec in &options.watchers {
            let handler = Arc::clone(&spec.handler);
            inst.watch_with(
                &spec.expr,
                Arc::new(move |i, new, old| handler(i, new, old)),
                spec.immediate,
            )?;
        }
        inst.call_hook(Lifecycle::Created);
        debug!(component = def.name(), id = inst.id, "instance created");
        Ok(inst)
    }

    fn mount_at(self: &Arc<Self>, target: Option<NodeId>) -> Result<(), InstanceError> {
        self.call_hook(Lifecycle::BeforeMount);
        *self.pending_target.write() = target;

        let weak = self.self_ref.clone();
        let getter = Arc::new(move || {
            if let Some(inst) = weak.upgrade() {
                inst.update_component();
            }
            Value::Null
        });
        let weak = self.self_ref.clone();
        let before = Arc::new(move || {
            if let Some(inst) = weak.upgrade() {
                inst.call_hook(Lifecycle::BeforeUpdate);
            }
        });
        // The watcher's creation-time evaluation performs the initial
        // render and mount.
        let watcher = Watcher::create_render(getter, before);
        *self.render_watcher.write() = Some(watcher);

        if let Some(err) = self.render_error.write().take() {
            return Err(err.into());
        }
        self.call_hook(Lifecycle::Mounted);
        Ok(())
    }

    fn init_computed(self: &Arc<Self>) {
        let mut computed = self.computed.write();
        for (name, getter) in &self.def.options.computed {
            let weak = self.self_ref.clone();
            let getter = Arc::clone(getter);
            let watcher = Watcher::create(
                Arc::new(move || match weak.upgrade() {
                    Some(inst) => getter(&inst),
                    None => Value::Null,
                }),
                WatcherOptions {
                    lazy: true,
                    ..WatcherOptions::default()
                },
            );
            computed.insert(name.clone(), watcher);
        }
    }

    // -- identity and accessors ---------------------------------------------

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn def(&self) -> &Arc<ComponentDef> {
        &self.def
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The rendered root node, once mounted.
    pub fn root_el(&self) -> Option<NodeId> {
        *self.root_el.read()
    }

    /// The instance's observed data root.
    pub fn data(&self) -> &ObservedValue {
        &self.data
    }

    pub(crate) fn component(&self, tag: &str) -> Option<Arc<ComponentDef>> {
        self.def.options.components.get(tag).cloned()
    }

    fn arc(&self) -> Option<Arc<Instance>> {
        self.self_ref.upgrade()
    }

    fn call_hook(&self, hook: Lifecycle) {
        let handlers = self.def.options.hooks.get(hook);
        if handlers.is_empty() {
            return;
        }
        if let Some(inst) = self.arc() {
            for handler in handlers {
                handler(&inst);
            }
        }
    }

    // -- render cycle --------------------------------------------------------

    fn update_component(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let was_mounted = self.current_tree.read().is_some();
        match codegen::render_root(&self.program, self) {
            Ok(tree) => {
                *self.render_error.write() = None;
                self.apply_tree(tree);
                if was_mounted {
                    self.call_hook(Lifecycle::Updated);
                }
            }
            Err(err) => {
                error!(
                    component = self.def.name(),
                    %err,
                    "render failed; previous tree kept"
                );
                *self.render_error.write() = Some(err);
            }
        }
    }

    fn apply_tree(&self, tree: Arc<VNode>) {
        let prev = self.current_tree.write().replace(Arc::clone(&tree));
        match prev {
            Some(prev) => {
                vdom::patch(&self.doc, &prev, &tree);
                if let Some(el) = tree.el() {
                    *self.root_el.write() = Some(el);
                }
            }
            None => {
                let el = match self.pending_target.write().take() {
                    Some(target) => vdom::mount_replace(&self.doc, target, &tree),
                    None => vdom::patch::create_node(&self.doc, &tree),
                };
                *self.root_el.write() = Some(el);
            }
        }
    }

    // -- expressions ---------------------------------------------------------

    /// Evaluate an expression in this instance's scope.
    pub fn eval(self: &Arc<Self>, src: &str) -> Result<Value, InstanceError> {
        let expr = parse_expr(src)?;
        let scope = Scope::new(&**self);
        Ok(expr::eval(&expr, &scope)?.snapshot())
    }

    /// Assign a value to an expression path (`count`, `user.name`,
    /// `items[2]`) reactively.
    pub fn assign(self: &Arc<Self>, target: &str, value: Value) -> Result<(), InstanceError> {
        let expr = parse_expr(target)?;
        let scope = Scope::new(&**self);
        expr::assign(&expr, value, &scope)?;
        Ok(())
    }

    /// Read a computed property, evaluating lazily and re-registering its
    /// dependencies on the enclosing watcher.
    pub fn computed_value(&self, name: &str) -> Option<ObservedValue> {
        let watcher = self.computed.read().get(name).cloned()?;
        if watcher.is_dirty() {
            watcher.evaluate();
        }
        if is_tracking() {
            watcher.depend();
        }
        Some(observe(watcher.value()))
    }

    // -- user watchers -------------------------------------------------------

    /// Watch an expression; the handler fires with (new, old) after the
    /// flush in which the value changed.
    pub fn watch<F>(self: &Arc<Self>, src: &str, handler: F) -> Result<(), InstanceError>
    where
        F: Fn(&Arc<Instance>, &Value, &Value) + Send + Sync + 'static,
    {
        self.watch_with(src, Arc::new(handler), false)
    }

    fn watch_with(
        self: &Arc<Self>,
        src: &str,
        handler: WatchHandler,
        immediate: bool,
    ) -> Result<(), InstanceError> {
        let expr = parse_expr(src)?;
        let weak = self.self_ref.clone();
        let getter = Arc::new(move || match weak.upgrade() {
            Some(inst) => {
                let scope = Scope::new(&*inst);
                match expr::eval(&expr, &scope) {
                    Ok(value) => value.snapshot(),
                    Err(err) => {
                        warn!(%err, "watch expression failed");
                        Value::Null
                    }
                }
            }
            None => Value::Null,
        });
        let weak = self.self_ref.clone();
        let cb = Arc::new(move |new: &Value, old: &Value| {
            if let Some(inst) = weak.upgrade() {
                handler(&inst, new, old);
            }
        });
        let watcher = Watcher::create_user(
            getter,
            cb,
            WatcherOptions {
                immediate,
                ..WatcherOptions::default()
            },
        );
        self.user_watchers.write().push(watcher);
        Ok(())
    }

    // -- instance events -----------------------------------------------------

    /// Register an emitter listener; returns an id usable with `off`.
    pub fn on(&self, event: &str, cb: EventCallback) -> u64 {
        self.register_event(event, cb, false)
    }

    /// Listener removed automatically after its first invocation.
    pub fn once(&self, event: &str, cb: EventCallback) -> u64 {
        self.register_event(event, cb, true)
    }

    fn register_event(&self, event: &str, cb: EventCallback, once: bool) -> u64 {
        let id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        self.events
            .write()
            .entry(event.to_string())
            .or_default()
            .push(EventEntry { id, cb, once });
        id
    }

    /// Remove one listener, or every listener for the event when `id` is
    /// `None`.
    pub fn off(&self, event: &str, id: Option<u64>) {
        let mut events = self.events.write();
        match id {
            Some(id) => {
                if let Some(entries) = events.get_mut(event) {
                    entries.retain(|e| e.id != id);
                }
            }
            None => {
                events.remove(event);
            }
        }
    }

    /// Invoke every listener registered for `event`.
    pub fn emit(self: &Arc<Self>, event: &str, args: &[Value]) {
        let callbacks: Vec<EventCallback> = {
            let mut events = self.events.write();
            match events.get_mut(event) {
                Some(entries) => {
                    let callbacks = entries.iter().map(|e| Arc::clone(&e.cb)).collect();
                    entries.retain(|e| !e.once);
                    callbacks
                }
                None => return,
            }
        };
        for cb in callbacks {
            cb(self, args);
        }
    }

    // -- event handler dispatch ---------------------------------------------

    /// Run a template event binding for a document event, applying the
    /// binding's guard modifiers first.
    pub(crate) fn run_handler(
        self: &Arc<Self>,
        spec: &HandlerSpec,
        frames: &[IndexMap<String, ObservedValue>],
        event: &mut DomEvent,
    ) {
        let mods = &spec.modifiers;
        if mods.self_only && event.target != event.current_target {
            return;
        }
        if (mods.ctrl && !event.ctrl_key)
            || (mods.shift && !event.shift_key)
            || (mods.alt && !event.alt_key)
            || (mods.meta && !event.meta_key)
        {
            return;
        }
        if (mods.left && event.button != Some(0))
            || (mods.middle && event.button != Some(1))
            || (mods.right && event.button != Some(2))
        {
            return;
        }
        if !spec.key_filters.is_empty()
            && !spec.key_filters.iter().any(|f| key_matches(f, event))
        {
            return;
        }
        if mods.stop {
            event.stop_propagation();
        }
        if mods.prevent {
            event.prevent_default();
        }
        self.execute_handler(spec, frames, event.payload());
    }

    /// Run a template event binding for a child component emit.
    pub(crate) fn run_emitted_handler(
        self: &Arc<Self>,
        spec: &HandlerSpec,
        frames: &[IndexMap<String, ObservedValue>],
        args: &[Value],
    ) {
        match &spec.code {
            HandlerCode::Method(name) => {
                if let Err(err) = self.call_method(name, args) {
                    error!(%err, "emitted handler failed");
                }
            }
            HandlerCode::Inline(_) => {
                let payload = args.first().cloned().unwrap_or(Value::Null);
                self.execute_handler(spec, frames, payload);
            }
        }
    }

    fn execute_handler(
        self: &Arc<Self>,
        spec: &HandlerSpec,
        frames: &[IndexMap<String, ObservedValue>],
        payload: Value,
    ) {
        match &spec.code {
            HandlerCode::Method(name) => {
                if let Err(err) = self.call_method(name, &[payload]) {
                    error!(%err, "event handler failed");
                }
            }
            HandlerCode::Inline(stmt) => {
                let mut scope = Scope::with_frames(&**self, frames.to_vec());
                let mut frame = IndexMap::new();
                frame.insert("$event".to_string(), observe(payload));
                scope.push_frame(frame);
                if let Err(err) = expr::exec(stmt, &scope) {
                    error!(%err, "event handler failed");
                }
            }
        }
    }

    // -- teardown ------------------------------------------------------------

    /// Tear the instance down: deactivate watchers, destroy child
    /// components, and remove the rendered subtree from the document.
    /// Idempotent.
    pub fn destroy(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.call_hook(Lifecycle::BeforeDestroy);

        if let Some(watcher) = self.render_watcher.write().take() {
            watcher.teardown();
        }
        for (_, watcher) in self.computed.write().drain(..) {
            watcher.teardown();
        }
        for watcher in self.user_watchers.write().drain(..) {
            watcher.teardown();
        }
        if let Some(tree) = self.current_tree.write().take() {
            vdom::patch::destroy_subtree(&tree);
        }
        if let Some(el) = self.root_el.write().take() {
            self.doc.remove_node(el);
        }
        self.events.write().clear();

        self.call_hook(Lifecycle::Destroyed);
        debug!(component = self.def.name(), id = self.id, "instance destroyed");
    }
}

fn parse_expr(src: &str) -> Result<Expr, CompileError> {
    expr::parse_expr(src.trim()).map_err(|e| CompileError::BadExpression {
        src: src.to_string(),
        message: e.to_string(),
    })
}

impl ScopeResolver for Instance {
    fn resolve_root(&self, name: &str) -> Option<ObservedValue> {
        if let ObservedValue::Object(obj) = &self.data {
            if let Some(cell) = obj.field(name) {
                return Some(cell.get());
            }
        }
        if let ObservedValue::Object(props) = &self.props {
            if let Some(cell) = props.field(name) {
                return Some(cell.get());
            }
        }
        self.computed_value(name)
    }

    fn has_method(&self, name: &str) -> bool {
        self.def.options.methods.contains_key(name)
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let method = self
            .def
            .options
            .methods
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownMethod(name.to_string()))?;
        match self.arc() {
            Some(inst) => Ok(method(&inst, args)),
            None => Ok(Value::Null),
        }
    }

    fn assign_root(&self, name: &str, value: Value) -> Result<(), EvalError> {
        if let ObservedValue::Object(props) = &self.props {
            if props.has(name) {
                warn!(prop = name, "assignment to a prop; parent will not see it");
                props.set(name, value);
                return Ok(());
            }
        }
        match &self.data {
            ObservedValue::Object(obj) => {
                obj.set(name, value);
                Ok(())
            }
            _ => Err(EvalError::InvalidAssignmentTarget),
        }
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("component", &self.def.name())
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Listener wiring
// ---------------------------------------------------------------------------

fn listener_options(spec: &HandlerSpec) -> ListenerOptions {
    ListenerOptions {
        capture: spec.modifiers.capture,
        once: spec.modifiers.once,
        passive: spec.modifiers.passive,
    }
}

fn add_dom_listener(
    doc: &Document,
    el: NodeId,
    instance: &Arc<Instance>,
    binding: &vdom::HandlerBinding,
) -> u64 {
    let weak = Arc::downgrade(instance);
    let spec = Arc::clone(&binding.spec);
    let frames = binding.frames.clone();
    doc.add_listener(
        el,
        &binding.spec.event,
        listener_options(&binding.spec),
        Arc::new(move |event| {
            if let Some(inst) = weak.upgrade() {
                inst.run_handler(&spec, &frames, event);
            }
        }),
    )
}

/// Attach a vnode's event bindings to its document node.
pub(crate) fn attach_handlers(doc: &Document, el: NodeId, vnode: &Arc<VNode>) {
    let instance = match vnode.context.upgrade() {
        Some(inst) => inst,
        None => return,
    };
    for binding in &vnode.data.on {
        let id = add_dom_listener(doc, el, &instance, binding);
        vnode.push_listener_id(id);
    }
}

/// Wire a component placeholder's event bindings: `.native` bindings
/// listen on the child's root element, plain bindings subscribe to the
/// child's emitter.
pub(crate) fn attach_component_handlers(
    doc: &Document,
    el: NodeId,
    vnode: &Arc<VNode>,
    child: &Arc<Instance>,
) {
    let parent = match vnode.context.upgrade() {
        Some(inst) => inst,
        None => return,
    };
    for binding in &vnode.data.on {
        if binding.spec.modifiers.native {
            let id = add_dom_listener(doc, el, &parent, binding);
            vnode.push_listener_id(id);
        } else {
            let weak = Arc::downgrade(&parent);
            let spec = Arc::clone(&binding.spec);
            let frames = binding.frames.clone();
            child.on(
                &binding.spec.event,
                Arc::new(move |_child, args| {
                    if let Some(parent) = weak.upgrade() {
                        parent.run_emitted_handler(&spec, &frames, args);
                    }
                }),
            );
        }
    }
}

fn key_matches(filter: &KeyFilter, event: &DomEvent) -> bool {
    match filter {
        KeyFilter::Code(code) => event.key_code == Some(*code),
        KeyFilter::Named(name) => {
            if event
                .key
                .as_deref()
                .is_some_and(|k| k.eq_ignore_ascii_case(name))
            {
                return true;
            }
            // Legacy key-code aliases.
            matches!(
                (name.as_str(), event.key_code),
                ("enter", Some(13))
                    | ("tab", Some(9))
                    | ("delete", Some(8))
                    | ("delete", Some(46))
                    | ("esc", Some(27))
                    | ("space", Some(32))
                    | ("up", Some(38))
                    | ("down", Some(40))
                    | ("left", Some(37))
                    | ("right", Some(39))
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::tick;
    use serde_json::json;
    use std::sync::atomic::AtomicI32;
    use std::sync::Mutex;

    fn mount_def(def: &Arc<ComponentDef>) -> (Document, Arc<Instance>) {
        let doc = Document::new();
        let target = doc.create_element("div");
        doc.append_child(doc.body(), target);
        let inst = Instance::mount(def, &doc, target).expect("mount");
        (doc, inst)
    }

    #[test]
    fn mounts_and_renders_data() {
        let def = ComponentDef::new(
            "hello",
            ComponentOptions::new()
                .template("<div><span>{{ greeting }}, {{ who }}</span></div>")
                .data(Value::from(json!({ "greeting": "hi", "who": "world" }))),
        );
        let (doc, inst) = mount_def(&def);
        assert_eq!(doc.text_content(inst.root_el().unwrap()), "hi, world");
    }

    #[test]
    fn data_write_rerenders_on_tick() {
        let def = ComponentDef::new(
            "counter",
            ComponentOptions::new()
                .template("<div>{{ count }}</div>")
                .data(Value::from(json!({ "count": 0 }))),
        );
        let (doc, inst) = mount_def(&def);
        let root = inst.root_el().unwrap();
        assert_eq!(doc.text_content(root), "0");

        inst.assign("count", Value::Num(5.0)).unwrap();
        // Not yet flushed.
        assert_eq!(doc.text_content(root), "0");
        tick();
        assert_eq!(doc.text_content(root), "5");
    }

    #[test]
    fn computed_properties_cache_and_invalidate() {
        let evals = Arc::new(AtomicI32::new(0));
        let evals_clone = evals.clone();
        let def = ComponentDef::new(
            "doubled",
            ComponentOptions::new()
                .template("<div>{{ double }} {{ double }}</div>")
                .data(Value::from(json!({ "n": 2 })))
                .computed("double", move |inst| {
                    evals_clone.fetch_add(1, Ordering::SeqCst);
                    let n = inst.eval("n").unwrap_or(Value::Null).as_number();
                    Value::Num(n * 2.0)
                }),
        );
        let (doc, inst) = mount_def(&def);
        let root = inst.root_el().unwrap();
        assert_eq!(doc.text_content(root), "4 4");
        // Two reads in one render, one evaluation.
        assert_eq!(evals.load(Ordering::SeqCst), 1);

        inst.assign("n", Value::Num(3.0)).unwrap();
        tick();
        assert_eq!(doc.text_content(root), "6 6");
        assert_eq!(evals.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn click_handler_runs_method_and_updates_view() {
        let def = ComponentDef::new(
            "clicker",
            ComponentOptions::new()
                .template(r#"<div><button @click="bump">{{ count }}</button></div>"#)
                .data(Value::from(json!({ "count": 0 })))
                .method("bump", |inst, _args| {
                    let count = inst.eval("count").unwrap_or(Value::Null).as_number();
                    let _ = inst.assign("count", Value::Num(count + 1.0));
                    Value::Null
                }),
        );
        let (doc, inst) = mount_def(&def);
        let root = inst.root_el().unwrap();
        let button = doc.children(root)[0];

        doc.dispatch(button, DomEvent::new("click"));
        tick();
        assert_eq!(doc.text_content(root), "1");
    }

    #[test]
    fn inline_handler_assignment() {
        let def = ComponentDef::new(
            "inline",
            ComponentOptions::new()
                .template(r#"<div><a @click="label = 'clicked'">{{ label }}</a></div>"#)
                .data(Value::from(json!({ "label": "idle" }))),
        );
        let (doc, inst) = mount_def(&def);
        let root = inst.root_el().unwrap();
        let link = doc.children(root)[0];

        doc.dispatch(link, DomEvent::new("click"));
        tick();
        assert_eq!(doc.text_content(root), "clicked");
    }

    #[test]
    fn watch_fires_after_flush_with_new_and_old() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let def = ComponentDef::new(
            "watched",
            ComponentOptions::new()
                .template("<div>{{ n }}</div>")
                .data(Value::from(json!({ "n": 1 })))
                .watch("n", move |_inst, new, old| {
                    seen_clone
                        .lock()
                        .unwrap()
                        .push((new.clone(), old.clone()));
                }),
        );
        let (_doc, inst) = mount_def(&def);

        inst.assign("n", Value::Num(2.0)).unwrap();
        assert!(seen.lock().unwrap().is_empty());
        tick();
        assert_eq!(
            &*seen.lock().unwrap(),
            &[(Value::Num(2.0), Value::Num(1.0))]
        );
    }

    #[test]
    fn lifecycle_hooks_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let push = |order: &Arc<Mutex<Vec<&'static str>>>, name: &'static str| {
            let order = order.clone();
            move |_: &Arc<Instance>| order.lock().unwrap().push(name)
        };
        let def = ComponentDef::new(
            "hooks",
            ComponentOptions::new()
                .template("<div>{{ n }}</div>")
                .data(Value::from(json!({ "n": 1 })))
                .before_create(push(&order, "beforeCreate"))
                .created(push(&order, "created"))
                .before_mount(push(&order, "beforeMount"))
                .mounted(push(&order, "mounted"))
                .before_update(push(&order, "beforeUpdate"))
                .updated(push(&order, "updated"))
                .before_destroy(push(&order, "beforeDestroy"))
                .destroyed(push(&order, "destroyed")),
        );
        let (_doc, inst) = mount_def(&def);
        inst.assign("n", Value::Num(2.0)).unwrap();
        tick();
        inst.destroy();

        assert_eq!(
            &*order.lock().unwrap(),
            &[
                "beforeCreate",
                "created",
                "beforeMount",
                "mounted",
                "beforeUpdate",
                "updated",
                "beforeDestroy",
                "destroyed"
            ]
        );
    }

    #[test]
    fn destroyed_instance_stops_updating() {
        let def = ComponentDef::new(
            "doomed",
            ComponentOptions::new()
                .template("<div>{{ n }}</div>")
                .data(Value::from(json!({ "n": 1 }))),
        );
        let (doc, inst) = mount_def(&def);
        let root = inst.root_el().unwrap();
        inst.destroy();

        assert_eq!(doc.tag(root), None);
        inst.assign("n", Value::Num(9.0)).unwrap();
        tick();
    }

    #[test]
    fn mount_fails_on_bad_template() {
        let def = ComponentDef::new(
            "broken",
            ComponentOptions::new().template("<div><span>oops</div>"),
        );
        let doc = Document::new();
        let target = doc.create_element("div");
        doc.append_child(doc.body(), target);
        assert!(matches!(
            Instance::mount(&def, &doc, target),
            Err(InstanceError::Compile(_))
        ));
    }

    #[test]
    fn render_error_keeps_previous_tree() {
        let def = ComponentDef::new(
            "fragile",
            ComponentOptions::new()
                .template("<div>{{ n }}-{{ m }}</div>")
                .data(Value::from(json!({ "n": 1, "m": 2 }))),
        );
        let (doc, inst) = mount_def(&def);
        let root = inst.root_el().unwrap();
        assert_eq!(doc.text_content(root), "1-2");

        // Deleting `n` makes it an unknown root; the write to `m` forces a
        // re-render, which fails and leaves the previous output in place.
        crate::reactive::del(inst.data(), "n");
        inst.assign("m", Value::Num(9.0)).unwrap();
        tick();
        assert_eq!(doc.text_content(root), "1-2");
    }

    #[test]
    fn emitter_on_once_off() {
        let def = ComponentDef::new(
            "emitting",
            ComponentOptions::new()
                .template("<div>x</div>")
                .data(Value::from(json!({}))),
        );
        let (_doc, inst) = mount_def(&def);

        let hits = Arc::new(AtomicI32::new(0));
        let hits_clone = hits.clone();
        inst.once(
            "ping",
            Arc::new(move |_inst, _args| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        inst.emit("ping", &[]);
        inst.emit("ping", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let hits_clone = hits.clone();
        let id = inst.on(
            "ping",
            Arc::new(move |_inst, _args| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        inst.off("ping", Some(id));
        inst.emit("ping", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
