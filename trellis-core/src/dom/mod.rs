//! In-Memory Document
//!
//! A headless DOM stand-in the patcher renders into: an arena of element
//! and text nodes addressed by `NodeId`, with attributes, inline styles,
//! and event listeners. Hosts construct a `Document`, hand a mount node to
//! a component, and feed synthetic `DomEvent`s through `dispatch`, which
//! runs the standard two-phase (capture then bubble) propagation.
//!
//! The handle is cheaply cloneable; all state lives behind one lock.
//! Listener callbacks run with the lock released, so handlers may freely
//! mutate the tree they were dispatched from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::warn;

use crate::value::Value;

pub type NodeId = u64;

/// Event callback. Holds weak references upstream so a destroyed component
/// does not keep itself alive through its listeners.
pub type Listener = Arc<dyn Fn(&mut DomEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
}

#[derive(Clone)]
struct ListenerEntry {
    id: u64,
    event: String,
    options: ListenerOptions,
    handler: Listener,
}

enum NodeKind {
    Element {
        tag: String,
        attrs: IndexMap<String, String>,
        style: IndexMap<String, String>,
    },
    Text(String),
}

struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    listeners: Vec<ListenerEntry>,
}

impl Node {
    fn element(tag: &str) -> Self {
        Self {
            kind: NodeKind::Element {
                tag: tag.to_string(),
                attrs: IndexMap::new(),
                style: IndexMap::new(),
            },
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }

    fn text(text: &str) -> Self {
        Self {
            kind: NodeKind::Text(text.to_string()),
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

struct DocumentInner {
    nodes: RwLock<HashMap<NodeId, Node>>,
    next_node: AtomicU64,
    next_listener: AtomicU64,
    body: NodeId,
}

/// Handle to one document arena.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(0, Node::element("body"));
        Self {
            inner: Arc::new(DocumentInner {
                nodes: RwLock::new(nodes),
                next_node: AtomicU64::new(1),
                next_listener: AtomicU64::new(1),
                body: 0,
            }),
        }
    }

    /// The root element every document starts with.
    pub fn body(&self) -> NodeId {
        self.inner.body
    }

    // -- node creation ------------------------------------------------------

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.insert_node(Node::element(tag))
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.insert_node(Node::text(text))
    }

    fn insert_node(&self, node: Node) -> NodeId {
        let id = self.inner.next_node.fetch_add(1, Ordering::Relaxed);
        self.inner.nodes.write().insert(id, node);
        id
    }

    // -- structure ----------------------------------------------------------

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.inner.nodes.read().get(&id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .nodes
            .read()
            .get(&id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let nodes = self.inner.nodes.read();
        let parent = nodes.get(&id)?.parent?;
        let siblings = &nodes.get(&parent)?.children;
        let pos = siblings.iter().position(|c| *c == id)?;
        siblings.get(pos + 1).copied()
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Insert `child` before `anchor` under `parent`; `None` appends. A
    /// child already in the tree is moved, not duplicated.
    pub fn insert_before(&self, parent: NodeId, child: NodeId, anchor: Option<NodeId>) {
        let mut nodes = self.inner.nodes.write();
        detach(&mut nodes, child);
        if let Some(node) = nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(parent_node) = nodes.get_mut(&parent) {
            let pos = anchor
                .and_then(|a| parent_node.children.iter().position(|c| *c == a))
                .unwrap_or(parent_node.children.len());
            parent_node.children.insert(pos, child);
        }
    }

    /// Put `new` in `old`'s position and drop `old`'s subtree.
    pub fn replace_node(&self, old: NodeId, new: NodeId) {
        let mut nodes = self.inner.nodes.write();
        let parent = nodes.get(&old).and_then(|n| n.parent);
        if let Some(parent) = parent {
            detach(&mut nodes, new);
            if let Some(node) = nodes.get_mut(&new) {
                node.parent = Some(parent);
            }
            if let Some(parent_node) = nodes.get_mut(&parent) {
                if let Some(pos) = parent_node.children.iter().position(|c| *c == old) {
                    parent_node.children[pos] = new;
                }
            }
            if let Some(node) = nodes.get_mut(&old) {
                node.parent = None;
            }
        }
        drop_subtree(&mut nodes, old);
    }

    /// Detach and drop a subtree, listeners included.
    pub fn remove_node(&self, id: NodeId) {
        let mut nodes = self.inner.nodes.write();
        detach(&mut nodes, id);
        drop_subtree(&mut nodes, id);
    }

    pub fn clear_children(&self, id: NodeId) {
        let mut nodes = self.inner.nodes.write();
        let children = nodes
            .get_mut(&id)
            .map(|n| std::mem::take(&mut n.children))
            .unwrap_or_default();
        for child in children {
            drop_subtree(&mut nodes, child);
        }
    }

    // -- content ------------------------------------------------------------

    pub fn tag(&self, id: NodeId) -> Option<String> {
        match &self.inner.nodes.read().get(&id)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn set_text(&self, id: NodeId, text: &str) {
        if let Some(node) = self.inner.nodes.write().get_mut(&id) {
            if let NodeKind::Text(current) = &mut node.kind {
                *current = text.to_string();
            }
        }
    }

    pub fn set_attribute(&self, id: NodeId, name: &str, value: &str) {
        if let Some(node) = self.inner.nodes.write().get_mut(&id) {
            if let NodeKind::Element { attrs, .. } = &mut node.kind {
                attrs.insert(name.to_string(), value.to_string());
            }
        }
    }

    pub fn remove_attribute(&self, id: NodeId, name: &str) {
        if let Some(node) = self.inner.nodes.write().get_mut(&id) {
            if let NodeKind::Element { attrs, .. } = &mut node.kind {
                attrs.shift_remove(name);
            }
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<String> {
        match &self.inner.nodes.read().get(&id)?.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).cloned(),
            NodeKind::Text(_) => None,
        }
    }

    /// Set the element's class attribute; an empty value removes it.
    pub fn set_class(&self, id: NodeId, class: &str) {
        if let Some(node) = self.inner.nodes.write().get_mut(&id) {
            if let NodeKind::Element { attrs, .. } = &mut node.kind {
                if class.is_empty() {
                    attrs.shift_remove("class");
                } else {
                    attrs.insert("class".to_string(), class.to_string());
                }
            }
        }
    }

    /// Set one inline style property; an empty value removes it.
    pub fn set_style(&self, id: NodeId, prop: &str, value: &str) {
        if let Some(node) = self.inner.nodes.write().get_mut(&id) {
            if let NodeKind::Element { style, .. } = &mut node.kind {
                if value.is_empty() {
                    style.shift_remove(prop);
                } else {
                    style.insert(prop.to_string(), value.to_string());
                }
            }
        }
    }

    pub fn style(&self, id: NodeId, prop: &str) -> Option<String> {
        match &self.inner.nodes.read().get(&id)?.kind {
            NodeKind::Element { style, .. } => style.get(prop).cloned(),
            NodeKind::Text(_) => None,
        }
    }

    // -- listeners -----------------------------------------------------------

    pub fn add_listener(
        &self,
        id: NodeId,
        event: &str,
        options: ListenerOptions,
        handler: Listener,
    ) -> u64 {
        let listener_id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        if let Some(node) = self.inner.nodes.write().get_mut(&id) {
            node.listeners.push(ListenerEntry {
                id: listener_id,
                event: event.to_string(),
                options,
                handler,
            });
        }
        listener_id
    }

    pub fn remove_listener(&self, id: NodeId, listener_id: u64) {
        if let Some(node) = self.inner.nodes.write().get_mut(&id) {
            node.listeners.retain(|l| l.id != listener_id);
        }
    }

    /// Dispatch an event at `target`: capture listeners fire root-to-target,
    /// then bubble listeners fire target-to-root. Honors `stop_propagation`,
    /// `once` removal, and `passive` suppression of `prevent_default`. The
    /// final event state is returned for inspection.
    pub fn dispatch(&self, target: NodeId, mut event: DomEvent) -> DomEvent {
        event.target = target;

        // Snapshot the path and its listeners so handler-driven mutation of
        // the tree cannot affect this dispatch.
        let path: Vec<(NodeId, Vec<ListenerEntry>)> = {
            let nodes = self.inner.nodes.read();
            let mut path = Vec::new();
            let mut cursor = Some(target);
            while let Some(id) = cursor {
                let node = match nodes.get(&id) {
                    Some(n) => n,
                    None => break,
                };
                path.push((id, node.listeners.clone()));
                cursor = node.parent;
            }
            path
        };

        let mut fired_once: Vec<(NodeId, u64)> = Vec::new();

        'capture: for (id, listeners) in path.iter().rev() {
            for entry in listeners {
                if entry.event == event.name && entry.options.capture {
                    self.run_listener(*id, entry, &mut event, &mut fired_once);
                    if event.propagation_stopped {
                        break 'capture;
                    }
                }
            }
        }
        if !event.propagation_stopped {
            'bubble: for (id, listeners) in &path {
                for entry in listeners {
                    if entry.event == event.name && !entry.options.capture {
                        self.run_listener(*id, entry, &mut event, &mut fired_once);
                        if event.propagation_stopped {
                            break 'bubble;
                        }
                    }
                }
            }
        }

        for (id, listener_id) in fired_once {
            self.remove_listener(id, listener_id);
        }
        event
    }

    fn run_listener(
        &self,
        id: NodeId,
        entry: &ListenerEntry,
        event: &mut DomEvent,
        fired_once: &mut Vec<(NodeId, u64)>,
    ) {
        event.current_target = id;
        event.in_passive = entry.options.passive;
        (entry.handler)(event);
        event.in_passive = false;
        if entry.options.once {
            fired_once.push((id, entry.id));
        }
    }

    // -- inspection -----------------------------------------------------------

    /// Serialize a subtree; intended for assertions, not for production
    /// output.
    pub fn to_html(&self, id: NodeId) -> String {
        let nodes = self.inner.nodes.read();
        let mut out = String::new();
        write_html(&nodes, id, &mut out);
        out
    }

    /// Concatenated text of a subtree.
    pub fn text_content(&self, id: NodeId) -> String {
        let nodes = self.inner.nodes.read();
        let mut out = String::new();
        collect_text(&nodes, id, &mut out);
        out
    }
}

fn detach(nodes: &mut HashMap<NodeId, Node>, id: NodeId) {
    let parent = nodes.get(&id).and_then(|n| n.parent);
    if let Some(parent) = parent {
        if let Some(parent_node) = nodes.get_mut(&parent) {
            parent_node.children.retain(|c| *c != id);
        }
        if let Some(node) = nodes.get_mut(&id) {
            node.parent = None;
        }
    }
}

fn drop_subtree(nodes: &mut HashMap<NodeId, Node>, id: NodeId) {
    if let Some(node) = nodes.remove(&id) {
        for child in node.children {
            drop_subtree(nodes, child);
        }
    }
}

fn write_html(nodes: &HashMap<NodeId, Node>, id: NodeId, out: &mut String) {
    let node = match nodes.get(&id) {
        Some(n) => n,
        None => return,
    };
    match &node.kind {
        NodeKind::Text(text) => out.push_str(&escape(text)),
        NodeKind::Element { tag, attrs, style } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape(value));
                out.push('"');
            }
            if !style.is_empty() {
                out.push_str(" style=\"");
                let mut first = true;
                for (prop, value) in style {
                    if !first {
                        out.push_str("; ");
                    }
                    first = false;
                    out.push_str(prop);
                    out.push_str(": ");
                    out.push_str(value);
                }
                out.push('"');
            }
            out.push('>');
            for child in &node.children {
                write_html(nodes, *child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

fn collect_text(nodes: &HashMap<NodeId, Node>, id: NodeId, out: &mut String) {
    let node = match nodes.get(&id) {
        Some(n) => n,
        None => return,
    };
    match &node.kind {
        NodeKind::Text(text) => out.push_str(text),
        NodeKind::Element { .. } => {
            for child in &node.children {
                collect_text(nodes, *child, out);
            }
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;")
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A synthetic event fed through `Document::dispatch`.
#[derive(Debug, Clone)]
pub struct DomEvent {
    pub name: String,
    pub key: Option<String>,
    pub key_code: Option<u32>,
    pub button: Option<u8>,
    pub ctrl_key: bool,
    pub shift_key: bool,
    pub alt_key: bool,
    pub meta_key: bool,
    pub target: NodeId,
    pub current_target: NodeId,
    propagation_stopped: bool,
    default_prevented: bool,
    in_passive: bool,
}

impl DomEvent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: None,
            key_code: None,
            button: None,
            ctrl_key: false,
            shift_key: false,
            alt_key: false,
            meta_key: false,
            target: 0,
            current_target: 0,
            propagation_stopped: false,
            default_prevented: false,
            in_passive: false,
        }
    }

    pub fn with_key(mut self, key: &str, code: u32) -> Self {
        self.key = Some(key.to_string());
        self.key_code = Some(code);
        self
    }

    pub fn with_button(mut self, button: u8) -> Self {
        self.button = Some(button);
        self
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl_key = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift_key = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt_key = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta_key = true;
        self
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    /// No-op inside a passive listener, matching platform behavior.
    pub fn prevent_default(&mut self) {
        if self.in_passive {
            warn!(event = %self.name, "prevent_default ignored in passive listener");
            return;
        }
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// The `$event` value handed to expression scope and method arguments.
    pub fn payload(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert("type".to_string(), Value::Str(self.name.clone()));
        if let Some(key) = &self.key {
            map.insert("key".to_string(), Value::Str(key.clone()));
        }
        if let Some(code) = self.key_code {
            map.insert("keyCode".to_string(), Value::Num(code as f64));
        }
        if let Some(button) = self.button {
            map.insert("button".to_string(), Value::Num(button as f64));
        }
        map.insert("ctrlKey".to_string(), Value::Bool(self.ctrl_key));
        map.insert("shiftKey".to_string(), Value::Bool(self.shift_key));
        map.insert("altKey".to_string(), Value::Bool(self.alt_key));
        map.insert("metaKey".to_string(), Value::Bool(self.meta_key));
        Value::Map(map)
    }
}
