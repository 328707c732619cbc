//! Virtual Nodes
//!
//! A `VNode` is one immutable description of a rendered node: element,
//! text, or mounted child component. Nodes are rebuilt wholesale on every
//! render; only the patcher-owned slots (`el`, the component instance,
//! attached listener ids) use interior mutability, because they are filled
//! in after construction when the node meets the document.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::compiler::HandlerSpec;
use crate::dom::NodeId;
use crate::instance::{ComponentDef, Instance};
use crate::reactive::ObservedValue;
use crate::value::Value;

/// An event binding captured at render time: the compiled handler plus the
/// loop frames that were in scope where it appeared.
#[derive(Clone)]
pub struct HandlerBinding {
    pub spec: Arc<HandlerSpec>,
    pub frames: Vec<IndexMap<String, ObservedValue>>,
}

/// Evaluated per-render element data.
#[derive(Default, Clone)]
pub struct VNodeData {
    pub key: Option<Value>,
    pub attrs: IndexMap<String, Value>,
    pub style: IndexMap<String, String>,
    pub on: Vec<HandlerBinding>,
}

pub struct VNode {
    /// `None` for text nodes.
    pub tag: Option<String>,
    pub data: VNodeData,
    /// Copy of `data.key`, hoisted for the keyed diff.
    pub key: Option<Value>,
    pub children: Vec<Arc<VNode>>,
    pub text: Option<String>,
    /// The instance whose render produced this node.
    pub context: Weak<Instance>,
    /// Set for component nodes; drives child mounting in the patcher.
    pub component: Option<Arc<ComponentDef>>,

    el: RwLock<Option<NodeId>>,
    instance: RwLock<Option<Arc<Instance>>>,
    listener_ids: RwLock<Vec<u64>>,
}

impl VNode {
    pub fn element(
        tag: &str,
        data: VNodeData,
        children: Vec<Arc<VNode>>,
        context: Weak<Instance>,
    ) -> Arc<Self> {
        let key = data.key.clone();
        Arc::new(Self {
            tag: Some(tag.to_string()),
            data,
            key,
            children,
            text: None,
            context,
            component: None,
            el: RwLock::new(None),
            instance: RwLock::new(None),
            listener_ids: RwLock::new(Vec::new()),
        })
    }

    pub fn text(text: String) -> Arc<Self> {
        Arc::new(Self {
            tag: None,
            data: VNodeData::default(),
            key: None,
            children: Vec::new(),
            text: Some(text),
            context: Weak::new(),
            component: None,
            el: RwLock::new(None),
            instance: RwLock::new(None),
            listener_ids: RwLock::new(Vec::new()),
        })
    }

    pub fn component(
        placeholder_tag: String,
        def: Arc<ComponentDef>,
        data: VNodeData,
        context: Weak<Instance>,
    ) -> Arc<Self> {
        let key = data.key.clone();
        Arc::new(Self {
            tag: Some(placeholder_tag),
            data,
            key,
            children: Vec::new(),
            text: None,
            context,
            component: Some(def),
            el: RwLock::new(None),
            instance: RwLock::new(None),
            listener_ids: RwLock::new(Vec::new()),
        })
    }

    pub fn el(&self) -> Option<NodeId> {
        *self.el.read()
    }

    pub fn set_el(&self, el: NodeId) {
        *self.el.write() = Some(el);
    }

    pub fn instance(&self) -> Option<Arc<Instance>> {
        self.instance.read().clone()
    }

    pub fn set_instance(&self, instance: Arc<Instance>) {
        *self.instance.write() = Some(instance);
    }

    pub fn is_text(&self) -> bool {
        self.tag.is_none()
    }

    pub fn push_listener_id(&self, id: u64) {
        self.listener_ids.write().push(id);
    }

    pub fn take_listener_ids(&self) -> Vec<u64> {
        std::mem::take(&mut *self.listener_ids.write())
    }
}

/// Two vnodes describe the same node when tag and key agree; the diff
/// patches them in place instead of replacing.
pub fn same_vnode(a: &VNode, b: &VNode) -> bool {
    a.tag == b.tag && a.key == b.key
}

impl std::fmt::Debug for VNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.tag, &self.text) {
            (Some(tag), _) => f
                .debug_struct("VNode")
                .field("tag", tag)
                .field("key", &self.key)
                .field("children", &self.children.len())
                .finish(),
            (None, text) => f.debug_struct("VNode").field("text", text).finish(),
        }
    }
}
