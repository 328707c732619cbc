//! Tree Reconciliation
//!
//! Applies the difference between two render trees to the document.
//! Same-typed nodes (equal tag and key) are patched in place; anything
//! else is replaced. Child lists reconcile with the classic two-ended
//! keyed diff: four cursors walk the old and new lists from both ends,
//! and when no end pair matches, a key-to-index map of the old list
//! resolves moves. Moved-out old slots are blanked so the map's indices
//! stay valid.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;

use super::vnode::{same_vnode, VNode};
use crate::dom::{Document, NodeId};
use crate::instance;
use crate::value::Value;

/// Initial mount: materialize `vnode` and replace `target` with it in the
/// document. Returns the new root node.
pub fn mount_replace(doc: &Document, target: NodeId, vnode: &Arc<VNode>) -> NodeId {
    let el = create_node(doc, vnode);
    doc.replace_node(target, el);
    el
}

/// Materialize a vnode subtree into document nodes.
pub fn create_node(doc: &Document, vnode: &Arc<VNode>) -> NodeId {
    if let Some(def) = &vnode.component {
        return create_component(doc, vnode, def);
    }
    match &vnode.tag {
        Some(tag) => {
            let el = doc.create_element(tag);
            vnode.set_el(el);
            update_properties(doc, el, vnode, None);
            instance::attach_handlers(doc, el, vnode);
            for child in &vnode.children {
                let child_el = create_node(doc, child);
                doc.append_child(el, child_el);
            }
            el
        }
        None => {
            let el = doc.create_text(vnode.text.as_deref().unwrap_or(""));
            vnode.set_el(el);
            el
        }
    }
}

/// Mount a child component and adopt its root element. A child that fails
/// to mount degrades to an empty text node so the parent tree still
/// renders.
fn create_component(
    doc: &Document,
    vnode: &Arc<VNode>,
    def: &Arc<instance::ComponentDef>,
) -> NodeId {
    match instance::Instance::mount_child(def, doc, &vnode.data) {
        Ok(child) => {
            let el = child.root_el().unwrap_or_else(|| doc.create_text(""));
            vnode.set_el(el);
            instance::attach_component_handlers(doc, el, vnode, &child);
            vnode.set_instance(child);
            el
        }
        Err(err) => {
            error!(component = def.name(), %err, "child component failed to mount");
            let el = doc.create_text("");
            vnode.set_el(el);
            el
        }
    }
}

/// Reconcile `new` against the already-materialized `old`.
pub fn patch(doc: &Document, old: &Arc<VNode>, new: &Arc<VNode>) {
    let old_el = match old.el() {
        Some(el) => el,
        None => return,
    };

    if !same_vnode(old, new) {
        let new_el = create_node(doc, new);
        doc.replace_node(old_el, new_el);
        destroy_subtree(old);
        return;
    }

    // Same component node type: the child instance keeps itself current
    // through its own render watcher, so just carry it forward.
    if new.component.is_some() {
        new.set_el(old_el);
        if let Some(child) = old.instance() {
            new.set_instance(child);
        }
        return;
    }

    if old.is_text() && new.is_text() {
        if old.text != new.text {
            doc.set_text(old_el, new.text.as_deref().unwrap_or(""));
        }
        new.set_el(old_el);
        return;
    }

    new.set_el(old_el);
    update_properties(doc, old_el, new, Some(old));

    // Listener bindings capture loop frames, so they are rebound on every
    // patch rather than diffed.
    for id in old.take_listener_ids() {
        doc.remove_listener(old_el, id);
    }
    instance::attach_handlers(doc, old_el, new);

    let old_children = &old.children;
    let new_children = &new.children;
    if !old_children.is_empty() && !new_children.is_empty() {
        update_children(doc, old_el, old_children, new_children);
    } else if !old_children.is_empty() {
        for child in old_children {
            destroy_subtree(child);
        }
        doc.clear_children(old_el);
    } else if !new_children.is_empty() {
        for child in new_children {
            let child_el = create_node(doc, child);
            doc.append_child(old_el, child_el);
        }
    }
}

/// Sync attributes, class, and styles, removing what the new node no
/// longer carries. Class and style each get a dedicated pass: style
/// entries write per-property, class bindings normalize list and map
/// forms to a class string and clear the attribute when empty.
fn update_properties(doc: &Document, el: NodeId, new: &VNode, old: Option<&VNode>) {
    if let Some(old) = old {
        for name in old.data.attrs.keys() {
            if !new.data.attrs.contains_key(name) {
                doc.remove_attribute(el, name);
            }
        }
        for prop in old.data.style.keys() {
            if !new.data.style.contains_key(prop) {
                doc.set_style(el, prop, "");
            }
        }
    }
    for (name, value) in &new.data.attrs {
        if name == "class" {
            doc.set_class(el, &class_text(value));
        } else {
            doc.set_attribute(el, name, &value.stringify());
        }
    }
    for (prop, value) in &new.data.style {
        doc.set_style(el, prop, value);
    }
}

/// Normalize a class binding: a list joins its entries, a map keeps the
/// keys whose values are truthy, anything else renders as text.
fn class_text(value: &Value) -> String {
    match value {
        Value::List(items) => items
            .iter()
            .map(class_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Map(entries) => entries
            .iter()
            .filter(|(_, enabled)| enabled.is_truthy())
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>()
            .join(" "),
        other => other.stringify(),
    }
}

/// Destroy every component instance mounted anywhere in a vnode subtree.
pub(crate) fn destroy_subtree(vnode: &VNode) {
    if let Some(child) = vnode.instance() {
        child.destroy();
    }
    for child in &vnode.children {
        destroy_subtree(child);
    }
}

fn remove_vnode(doc: &Document, vnode: &VNode) {
    if let Some(child) = vnode.instance() {
        // The child removes its own root element.
        child.destroy();
        return;
    }
    for child in &vnode.children {
        destroy_subtree(child);
    }
    if let Some(el) = vnode.el() {
        doc.remove_node(el);
    }
}

/// Index old keyed children for the move fallback.
fn make_key_index(children: &[Arc<VNode>]) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (index, child) in children.iter().enumerate() {
        if let Some(key) = &child.key {
            map.insert(key.stringify(), index);
        }
    }
    map
}

/// Two-ended keyed diff of sibling lists. Cursors are signed because both
/// end cursors legitimately walk past zero when a list is consumed.
fn update_children(
    doc: &Document,
    parent: NodeId,
    old_ch: &[Arc<VNode>],
    new_ch: &[Arc<VNode>],
) {
    let mut old: Vec<Option<Arc<VNode>>> = old_ch.iter().cloned().map(Some).collect();
    let key_index = make_key_index(old_ch);

    let mut old_start: isize = 0;
    let mut old_end: isize = old_ch.len() as isize - 1;
    let mut new_start: isize = 0;
    let mut new_end: isize = new_ch.len() as isize - 1;

    while old_start <= old_end && new_start <= new_end {
        let old_start_vnode = match &old[old_start as usize] {
            Some(v) => Arc::clone(v),
            None => {
                // Blanked by an earlier move.
                old_start += 1;
                continue;
            }
        };
        let old_end_vnode = match &old[old_end as usize] {
            Some(v) => Arc::clone(v),
            None => {
                old_end -= 1;
                continue;
            }
        };
        let new_start_vnode = &new_ch[new_start as usize];
        let new_end_vnode = &new_ch[new_end as usize];

        if same_vnode(&old_start_vnode, new_start_vnode) {
            patch(doc, &old_start_vnode, new_start_vnode);
            old_start += 1;
            new_start += 1;
        } else if same_vnode(&old_end_vnode, new_end_vnode) {
            patch(doc, &old_end_vnode, new_end_vnode);
            old_end -= 1;
            new_end -= 1;
        } else if same_vnode(&old_start_vnode, new_end_vnode) {
            // Old head moved to the tail.
            patch(doc, &old_start_vnode, new_end_vnode);
            if let Some(el) = old_start_vnode.el() {
                let anchor = old_end_vnode.el().and_then(|e| doc.next_sibling(e));
                doc.insert_before(parent, el, anchor);
            }
            old_start += 1;
            new_end -= 1;
        } else if same_vnode(&old_end_vnode, new_start_vnode) {
            // Old tail moved to the head.
            patch(doc, &old_end_vnode, new_start_vnode);
            if let (Some(el), Some(anchor)) = (old_end_vnode.el(), old_start_vnode.el()) {
                doc.insert_before(parent, el, Some(anchor));
            }
            old_end -= 1;
            new_start += 1;
        } else {
            // No end pair matched: look the new head up in the old key map.
            let anchor = old_start_vnode.el();
            let move_index = new_start_vnode
                .key
                .as_ref()
                .and_then(|k| key_index.get(&k.stringify()).copied())
                .filter(|i| old[*i].is_some());
            match move_index {
                Some(i) => {
                    if let Some(moved) = old[i].take() {
                        if let Some(el) = moved.el() {
                            doc.insert_before(parent, el, anchor);
                        }
                        patch(doc, &moved, new_start_vnode);
                    }
                }
                None => {
                    let el = create_node(doc, new_start_vnode);
                    doc.insert_before(parent, el, anchor);
                }
            }
            new_start += 1;
        }
    }

    // Leftover new nodes: insert before the node that follows the new
    // range, or append.
    if new_start <= new_end {
        let anchor = new_ch
            .get((new_end + 1) as usize)
            .and_then(|v| v.el());
        for vnode in &new_ch[new_start as usize..=new_end as usize] {
            let el = create_node(doc, vnode);
            doc.insert_before(parent, el, anchor);
        }
    }

    // Leftover old nodes: remove the ones not blanked by moves.
    if old_start <= old_end {
        for slot in &old[old_start as usize..=old_end as usize] {
            if let Some(vnode) = slot {
                remove_vnode(doc, vnode);
            }
        }
    }
}
