//! Virtual DOM
//!
//! Immutable render trees (`vnode`) and the diff that reconciles two of
//! them against the document (`patch`). `create_element` is the factory
//! the render program calls for every element it emits: reserved HTML
//! tags become plain element nodes, anything else must name a registered
//! child component.

pub mod patch;
pub mod vnode;

use std::sync::Arc;

pub use patch::{mount_replace, patch};
pub use vnode::{same_vnode, HandlerBinding, VNode, VNodeData};

use crate::compiler::EvalError;
use crate::instance::Instance;

/// Standard HTML tags rendered as plain elements; anything outside this
/// set resolves through the component registry.
const RESERVED_TAGS: &[&str] = &[
    "html", "body", "base", "head", "link", "meta", "style", "title", "address", "article",
    "aside", "footer", "header", "h1", "h2", "h3", "h4", "h5", "h6", "hgroup", "nav", "section",
    "div", "dd", "dl", "dt", "figcaption", "figure", "picture", "hr", "img", "li", "main", "ol",
    "p", "pre", "ul", "a", "b", "abbr", "bdi", "bdo", "br", "cite", "code", "data", "dfn", "em",
    "i", "kbd", "mark", "q", "rp", "rt", "rtc", "ruby", "s", "samp", "small", "span", "strong",
    "sub", "sup", "time", "u", "var", "wbr", "area", "audio", "map", "track", "video", "embed",
    "object", "param", "source", "canvas", "script", "noscript", "del", "ins", "caption", "col",
    "colgroup", "table", "thead", "tbody", "td", "th", "tr", "button", "datalist", "fieldset",
    "form", "input", "label", "legend", "meter", "optgroup", "option", "output", "progress",
    "select", "textarea", "details", "dialog", "menu", "menuitem", "summary", "content",
    "element", "shadow", "template", "blockquote", "iframe", "tfoot",
];

pub fn is_reserved_tag(tag: &str) -> bool {
    RESERVED_TAGS.contains(&tag)
}

/// Build a vnode for one rendered element. Reserved tags become element
/// nodes; other tags must resolve to a component registered on the
/// rendering instance.
pub fn create_element(
    instance: &Arc<Instance>,
    tag: &str,
    data: VNodeData,
    children: Vec<Arc<VNode>>,
) -> Result<Arc<VNode>, EvalError> {
    if is_reserved_tag(tag) {
        return Ok(VNode::element(tag, data, children, Arc::downgrade(instance)));
    }
    let def = instance
        .component(tag)
        .ok_or_else(|| EvalError::UnknownComponent(tag.to_string()))?;
    // The placeholder tag folds in the definition id so the diff treats
    // distinct components as distinct node types.
    let placeholder = format!("component-{}-{}", def.cid(), tag);
    Ok(VNode::component(
        placeholder,
        def,
        data,
        Arc::downgrade(instance),
    ))
}
