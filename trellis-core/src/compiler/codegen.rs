//! Render Program Generation
//!
//! Lowers the parsed template tree into a `RenderOp` program: a typed,
//! immutable description of how to build a virtual tree from component
//! state. The source framework emitted render-function source text and
//! evaluated it dynamically; here the program is data, walked by
//! `render_root` against the owning instance on every render.
//!
//! Lowering resolves everything that does not depend on state: expression
//! sources are parsed to ASTs, `{{ ... }}` interpolations are split out of
//! text, handler sources are classified as method references or inline
//! statements, and the `key` attribute is hoisted out of the attribute
//! list.

use std::sync::Arc;

use indexmap::IndexMap;

use super::expr::{self, EvalError, Expr, Scope, Stmt};
use super::parser::{
    AstNode, Attr, AttrValue, Element, EventAttr, EventModifiers, KeyFilter,
};
use super::CompileError;
use crate::instance::Instance;
use crate::reactive::ObservedValue;
use crate::value::Value;
use crate::vdom::{HandlerBinding, VNode, VNodeData};

/// An attribute value source: fixed at compile time or re-evaluated per
/// render.
#[derive(Debug, Clone)]
pub enum BoundValue {
    Static(Value),
    StaticStyle(IndexMap<String, String>),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct RenderAttr {
    pub name: String,
    pub value: BoundValue,
}

/// What to run when an event binding fires.
#[derive(Debug, Clone)]
pub enum HandlerCode {
    /// Bare method reference (`@click="add"`); invoked with the event
    /// payload as its argument.
    Method(String),
    /// Inline statement (`@click="count = count + 1"`); `$event` is in
    /// scope.
    Inline(Stmt),
}

/// A compiled event binding, shared between the program and every vnode
/// rendered from it.
#[derive(Debug)]
pub struct HandlerSpec {
    pub event: String,
    pub modifiers: EventModifiers,
    pub key_filters: Vec<KeyFilter>,
    pub code: HandlerCode,
}

/// One segment of a text node.
#[derive(Debug, Clone)]
pub enum TextPart {
    Literal(String),
    Interp(Expr),
}

/// `v-for` lowered: the iterable expression plus binding names.
#[derive(Debug, Clone)]
pub struct RepeatOp {
    pub alias: String,
    pub index: Option<String>,
    pub extra: Option<String>,
    pub list: Expr,
}

#[derive(Debug)]
pub enum RenderOp {
    Element(ElementOp),
    Text(Vec<TextPart>),
}

#[derive(Debug)]
pub struct ElementOp {
    pub tag: String,
    pub key: Option<BoundValue>,
    pub attrs: Vec<RenderAttr>,
    pub handlers: Vec<Arc<HandlerSpec>>,
    pub repeat: Option<RepeatOp>,
    pub children: Vec<RenderOp>,
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

/// Lower a parsed template to its render program.
pub fn generate(root: &Element) -> Result<ElementOp, CompileError> {
    gen_element(root)
}

fn gen_element(el: &Element) -> Result<ElementOp, CompileError> {
    let mut key = None;
    let mut attrs = Vec::new();
    for attr in &el.attrs {
        let value = gen_attr_value(attr)?;
        if attr.name == "key" {
            key = Some(value);
        } else {
            attrs.push(RenderAttr {
                name: attr.name.clone(),
                value,
            });
        }
    }

    let mut handlers = Vec::with_capacity(el.events.len());
    for event in &el.events {
        handlers.push(Arc::new(gen_handler(event)?));
    }

    let repeat = match &el.vfor {
        Some(vfor) => Some(RepeatOp {
            alias: vfor.alias.clone(),
            index: vfor.index.clone(),
            extra: vfor.extra.clone(),
            list: parse_expression(&vfor.list_src)?,
        }),
        None => None,
    };

    let mut children = Vec::new();
    for child in &el.children {
        match child {
            AstNode::Element(child_el) => {
                children.push(RenderOp::Element(gen_element(child_el)?));
            }
            AstNode::Text(text) => {
                children.push(RenderOp::Text(gen_text(text)?));
            }
        }
    }

    Ok(ElementOp {
        tag: el.tag.clone(),
        key,
        attrs,
        handlers,
        repeat,
        children,
    })
}

fn gen_attr_value(attr: &Attr) -> Result<BoundValue, CompileError> {
    Ok(match &attr.value {
        AttrValue::Static(s) => BoundValue::Static(Value::Str(s.clone())),
        AttrValue::StaticStyle(style) => BoundValue::StaticStyle(style.clone()),
        AttrValue::Bound(src) => BoundValue::Expr(parse_expression(src)?),
    })
}

fn gen_handler(event: &EventAttr) -> Result<HandlerSpec, CompileError> {
    let code = if is_method_name(&event.src) {
        HandlerCode::Method(event.src.trim().to_string())
    } else {
        let stmt = expr::parse_stmt(&event.src).map_err(|e| CompileError::BadExpression {
            src: event.src.clone(),
            message: e.to_string(),
        })?;
        HandlerCode::Inline(stmt)
    };
    Ok(HandlerSpec {
        event: event.event.clone(),
        modifiers: event.modifiers,
        key_filters: event.key_filters.clone(),
        code,
    })
}

fn is_method_name(src: &str) -> bool {
    let src = src.trim();
    !src.is_empty()
        && src
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c == '$' || if i == 0 { c.is_alphabetic() } else { c.is_alphanumeric() })
}

/// Split `hello {{ name }}!` into literal and interpolation parts.
fn gen_text(text: &str) -> Result<Vec<TextPart>, CompileError> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            parts.push(TextPart::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or_else(|| CompileError::BadExpression {
            src: text.to_string(),
            message: "unterminated interpolation".to_string(),
        })?;
        parts.push(TextPart::Interp(parse_expression(&after[..close])?));
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        parts.push(TextPart::Literal(rest.to_string()));
    }
    if parts.is_empty() {
        parts.push(TextPart::Literal(String::new()));
    }
    Ok(parts)
}

fn parse_expression(src: &str) -> Result<Expr, CompileError> {
    expr::parse_expr(src.trim()).map_err(|e| CompileError::BadExpression {
        src: src.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Build a virtual tree from a render program and the owning instance.
/// Dependency registration happens implicitly: data reads during
/// evaluation register the active watcher.
pub fn render_root(op: &ElementOp, instance: &Arc<Instance>) -> Result<Arc<VNode>, EvalError> {
    let mut scope = Scope::new(&**instance);
    render_element(op, instance, &mut scope)
}

fn render_element(
    op: &ElementOp,
    instance: &Arc<Instance>,
    scope: &mut Scope<'_>,
) -> Result<Arc<VNode>, EvalError> {
    let mut data = VNodeData::default();

    if let Some(key) = &op.key {
        data.key = Some(eval_bound(key, scope)?);
    }
    for attr in &op.attrs {
        let value = eval_bound(&attr.value, scope)?;
        if attr.name == "style" {
            merge_style(&mut data.style, value);
        } else {
            data.attrs.insert(attr.name.clone(), value);
        }
    }
    for spec in &op.handlers {
        data.on.push(HandlerBinding {
            spec: Arc::clone(spec),
            frames: scope.frames().to_vec(),
        });
    }

    let mut children = Vec::new();
    for child in &op.children {
        render_child(child, instance, scope, &mut children)?;
    }

    crate::vdom::create_element(instance, &op.tag, data, children)
}

fn render_child(
    op: &RenderOp,
    instance: &Arc<Instance>,
    scope: &mut Scope<'_>,
    out: &mut Vec<Arc<VNode>>,
) -> Result<(), EvalError> {
    match op {
        RenderOp::Text(parts) => {
            let mut text = String::new();
            for part in parts {
                match part {
                    TextPart::Literal(s) => text.push_str(s),
                    TextPart::Interp(e) => {
                        text.push_str(&expr::eval(e, scope)?.snapshot().stringify());
                    }
                }
            }
            out.push(VNode::text(text));
            Ok(())
        }
        RenderOp::Element(el) => match &el.repeat {
            Some(repeat) => render_repeat(el, repeat, instance, scope, out),
            None => {
                out.push(render_element(el, instance, scope)?);
                Ok(())
            }
        },
    }
}

/// Expand one `v-for` element into zero or more vnodes. Lists iterate
/// (item, index), maps iterate (value, key, index), numbers iterate
/// 1..=n.
fn render_repeat(
    el: &ElementOp,
    repeat: &RepeatOp,
    instance: &Arc<Instance>,
    scope: &mut Scope<'_>,
    out: &mut Vec<Arc<VNode>>,
) -> Result<(), EvalError> {
    let source = expr::eval(&repeat.list, scope)?;
    match &source {
        ObservedValue::List(list) => {
            for (i, item) in list.iter_snapshot().into_iter().enumerate() {
                let mut frame = IndexMap::new();
                frame.insert(repeat.alias.clone(), item);
                if let Some(index) = &repeat.index {
                    frame.insert(index.clone(), ObservedValue::Scalar(Value::Num(i as f64)));
                }
                render_framed(el, instance, scope, frame, out)?;
            }
        }
        ObservedValue::Object(obj) => {
            for (i, field) in obj.keys().into_iter().enumerate() {
                let value = obj
                    .field(&field)
                    .map(|cell| cell.get())
                    .unwrap_or(ObservedValue::Scalar(Value::Null));
                let mut frame = IndexMap::new();
                frame.insert(repeat.alias.clone(), value);
                if let Some(index) = &repeat.index {
                    frame.insert(index.clone(), ObservedValue::Scalar(Value::Str(field)));
                }
                if let Some(extra) = &repeat.extra {
                    frame.insert(extra.clone(), ObservedValue::Scalar(Value::Num(i as f64)));
                }
                render_framed(el, instance, scope, frame, out)?;
            }
        }
        ObservedValue::Scalar(Value::Num(n)) => {
            let count = if n.is_finite() && *n > 0.0 { *n as usize } else { 0 };
            for i in 1..=count {
                let mut frame = IndexMap::new();
                frame.insert(
                    repeat.alias.clone(),
                    ObservedValue::Scalar(Value::Num(i as f64)),
                );
                if let Some(index) = &repeat.index {
                    frame.insert(
                        index.clone(),
                        ObservedValue::Scalar(Value::Num((i - 1) as f64)),
                    );
                }
                render_framed(el, instance, scope, frame, out)?;
            }
        }
        ObservedValue::Scalar(_) => {}
    }
    Ok(())
}

fn render_framed(
    el: &ElementOp,
    instance: &Arc<Instance>,
    scope: &mut Scope<'_>,
    frame: IndexMap<String, ObservedValue>,
    out: &mut Vec<Arc<VNode>>,
) -> Result<(), EvalError> {
    scope.push_frame(frame);
    let result = render_element(el, instance, scope);
    scope.pop_frame();
    out.push(result?);
    Ok(())
}

fn eval_bound(value: &BoundValue, scope: &Scope<'_>) -> Result<Value, EvalError> {
    Ok(match value {
        BoundValue::Static(v) => v.clone(),
        BoundValue::StaticStyle(style) => Value::Map(
            style
                .iter()
                .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
                .collect(),
        ),
        BoundValue::Expr(e) => expr::eval(e, scope)?.snapshot(),
    })
}

fn merge_style(style: &mut IndexMap<String, String>, value: Value) {
    if let Value::Map(map) = value {
        for (k, v) in map {
            style.insert(k, v.stringify());
        }
    }
}
