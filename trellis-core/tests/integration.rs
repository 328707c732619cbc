//! Integration Tests for the Component Pipeline
//!
//! These tests exercise the full stack end to end: template compilation,
//! reactive data, batched re-rendering, keyed list reconciliation, event
//! dispatch, and nested components.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::json;
use trellis_core::dom::{Document, DomEvent};
use trellis_core::instance::{ComponentDef, ComponentOptions, Instance};
use trellis_core::reactive::{del, set, tick, ObservedValue};
use trellis_core::value::Value;
use trellis_core::vdom::{mount_replace, patch, VNode, VNodeData};

fn mount(def: &Arc<ComponentDef>) -> (Document, Arc<Instance>) {
    let doc = Document::new();
    let target = doc.create_element("div");
    doc.append_child(doc.body(), target);
    let inst = Instance::mount(def, &doc, target).expect("mount");
    (doc, inst)
}

fn list_of(inst: &Arc<Instance>, field: &str) -> Arc<trellis_core::reactive::ObservedList> {
    match inst.data() {
        ObservedValue::Object(obj) => match obj.field(field).map(|cell| cell.get()) {
            Some(ObservedValue::List(list)) => list,
            other => panic!("expected list in `{field}`, got {other:?}"),
        },
        other => panic!("expected object data, got {other:?}"),
    }
}

/// A burst of synchronous writes produces exactly one re-render.
#[test]
fn writes_are_batched_into_one_render() {
    let renders = Arc::new(AtomicI32::new(0));
    let renders_clone = renders.clone();
    let def = ComponentDef::new(
        "batched",
        ComponentOptions::new()
            .template("<div>{{ a }}-{{ b }}-{{ c }}</div>")
            .data(Value::from(json!({ "a": 1, "b": 2, "c": 3 })))
            .updated(move |_| {
                renders_clone.fetch_add(1, Ordering::SeqCst);
            }),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();

    inst.assign("a", Value::Num(10.0)).unwrap();
    inst.assign("b", Value::Num(20.0)).unwrap();
    inst.assign("c", Value::Num(30.0)).unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 0);

    tick();
    assert_eq!(doc.text_content(root), "10-20-30");
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    // Writing the same value again is a no-op: no render.
    inst.assign("a", Value::Num(10.0)).unwrap();
    tick();
    assert_eq!(renders.load(Ordering::SeqCst), 1);
}

/// Bound attributes and styles follow data updates, and stale entries are
/// removed.
#[test]
fn bound_attributes_and_styles_update() {
    let def = ComponentDef::new(
        "styled",
        ComponentOptions::new()
            .template(r#"<div :class="kind" :style="look">x</div>"#)
            .data(Value::from(json!({
                "kind": "warm",
                "look": { "color": "red", "margin": "4px" }
            }))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    assert_eq!(doc.attribute(root, "class").as_deref(), Some("warm"));
    assert_eq!(doc.style(root, "color").as_deref(), Some("red"));

    inst.assign("kind", Value::Str("cool".into())).unwrap();
    inst.assign(
        "look",
        Value::from(json!({ "color": "blue" })),
    )
    .unwrap();
    tick();
    assert_eq!(doc.attribute(root, "class").as_deref(), Some("cool"));
    assert_eq!(doc.style(root, "color").as_deref(), Some("blue"));
    // `margin` is gone from the binding, so it is gone from the node.
    assert_eq!(doc.style(root, "margin"), None);
}

/// v-for over a list renders one node per element with alias and index in
/// scope.
#[test]
fn v_for_renders_list_items() {
    let def = ComponentDef::new(
        "listing",
        ComponentOptions::new()
            .template(
                r#"<ul><li v-for="(item, i) in items">{{ i }}:{{ item }}</li></ul>"#,
            )
            .data(Value::from(json!({ "items": ["a", "b", "c"] }))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    assert_eq!(doc.text_content(root), "0:a1:b2:c");

    list_of(&inst, "items").push(Value::Str("d".into()));
    tick();
    assert_eq!(doc.text_content(root), "0:a1:b2:c3:d");
}

/// Text keeps embedded quotes end to end: literal quotes in template
/// text and escaped quotes inside expression string literals both come
/// out verbatim.
#[test]
fn quoted_text_renders_verbatim() {
    let def = ComponentDef::new(
        "quoted",
        ComponentOptions::new().template(r#"<p>she said "ok", {{ 'it\'s "here"' }}</p>"#),
    );
    let (doc, inst) = mount(&def);
    assert_eq!(
        doc.text_content(inst.root_el().unwrap()),
        r#"she said "ok", it's "here""#
    );
}

/// Keyed reordering moves the existing document nodes instead of
/// recreating them.
#[test]
fn keyed_reorder_reuses_nodes() {
    let def = ComponentDef::new(
        "keyed",
        ComponentOptions::new()
            .template(
                r#"<ul><li v-for="item in items" :key="item.id">{{ item.label }}</li></ul>"#,
            )
            .data(Value::from(json!({ "items": [
                { "id": 1, "label": "one" },
                { "id": 2, "label": "two" },
                { "id": 3, "label": "three" }
            ]}))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    let before = doc.children(root);
    assert_eq!(before.len(), 3);

    list_of(&inst, "items").reverse();
    tick();

    let after = doc.children(root);
    assert_eq!(doc.text_content(root), "threetwoone");
    let mut expected = before.clone();
    expected.reverse();
    assert_eq!(after, expected);
}

/// Mixed insert, remove, and move in one update settles to the new order.
#[test]
fn keyed_diff_handles_mixed_changes() {
    let def = ComponentDef::new(
        "mixed",
        ComponentOptions::new()
            .template(
                r#"<ul><li v-for="item in items" :key="item.id">{{ item.id }}</li></ul>"#,
            )
            .data(Value::from(json!({ "items": [
                { "id": "a" }, { "id": "b" }, { "id": "c" }, { "id": "d" }
            ]}))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();

    // b and d survive, c is dropped, e and f are new, order scrambled.
    inst.assign(
        "items",
        Value::from(json!([
            { "id": "d" }, { "id": "e" }, { "id": "b" }, { "id": "f" }
        ])),
    )
    .unwrap();
    tick();
    assert_eq!(doc.text_content(root), "debf");
    assert_eq!(doc.children(root).len(), 4);
}

/// A tag mismatch replaces the document node outright: the replacement
/// has a fresh identity and the old node leaves the document.
#[test]
fn tag_mismatch_replaces_node() {
    let doc = Document::new();
    let target = doc.create_element("div");
    doc.append_child(doc.body(), target);

    let old = VNode::element(
        "div",
        VNodeData::default(),
        vec![VNode::text("old".into())],
        Weak::new(),
    );
    let mounted = mount_replace(&doc, target, &old);
    assert_eq!(doc.tag(mounted).as_deref(), Some("div"));

    let new = VNode::element(
        "span",
        VNodeData::default(),
        vec![VNode::text("new".into())],
        Weak::new(),
    );
    patch(&doc, &old, &new);

    let replacement = new.el().expect("replacement element");
    assert_ne!(replacement, mounted);
    assert_eq!(doc.tag(replacement).as_deref(), Some("span"));
    assert_eq!(doc.text_content(replacement), "new");
    assert_eq!(doc.children(doc.body()), vec![replacement]);
    // The mismatched node and its subtree are gone.
    assert_eq!(doc.tag(mounted), None);
}

/// Removing a middle keyed row removes exactly that row's document node;
/// the surviving rows keep their identity.
#[test]
fn keyed_removal_preserves_sibling_nodes() {
    let def = ComponentDef::new(
        "shrinking",
        ComponentOptions::new()
            .template(
                r#"<ul><li v-for="item in items" :key="item.id">{{ item.id }}</li></ul>"#,
            )
            .data(Value::from(json!({ "items": [
                { "id": "a" }, { "id": "b" }, { "id": "c" }
            ]}))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    let before = doc.children(root);
    assert_eq!(before.len(), 3);

    list_of(&inst, "items").remove_index(1);
    tick();

    assert_eq!(doc.text_content(root), "ac");
    assert_eq!(doc.children(root), vec![before[0], before[2]]);
}

/// List mutators and index writes picked up through the reactive list.
#[test]
fn list_mutators_trigger_renders() {
    let def = ComponentDef::new(
        "mutators",
        ComponentOptions::new()
            .template(r#"<ol><li v-for="n in nums">{{ n }}</li></ol>"#)
            .data(Value::from(json!({ "nums": [3, 1, 2] }))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    let nums = list_of(&inst, "nums");

    nums.sort_by(|a, b| {
        a.as_number()
            .partial_cmp(&b.as_number())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    tick();
    assert_eq!(doc.text_content(root), "123");

    nums.splice(1, 1, vec![Value::Num(9.0), Value::Num(8.0)]);
    tick();
    assert_eq!(doc.text_content(root), "1983");

    nums.set_index(0, Value::Num(7.0));
    tick();
    assert_eq!(doc.text_content(root), "7983");
}

/// An object pushed into a reactive list is itself reactive: writing one
/// of its fields afterwards re-renders.
#[test]
fn pushed_object_stays_reactive() {
    let def = ComponentDef::new(
        "growing",
        ComponentOptions::new()
            .template(
                r#"<ul><li v-for="item in items" :key="item.id">{{ item.label }}</li></ul>"#,
            )
            .data(Value::from(json!({ "items": [
                { "id": 1, "label": "one" }
            ]}))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    let items = list_of(&inst, "items");

    items.push(Value::from(json!({ "id": 2, "label": "two" })));
    tick();
    assert_eq!(doc.text_content(root), "onetwo");

    let added = items.iter_snapshot().pop().expect("pushed row");
    match added {
        ObservedValue::Object(obj) => obj
            .field("label")
            .expect("label cell")
            .set(Value::Str("2.0".into())),
        other => panic!("expected object row, got {other:?}"),
    }
    tick();
    assert_eq!(doc.text_content(root), "one2.0");
}

/// Class bindings accept list and map forms, and an empty result clears
/// the attribute instead of leaving `class=""` behind.
#[test]
fn class_bindings_normalize_lists_and_maps() {
    let def = ComponentDef::new(
        "classed",
        ComponentOptions::new()
            .template(r#"<div :class="tags"><span :class="flags">x</span></div>"#)
            .data(Value::from(json!({
                "tags": ["btn", "wide"],
                "flags": { "on": true, "off": false }
            }))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    let span = doc.children(root)[0];
    assert_eq!(doc.attribute(root, "class").as_deref(), Some("btn wide"));
    assert_eq!(doc.attribute(span, "class").as_deref(), Some("on"));

    inst.assign("tags", Value::from(json!([]))).unwrap();
    inst.assign("flags", Value::from(json!({ "on": false })))
        .unwrap();
    tick();
    assert_eq!(doc.attribute(root, "class"), None);
    assert_eq!(doc.attribute(span, "class"), None);
}

/// `set` and `del` make structural changes observable on nested data.
#[test]
fn set_and_del_are_reactive() {
    let def = ComponentDef::new(
        "structural",
        ComponentOptions::new()
            .template(
                r#"<dl><dd v-for="(v, k) in user">{{ k }}={{ v }}</dd></dl>"#,
            )
            .data(Value::from(json!({ "user": { "name": "ada" } }))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    assert_eq!(doc.text_content(root), "name=ada");

    let user = match inst.data() {
        ObservedValue::Object(obj) => obj.field("user").map(|c| c.get()).expect("user field"),
        other => panic!("expected object data, got {other:?}"),
    };
    set(&user, "year", Value::Num(1815.0));
    tick();
    assert_eq!(doc.text_content(root), "name=adayear=1815");

    del(&user, "name");
    tick();
    assert_eq!(doc.text_content(root), "year=1815");
}

/// Event modifiers: `.stop` halts bubbling, key filters gate keyboard
/// handlers.
#[test]
fn event_modifiers_and_key_filters() {
    let def = ComponentDef::new(
        "events",
        ComponentOptions::new()
            .template(
                r#"<div @click="outer = outer + 1">
                     <button @click.stop="inner = inner + 1">in</button>
                     <input @keyup.enter="entered = entered + 1">
                   </div>"#,
            )
            .data(Value::from(json!({ "outer": 0, "inner": 0, "entered": 0 }))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    let children = doc.children(root);
    let (button, input) = (children[0], children[1]);

    doc.dispatch(button, DomEvent::new("click"));
    tick();
    assert_eq!(inst.eval("inner").unwrap(), Value::Num(1.0));
    // `.stop` kept the click from reaching the outer handler.
    assert_eq!(inst.eval("outer").unwrap(), Value::Num(0.0));

    doc.dispatch(input, DomEvent::new("keyup").with_key("a", 65));
    doc.dispatch(input, DomEvent::new("keyup").with_key("Enter", 13));
    tick();
    assert_eq!(inst.eval("entered").unwrap(), Value::Num(1.0));
}

/// Handlers bound inside v-for capture their loop frame.
#[test]
fn loop_handlers_capture_their_item() {
    let picked = Arc::new(Mutex::new(Vec::new()));
    let picked_clone = picked.clone();
    let def = ComponentDef::new(
        "picker",
        ComponentOptions::new()
            .template(
                r#"<ul><li v-for="item in items" @click="pick(item)">{{ item }}</li></ul>"#,
            )
            .data(Value::from(json!({ "items": ["x", "y", "z"] })))
            .method("pick", move |_inst, args| {
                picked_clone
                    .lock()
                    .unwrap()
                    .push(args.first().cloned().unwrap_or(Value::Null));
                Value::Null
            }),
    );
    let (doc, inst) = mount(&def);
    let items = doc.children(inst.root_el().unwrap());

    doc.dispatch(items[2], DomEvent::new("click"));
    doc.dispatch(items[0], DomEvent::new("click"));
    assert_eq!(
        &*picked.lock().unwrap(),
        &[Value::Str("z".into()), Value::Str("x".into())]
    );
}

/// Computed properties recompute only when their dependencies change, and
/// chain into user watchers.
#[test]
fn computed_chain_with_watcher() {
    let evals = Arc::new(AtomicI32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let evals_clone = evals.clone();
    let seen_clone = seen.clone();
    let def = ComponentDef::new(
        "derived",
        ComponentOptions::new()
            .template("<div>{{ total }}</div>")
            .data(Value::from(json!({ "price": 10, "qty": 3, "unrelated": 0 })))
            .computed("total", move |inst| {
                evals_clone.fetch_add(1, Ordering::SeqCst);
                let price = inst.eval("price").unwrap_or(Value::Null).as_number();
                let qty = inst.eval("qty").unwrap_or(Value::Null).as_number();
                Value::Num(price * qty)
            })
            .watch("total", move |_inst, new, old| {
                seen_clone
                    .lock()
                    .unwrap()
                    .push((new.as_number(), old.as_number()));
            }),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    assert_eq!(doc.text_content(root), "30");
    let initial_evals = evals.load(Ordering::SeqCst);

    // An unrelated write re-renders but must not recompute the total.
    inst.assign("unrelated", Value::Num(1.0)).unwrap();
    tick();
    assert_eq!(evals.load(Ordering::SeqCst), initial_evals);

    inst.assign("qty", Value::Num(4.0)).unwrap();
    tick();
    assert_eq!(doc.text_content(root), "40");
    assert_eq!(&*seen.lock().unwrap(), &[(40.0, 30.0)]);
}

/// A registered child component renders in place of its tag and receives
/// declared props from bound attributes.
#[test]
fn child_component_mounts_with_props() {
    let badge = ComponentDef::new(
        "badge",
        ComponentOptions::new()
            .template("<span>[{{ label }}]</span>")
            .prop("label"),
    );
    let def = ComponentDef::new(
        "card",
        ComponentOptions::new()
            .template(r#"<div><h1>{{ title }}</h1><badge :label="title"></badge></div>"#)
            .data(Value::from(json!({ "title": "hello" })))
            .component("badge", badge),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    assert_eq!(doc.text_content(root), "hello[hello]");
    // The badge's own root is a span nested under the card.
    assert_eq!(doc.tag(doc.children(root)[1]).as_deref(), Some("span"));
}

/// Unregistered tags are a render error; the mount fails.
#[test]
fn unknown_component_tag_fails_mount() {
    let def = ComponentDef::new(
        "orphan",
        ComponentOptions::new().template("<div><missing-widget></missing-widget></div>"),
    );
    let doc = Document::new();
    let target = doc.create_element("div");
    doc.append_child(doc.body(), target);
    assert!(Instance::mount(&def, &doc, target).is_err());
}

/// Child emits reach parent template bindings on the component tag.
#[test]
fn child_emit_triggers_parent_handler() {
    let child = ComponentDef::new(
        "pinger",
        ComponentOptions::new()
            .template(r#"<button @click="fire">ping</button>"#)
            .method("fire", |inst, _args| {
                inst.emit("pinged", &[Value::Str("hello".into())]);
                Value::Null
            }),
    );
    let heard = Arc::new(Mutex::new(Vec::new()));
    let heard_clone = heard.clone();
    let def = ComponentDef::new(
        "listener",
        ComponentOptions::new()
            .template(r#"<div><pinger @pinged="hear"></pinger></div>"#)
            .component("pinger", child)
            .method("hear", move |_inst, args| {
                heard_clone
                    .lock()
                    .unwrap()
                    .push(args.first().cloned().unwrap_or(Value::Null));
                Value::Null
            }),
    );
    let (doc, inst) = mount(&def);
    let button = doc.children(inst.root_el().unwrap())[0];

    doc.dispatch(button, DomEvent::new("click"));
    assert_eq!(&*heard.lock().unwrap(), &[Value::Str("hello".into())]);
}

/// Destroying the root removes its subtree and silences its watchers.
#[test]
fn destroy_tears_down_children() {
    let destroyed = Arc::new(AtomicI32::new(0));
    let destroyed_clone = destroyed.clone();
    let child = ComponentDef::new(
        "leaf",
        ComponentOptions::new()
            .template("<span>leaf</span>")
            .destroyed(move |_| {
                destroyed_clone.fetch_add(1, Ordering::SeqCst);
            }),
    );
    let def = ComponentDef::new(
        "tree",
        ComponentOptions::new()
            .template("<div><leaf></leaf><leaf></leaf></div>")
            .component("leaf", child),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    assert_eq!(doc.text_content(root), "leafleaf");

    inst.destroy();
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    assert_eq!(doc.children(doc.body()), Vec::<u64>::new());
}

/// v-for over maps yields (value, key, index); over numbers it counts
/// from one.
#[test]
fn v_for_over_maps_and_ranges() {
    let def = ComponentDef::new(
        "ranges",
        ComponentOptions::new()
            .template(
                r#"<div>
                     <p v-for="(v, k, i) in scores">{{ i }}.{{ k }}:{{ v }}</p>
                     <b v-for="n in 3">{{ n }}</b>
                   </div>"#,
            )
            .data(Value::from(json!({ "scores": { "ada": 9, "alan": 7 } }))),
    );
    let (doc, inst) = mount(&def);
    let root = inst.root_el().unwrap();
    assert_eq!(doc.text_content(root), "0.ada:91.alan:7123");
}
