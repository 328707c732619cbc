//! Core Benchmarks
//!
//! Measures the three hot paths of the runtime: template compilation,
//! the render-and-patch update cycle, and bursts of reactive writes
//! flushed in a single tick.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use trellis_core::{
    compiler::compile,
    dom::Document,
    instance::{ComponentDef, ComponentOptions, Instance},
    reactive::tick,
    value::Value,
};

const LIST_TEMPLATE: &str = r#"
<div>
    <h1>{{ title }}</h1>
    <ul>
        <li v-for="(item, i) in items" :key="item.id" class="row">
            {{ i }}: {{ item.label }}
        </li>
    </ul>
</div>
"#;

fn list_def(rows: usize) -> std::sync::Arc<ComponentDef> {
    let items: Vec<serde_json::Value> = (0..rows)
        .map(|i| serde_json::json!({ "id": i, "label": format!("row {i}") }))
        .collect();
    ComponentDef::new(
        "bench-list",
        ComponentOptions::new()
            .template(LIST_TEMPLATE)
            .data(Value::from(serde_json::json!({
                "title": "bench",
                "items": items,
            }))),
    )
}

fn mount(def: &std::sync::Arc<ComponentDef>) -> (Document, std::sync::Arc<Instance>) {
    let doc = Document::new();
    let target = doc.create_element("div");
    doc.append_child(doc.body(), target);
    let app = Instance::mount(def, &doc, target).unwrap();
    (doc, app)
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_list_template", |b| {
        b.iter(|| compile(black_box(LIST_TEMPLATE)).unwrap());
    });
}

fn bench_update_cycle(c: &mut Criterion) {
    let def = list_def(100);
    let (_doc, app) = mount(&def);
    let mut n = 0u64;
    c.bench_function("rerender_100_rows", |b| {
        b.iter(|| {
            n += 1;
            app.assign("title", Value::Str(n.to_string())).unwrap();
            tick();
        });
    });
}

fn bench_write_burst(c: &mut Criterion) {
    let def = ComponentDef::new(
        "bench-counter",
        ComponentOptions::new()
            .template("<div>{{ a }}{{ b }}{{ c }}</div>")
            .data(Value::from(serde_json::json!({ "a": 0, "b": 0, "c": 0 }))),
    );
    let (_doc, app) = mount(&def);
    let mut n = 0u64;
    c.bench_function("write_burst_single_flush", |b| {
        b.iter(|| {
            n += 1;
            let v = Value::Num(n as f64);
            app.assign("a", v.clone()).unwrap();
            app.assign("b", v.clone()).unwrap();
            app.assign("c", v).unwrap();
            tick();
        });
    });
}

criterion_group!(benches, bench_compile, bench_update_cycle, bench_write_burst);
criterion_main!(benches);
