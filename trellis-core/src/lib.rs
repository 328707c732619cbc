//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis declarative UI
//! framework. It implements:
//!
//! - Dependency-tracking reactivity (observed data, watchers, batching)
//! - A template compiler (parser, expression language, render programs)
//! - A virtual DOM with two-ended keyed reconciliation
//! - An in-memory document the patcher renders into
//! - Component definitions and instances tying the layers together
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: the dynamic value type component state is made of
//! - `reactive`: deps, watchers, observed data, and the update scheduler
//! - `compiler`: template parsing and render-program generation
//! - `vdom`: virtual nodes and the patching algorithm
//! - `dom`: the headless document arena and synthetic events
//! - `instance`: component definitions, instances, and lifecycle
//!
//! # Example
//!
//! ```rust
//! use trellis_core::{
//!     dom::Document,
//!     instance::{ComponentDef, ComponentOptions, Instance},
//!     reactive::tick,
//!     value::Value,
//! };
//!
//! let def = ComponentDef::new(
//!     "counter",
//!     ComponentOptions::new()
//!         .template("<div><span>{{ count }}</span></div>")
//!         .data(Value::from(serde_json::json!({ "count": 0 }))),
//! );
//!
//! let doc = Document::new();
//! let target = doc.create_element("div");
//! doc.append_child(doc.body(), target);
//!
//! let app = Instance::mount(&def, &doc, target).unwrap();
//! assert_eq!(doc.text_content(app.root_el().unwrap()), "0");
//!
//! // Writes are batched; the view updates on the next tick.
//! app.assign("count", Value::Num(5.0)).unwrap();
//! tick();
//! assert_eq!(doc.text_content(app.root_el().unwrap()), "5");
//! ```

pub mod compiler;
pub mod dom;
pub mod instance;
pub mod reactive;
pub mod value;
pub mod vdom;

pub use compiler::{CompileError, EvalError};
pub use dom::{Document, DomEvent};
pub use instance::{ComponentDef, ComponentOptions, Instance, InstanceError, Lifecycle};
pub use reactive::{next_tick, tick};
pub use value::Value;
