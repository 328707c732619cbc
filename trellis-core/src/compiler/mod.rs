//! Template Compiler
//!
//! Turns template source into an executable render program in two passes:
//!
//! 1. **Parse** (`parser`): a cursor scanner builds an element tree and
//!    classifies directive attributes (`:bind`, `@event` with modifiers,
//!    `v-for`).
//! 2. **Lower** (`codegen`): the tree becomes a `RenderOp` program with
//!    every embedded expression parsed to an AST (`expr`) and `{{ ... }}`
//!    interpolations split out of text nodes.
//!
//! Compilation is fail-fast: the first malformed construct aborts with a
//! `CompileError` carrying a byte offset. A compiled program is immutable
//! and shared; executing it against an instance is `codegen::render_root`.

pub mod codegen;
pub mod expr;
pub mod parser;

use thiserror::Error;

pub use codegen::{ElementOp, HandlerCode, HandlerSpec, RenderOp};
pub use expr::{EvalError, ScopeResolver};
pub use parser::{EventModifiers, KeyFilter};

/// Template compilation failure. Offsets are byte positions into the
/// (trimmed) template source.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("template is empty")]
    EmptyTemplate,
    #[error("unexpected end of template (offset {0})")]
    UnexpectedEof(usize),
    #[error("malformed tag (offset {0})")]
    MalformedTag(usize),
    #[error("malformed attribute (offset {0})")]
    MalformedAttribute(usize),
    #[error("closing tag </{found}> does not match open <{expected}> (offset {offset})")]
    MismatchedTag {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("closing tag </{0}> has no matching start tag (offset {1})")]
    StrayClosingTag(String, usize),
    #[error("unclosed tag <{0}>")]
    UnclosedTag(String),
    #[error("template must have a single root element (offset {0})")]
    MultipleRoots(usize),
    #[error("text outside the root element (offset {0})")]
    TextOutsideRoot(usize),
    #[error("invalid v-for expression `{0}`")]
    BadForExpression(String),
    #[error("v-for is not supported on the root element")]
    ForOnRoot,
    #[error("invalid expression `{src}`: {message}")]
    BadExpression { src: String, message: String },
}

/// Compile template source to a render program.
pub fn compile(template: &str) -> Result<ElementOp, CompileError> {
    let ast = parser::parse(template)?;
    codegen::generate(&ast)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_representative_template() {
        let program = compile(
            r#"
            <div id="app">
              <h1>{{ title }}</h1>
              <ul>
                <li v-for="(item, i) in items" :key="item.id" @click.stop="pick(item)">
                  {{ i }}: {{ item.label }}
                </li>
              </ul>
            </div>
            "#,
        )
        .expect("compile");
        assert_eq!(program.tag, "div");
        assert_eq!(program.children.len(), 2);
    }

    #[test]
    fn parse_and_lowering_errors_both_surface() {
        assert!(matches!(
            compile("<div>x</span>"),
            Err(CompileError::MismatchedTag { .. })
        ));
        assert!(matches!(
            compile(r#"<div :class="1 +">x</div>"#),
            Err(CompileError::BadExpression { .. })
        ));
    }
}
