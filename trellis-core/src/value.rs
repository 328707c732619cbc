//! Dynamic Value Model
//!
//! Templates reference state by name, so the framework core operates on a
//! dynamic, JSON-shaped value type rather than static Rust structs. `Value`
//! is the plain (non-reactive) form; the reactive layer wraps it in cells
//! (see `reactive::observer`).
//!
//! # Semantics
//!
//! The display and equality rules intentionally follow the loose semantics
//! of the template language this core serves:
//!
//! - `Null` renders as the empty string; lists and maps render as JSON text.
//! - The reactive setter short-circuit uses *loose* equality: scalars are
//!   compared structurally, a NaN written over a NaN counts as equal, and
//!   composite values never count as equal (a fresh list or map is always a
//!   new value, mirroring reference inequality).
//! - Truthiness: `Null`, `false`, `0`, NaN and the empty string are falsy.

use std::fmt;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// A dynamic value: the unit of state, props, and expression results.
///
/// Numbers are uniformly `f64`, as in the source language this core models.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Loose equality used by the reactive write short-circuit.
    ///
    /// Composite values are never loosely equal; NaN equals NaN.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }

    /// Truthiness for guards and conditions.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) => true,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Numeric coercion for arithmetic: booleans widen, strings parse,
    /// everything else is NaN (null is zero).
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Num(n) => *n,
            Value::Str(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            Value::List(_) | Value::Map(_) => f64::NAN,
        }
    }

    /// The `stringify` render helper: null becomes the empty string,
    /// scalars render bare, composites render as JSON text.
    pub fn stringify(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Map(_) => {
                // The Serialize impl below maps non-finite numbers to null,
                // so this cannot fail for any Value.
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

/// Format a number the way template text expects: integral values render
/// without a fractional part.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            // JSON.stringify renders non-finite numbers as null.
            Value::Num(n) if !n.is_finite() => serializer.serialize_unit(),
            // Integral values serialize as integers so numbers render the
            // same inside composites as they do bare (see `format_number`).
            Value::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                serializer.serialize_i64(*n as i64)
            }
            Value::Num(n) => serializer.serialize_f64(*n),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringify_scalars() {
        assert_eq!(Value::Null.stringify(), "");
        assert_eq!(Value::Bool(true).stringify(), "true");
        assert_eq!(Value::Num(3.0).stringify(), "3");
        assert_eq!(Value::Num(3.5).stringify(), "3.5");
        assert_eq!(Value::Str("hi".into()).stringify(), "hi");
    }

    #[test]
    fn stringify_composites_as_json() {
        let v = Value::from(json!({ "a": 1, "b": ["x", null] }));
        assert_eq!(v.stringify(), r#"{"a":1,"b":["x",null]}"#);
    }

    #[test]
    fn numbers_render_the_same_bare_and_in_composites() {
        assert_eq!(Value::Num(1.0).stringify(), "1");
        assert_eq!(Value::Num(2.5).stringify(), "2.5");
        let v = Value::List(vec![Value::Num(1.0), Value::Num(2.5)]);
        assert_eq!(v.stringify(), "[1,2.5]");
    }

    #[test]
    fn stringify_non_finite_inside_composite() {
        let v = Value::List(vec![Value::Num(f64::NAN), Value::Num(f64::INFINITY)]);
        assert_eq!(v.stringify(), "[null,null]");
    }

    #[test]
    fn loose_eq_nan() {
        assert!(Value::Num(f64::NAN).loose_eq(&Value::Num(f64::NAN)));
        assert!(!Value::Num(1.0).loose_eq(&Value::Num(2.0)));
    }

    #[test]
    fn loose_eq_never_for_composites() {
        let a = Value::List(vec![Value::Num(1.0)]);
        let b = Value::List(vec![Value::Num(1.0)]);
        assert_eq!(a, b);
        assert!(!a.loose_eq(&b));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Num(0.0).is_truthy());
        assert!(!Value::Num(f64::NAN).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::List(Vec::new()).is_truthy());
    }

    #[test]
    fn from_json_widens_numbers() {
        let v = Value::from(json!(7));
        assert_eq!(v, Value::Num(7.0));
    }
}
