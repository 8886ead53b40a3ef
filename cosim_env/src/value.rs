//! Coupling values exchanged through publications and subscriptions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A published coupling value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Double(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

/// Declared type of a publication.
///
/// `Any` accepts every value; the others reject mismatched kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Double,
    Integer,
    Boolean,
    Text,
    #[default]
    Any,
}

impl ValueKind {
    /// Returns true if a value of kind `actual` may be published here.
    pub fn accepts(self, actual: ValueKind) -> bool {
        self == ValueKind::Any || self == actual
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Double => "double",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::Text => "string",
            ValueKind::Any => "any",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Double(_) => ValueKind::Double,
            Value::Integer(_) => ValueKind::Integer,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Text(_) => ValueKind::Text,
        }
    }

    /// Numeric view of the value.
    ///
    /// Text is parsed as a float; booleans map to 0.0/1.0.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Text view of the value. Only `Text` values have one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Double(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Result of reading a subscription.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reading {
    /// Latest visible value, if anything was ever delivered.
    pub value: Option<Value>,

    /// True exactly once per newly delivered value.
    pub updated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_numeric_views() {
        assert_eq!(Value::from(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::from(3i64).as_f64(), Some(3.0));
        assert_eq!(Value::from(true).as_f64(), Some(1.0));
        assert_eq!(Value::from(" 0.25 ").as_f64(), Some(0.25));
        assert_eq!(Value::from("abc").as_f64(), None);
        assert_eq!(Value::from(1.0).as_text(), None);
    }

    #[test]
    fn test_kind_acceptance() {
        assert!(ValueKind::Any.accepts(ValueKind::Text));
        assert!(ValueKind::Double.accepts(ValueKind::Double));
        assert!(!ValueKind::Double.accepts(ValueKind::Text));
    }
}
