use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Type discriminant first to avoid collisions between variants.
        match self {
            Value::Null => {
                0.hash(state);
            }
            Value::Integer(i) => {
                1.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                2.hash(state);
                f.to_bits().hash(state);
            }
            Value::Text(s) => {
                3.hash(state);
                s.hash(state);
            }
            Value::Boolean(b) => {
                4.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Text(s) => write!(f, "\"{}\"", s),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            // Null is incomparable with anything
            (Value::Null, _) | (_, Value::Null) => None,

            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),

            // Integer and float can be compared
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),

            (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),

            _ => None,
        }
    }
}

impl Value {
    /// Truthiness for predicate results: only `Boolean(true)` passes.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric addition used by SUM and by arithmetic updates. Null absorbs.
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Value::Integer(a + b),
            (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
            (Value::Integer(a), Value::Float(b)) => Value::Float(*a as f64 + b),
            (Value::Float(a), Value::Integer(b)) => Value::Float(a + *b as f64),
            _ => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_numeric_comparison() {
        assert!(Value::Integer(2) < Value::Float(2.5));
        assert!(Value::Float(3.0) > Value::Integer(2));
        assert_eq!(
            Value::Null.partial_cmp(&Value::Integer(1)),
            None
        );
    }

    #[test]
    fn test_add() {
        assert_eq!(Value::Integer(2).add(&Value::Integer(3)), Value::Integer(5));
        assert_eq!(Value::Integer(2).add(&Value::Float(0.5)), Value::Float(2.5));
        assert_eq!(Value::Text("a".into()).add(&Value::Integer(1)), Value::Null);
    }
}
