use serde::{Deserialize, Serialize};

use crate::catalog::value::Value;

/// A row: an ordered list of values, bincode-serialised for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at column `idx`; out-of-range reads yield Null.
    pub fn value(&self, idx: usize) -> Value {
        self.values.get(idx).cloned().unwrap_or(Value::Null)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&self.values)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        Ok(Self {
            values: bincode::deserialize(bytes)?,
        })
    }
}
