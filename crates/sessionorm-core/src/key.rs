//! Normalized primary keys.

use crate::error::TypeError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A hashable, totally ordered primary key.
///
/// Integer keys of every width normalize to `Integer`, so an `i32` id and
/// the `i64` a storage driver hands back identify the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimaryKey {
    Integer(i64),
    Text(String),
    Uuid([u8; 16]),
}

impl PrimaryKey {
    /// Normalize a column value into a key. NULL, floating point and
    /// document values cannot identify a row.
    pub fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                Ok(PrimaryKey::Integer(value.as_i64().unwrap_or_default()))
            }
            Value::Text(s) => Ok(PrimaryKey::Text(s.clone())),
            Value::Uuid(u) => Ok(PrimaryKey::Uuid(*u)),
            other => Err(TypeError {
                expected: "integer, text or uuid primary key",
                actual: other.type_name().to_string(),
                column: None,
            }),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PrimaryKey::Integer(v) => Value::BigInt(*v),
            PrimaryKey::Text(s) => Value::Text(s.clone()),
            PrimaryKey::Uuid(u) => Value::Uuid(*u),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Integer(v) => write!(f, "{}", v),
            PrimaryKey::Text(s) => write!(f, "{}", s),
            PrimaryKey::Uuid(u) => write!(f, "{}", Value::Uuid(*u)),
        }
    }
}

impl From<i16> for PrimaryKey {
    fn from(v: i16) -> Self {
        PrimaryKey::Integer(i64::from(v))
    }
}

impl From<i32> for PrimaryKey {
    fn from(v: i32) -> Self {
        PrimaryKey::Integer(i64::from(v))
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        PrimaryKey::Integer(v)
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        PrimaryKey::Text(v.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(v: String) -> Self {
        PrimaryKey::Text(v)
    }
}

impl From<[u8; 16]> for PrimaryKey {
    fn from(v: [u8; 16]) -> Self {
        PrimaryKey::Uuid(v)
    }
}

impl TryFrom<Value> for PrimaryKey {
    type Error = TypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        PrimaryKey::from_value(&value)
    }
}
