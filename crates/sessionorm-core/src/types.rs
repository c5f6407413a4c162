//! Column type definitions and Rust type mapping.

use crate::error::TypeError;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Column types understood by the mapping layer and the storage drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Text,
    Blob,
    Uuid,
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub const fn sql_name(self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
        }
    }

    /// Check if this type is numeric.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            SqlType::SmallInt | SqlType::Integer | SqlType::BigInt | SqlType::Double
        )
    }

    /// Whether values of this type can serve as a primary key.
    pub const fn is_key_type(self) -> bool {
        matches!(
            self,
            SqlType::SmallInt | SqlType::Integer | SqlType::BigInt | SqlType::Text | SqlType::Uuid
        )
    }

    /// Whether a column of this type can store `value`.
    ///
    /// NULL is accepted here; nullability is checked by the table mapping.
    /// Integer columns accept narrower integer widths.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (SqlType::Boolean, Value::Bool(_)) => true,
            (SqlType::SmallInt, Value::SmallInt(_)) => true,
            (SqlType::Integer, Value::SmallInt(_) | Value::Int(_)) => true,
            (SqlType::BigInt, Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_)) => true,
            (SqlType::Double, Value::Double(_)) => true,
            (SqlType::Text, Value::Text(_)) => true,
            (SqlType::Blob, Value::Bytes(_)) => true,
            (SqlType::Uuid, Value::Uuid(_)) => true,
            (SqlType::Json, Value::Json(_)) => true,
            _ => false,
        }
    }
}

/// Rust types that can be stored in a single column.
///
/// Entity and embeddable fields must implement this trait (directly or via
/// `Option<T>` for nullable columns).
pub trait ColumnType: Sized {
    /// The column type for this Rust type.
    const SQL_TYPE: SqlType;

    /// Whether this type is nullable.
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, TypeError>;
}

fn mismatch(expected: &'static str, value: &Value) -> TypeError {
    TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    }
}

impl ColumnType for bool {
    const SQL_TYPE: SqlType = SqlType::Boolean;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl ColumnType for i16 {
    const SQL_TYPE: SqlType = SqlType::SmallInt;

    fn to_value(&self) -> Value {
        Value::SmallInt(*self)
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        value
            .as_i64()
            .and_then(|v| i16::try_from(v).ok())
            .ok_or_else(|| mismatch("i16", &value))
    }
}

impl ColumnType for i32 {
    const SQL_TYPE: SqlType = SqlType::Integer;

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| mismatch("i32", &value))
    }
}

impl ColumnType for i64 {
    const SQL_TYPE: SqlType = SqlType::BigInt;

    fn to_value(&self) -> Value {
        Value::BigInt(*self)
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        value.as_i64().ok_or_else(|| mismatch("i64", &value))
    }
}

impl ColumnType for f64 {
    const SQL_TYPE: SqlType = SqlType::Double;

    fn to_value(&self) -> Value {
        Value::Double(*self)
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        value.as_f64().ok_or_else(|| mismatch("f64", &value))
    }
}

impl ColumnType for String {
    const SQL_TYPE: SqlType = SqlType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl ColumnType for Vec<u8> {
    const SQL_TYPE: SqlType = SqlType::Blob;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }
}

impl ColumnType for [u8; 16] {
    const SQL_TYPE: SqlType = SqlType::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Bytes(b) if b.len() == 16 => {
                let mut out = [0_u8; 16];
                out.copy_from_slice(&b);
                Ok(out)
            }
            other => Err(mismatch("[u8; 16]", &other)),
        }
    }
}

impl ColumnType for serde_json::Value {
    const SQL_TYPE: SqlType = SqlType::Json;

    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Json(j) => Ok(j),
            Value::Text(s) => serde_json::from_str(&s).map_err(|e| TypeError {
                expected: "JSON",
                actual: e.to_string(),
                column: None,
            }),
            other => Err(mismatch("JSON", &other)),
        }
    }
}

impl<T: ColumnType> ColumnType for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}
