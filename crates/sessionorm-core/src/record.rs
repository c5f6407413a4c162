//! Structured field values exchanged between entities and table mappings.

use crate::Result;
use crate::entity::Embeddable;
use crate::error::{Error, MappingErrorKind};
use crate::types::ColumnType;
use crate::value::Value;

/// The value of one entity field: a column value or a nested embeddable.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Embedded(Record),
}

/// Field name -> value tree for one entity or embeddable instance.
///
/// `Entity::to_record` produces one and `Entity::from_record` consumes one;
/// the table mapping flattens it into a row and back.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(&'static str, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: &'static str, value: Value) {
        self.fields.push((name, FieldValue::Scalar(value)));
    }

    pub fn push_embedded(&mut self, name: &'static str, record: Record) {
        self.fields.push((name, FieldValue::Embedded(record)));
    }

    /// Builder-style `push`.
    pub fn with(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.push(name, value.into());
        self
    }

    /// Builder-style `push_embedded`.
    pub fn with_embedded(mut self, name: &'static str, record: Record) -> Self {
        self.push_embedded(name, record);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    /// Get a scalar field value.
    pub fn scalar(&self, name: &str) -> Option<&Value> {
        match self.get(name) {
            Some(FieldValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    fn take(&mut self, name: &str) -> Option<FieldValue> {
        let index = self.fields.iter().position(|(field, _)| *field == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Remove a scalar field and convert it to `T`.
    #[allow(clippy::result_large_err)]
    pub fn take_column<T: ColumnType>(&mut self, name: &str) -> Result<T> {
        match self.take(name) {
            Some(FieldValue::Scalar(value)) => T::from_value(value).map_err(|mut e| {
                e.column = Some(name.to_string());
                Error::Type(e)
            }),
            Some(FieldValue::Embedded(_)) => Err(Error::mapping(
                MappingErrorKind::FieldMismatch,
                name,
                "expected a column value, found an embedded record",
            )),
            None => Err(missing(name)),
        }
    }

    /// Remove an embedded field and rebuild it as `T`.
    #[allow(clippy::result_large_err)]
    pub fn take_embedded<T: Embeddable>(&mut self, name: &str) -> Result<T> {
        match self.take(name) {
            Some(FieldValue::Embedded(record)) => T::from_record(record),
            Some(FieldValue::Scalar(_)) => Err(Error::mapping(
                MappingErrorKind::FieldMismatch,
                name,
                "expected an embedded record, found a column value",
            )),
            None => Err(missing(name)),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (*name, value))
    }
}

fn missing(name: &str) -> Error {
    Error::mapping(MappingErrorKind::FieldMismatch, name, "field missing from record")
}
