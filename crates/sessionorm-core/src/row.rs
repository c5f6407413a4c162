//! Flat row representation exchanged with storage drivers.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::types::ColumnType;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared by every row of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single stored row.
///
/// Rows provide both index-based and name-based access to column values.
/// Column metadata is shared via `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a typed value by column name.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T: ColumnType>(&self, name: &str) -> Result<T> {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::from_value(value.clone()).map_err(|mut e| {
            e.column = Some(name.to_string());
            Error::Type(e)
        })
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student_row() -> Row {
        Row::new(
            vec!["s_id".into(), "s_name".into(), "age".into()],
            vec![Value::Int(1), Value::Text("A".into()), Value::Int(20)],
        )
    }

    #[test]
    fn access_by_index_and_name() {
        let row = student_row();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("s_name"), Some(&Value::Text("A".into())));
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(row.get_named::<i64>("age").unwrap(), 20);
    }

    #[test]
    fn typed_access_errors_name_the_column() {
        let row = student_row();
        match row.get_named::<bool>("age") {
            Err(Error::Type(e)) => assert_eq!(e.column.as_deref(), Some("age")),
            other => panic!("expected type error, got {other:?}"),
        }
        assert!(row.get_named::<i32>("nope").is_err());
    }

    #[test]
    fn shared_columns() {
        let row = student_row();
        let other = Row::with_columns(
            row.column_info(),
            vec![Value::Int(2), Value::Text("B".into()), Value::Int(30)],
        );
        assert!(Arc::ptr_eq(&row.column_info(), &other.column_info()));
        let pairs: Vec<_> = other.iter().map(|(name, _)| name).collect();
        assert_eq!(pairs, ["s_id", "s_name", "age"]);
    }
}
