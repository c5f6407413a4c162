//! The storage boundary.
//!
//! A `Storage` is the row store a session factory talks to. Calls are
//! synchronous and block the calling thread. Drivers live in
//! `sessionorm-store`; tests may wrap a driver to observe traffic.

use crate::Result;
use crate::config::SchemaAction;
use crate::key::PrimaryKey;
use crate::row::Row;
use crate::types::SqlType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical layout of one mapped column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Physical layout of one mapped table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.primary_key)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// One row-level write, produced when a session flushes at commit.
///
/// `entity` names the mapped type the row belongs to and is used in errors.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        entity: String,
        table: String,
        key: PrimaryKey,
        row: Row,
    },
    Update {
        entity: String,
        table: String,
        key: PrimaryKey,
        row: Row,
    },
    Delete {
        entity: String,
        table: String,
        key: PrimaryKey,
    },
}

impl WriteOp {
    pub fn entity(&self) -> &str {
        match self {
            WriteOp::Insert { entity, .. }
            | WriteOp::Update { entity, .. }
            | WriteOp::Delete { entity, .. } => entity,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            WriteOp::Insert { table, .. }
            | WriteOp::Update { table, .. }
            | WriteOp::Delete { table, .. } => table,
        }
    }

    pub fn key(&self) -> &PrimaryKey {
        match self {
            WriteOp::Insert { key, .. } | WriteOp::Update { key, .. } | WriteOp::Delete { key, .. } => {
                key
            }
        }
    }

    pub const fn verb(&self) -> &'static str {
        match self {
            WriteOp::Insert { .. } => "insert",
            WriteOp::Update { .. } => "update",
            WriteOp::Delete { .. } => "delete",
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Insert { table, row, .. } | WriteOp::Update { table, row, .. } => {
                write!(f, "{} {} (", self.verb(), table)?;
                for (i, (column, value)) in row.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", column, value)?;
                }
                write!(f, ")")
            }
            WriteOp::Delete { table, key, .. } => write!(f, "delete {} ({})", table, key),
        }
    }
}

/// An ordered set of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WriteOp> {
        self.ops.iter()
    }

    /// Count of (inserts, updates, deletes).
    pub fn counts(&self) -> (usize, usize, usize) {
        self.ops.iter().fold((0, 0, 0), |(i, u, d), op| match op {
            WriteOp::Insert { .. } => (i + 1, u, d),
            WriteOp::Update { .. } => (i, u + 1, d),
            WriteOp::Delete { .. } => (i, u, d + 1),
        })
    }
}

impl<'a> IntoIterator for &'a WriteBatch {
    type Item = &'a WriteOp;
    type IntoIter = std::slice::Iter<'a, WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

/// A row store reachable from a session factory.
///
/// Implementations must be safe to share between threads; a factory and
/// every session it opens hold the same `Arc<dyn Storage>`.
pub trait Storage: Send + Sync {
    /// Driver name, for logs.
    fn name(&self) -> &str;

    /// Bring one table in line with `schema` according to `action`.
    fn prepare(&self, schema: &TableSchema, action: SchemaAction) -> Result<()>;

    /// Drop a table and its rows. Unknown tables are ignored.
    fn drop_table(&self, table: &str) -> Result<()>;

    /// Fetch one row by primary key.
    fn fetch(&self, table: &str, key: &PrimaryKey) -> Result<Option<Row>>;

    /// Check whether a row exists.
    fn contains(&self, table: &str, key: &PrimaryKey) -> Result<bool> {
        Ok(self.fetch(table, key)?.is_some())
    }

    /// Number of rows in a table.
    fn row_count(&self, table: &str) -> Result<usize>;

    /// Apply every write in `batch`, or none of them.
    ///
    /// Inserting an existing key fails with `DuplicateKey`; updating or
    /// deleting a missing key fails with a `StaleRow` storage error.
    fn apply(&self, batch: &WriteBatch) -> Result<()>;

    /// Release the store. Later calls fail with a `Closed` storage error.
    fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn batch_counts_and_display() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int(1), Value::Text("A".into())],
        );
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::Insert {
            entity: "Student".into(),
            table: "student".into(),
            key: PrimaryKey::from(1),
            row: row.clone(),
        });
        batch.push(WriteOp::Update {
            entity: "Student".into(),
            table: "student".into(),
            key: PrimaryKey::from(1),
            row,
        });
        batch.push(WriteOp::Delete {
            entity: "Laptop".into(),
            table: "laptop".into(),
            key: PrimaryKey::from(9),
        });

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.counts(), (1, 1, 1));
        let lines: Vec<String> = batch.iter().map(ToString::to_string).collect();
        assert_eq!(lines[0], "insert student (id=1, name='A')");
        assert_eq!(lines[2], "delete laptop (9)");
        assert_eq!(batch.iter().nth(2).unwrap().table(), "laptop");
        assert_eq!(batch.iter().nth(2).unwrap().entity(), "Laptop");
    }

    #[test]
    fn schema_lookup() {
        let schema = TableSchema {
            name: "t".into(),
            columns: vec![
                ColumnSchema {
                    name: "id".into(),
                    sql_type: SqlType::BigInt,
                    nullable: false,
                    primary_key: true,
                },
                ColumnSchema {
                    name: "note".into(),
                    sql_type: SqlType::Text,
                    nullable: true,
                    primary_key: false,
                },
            ],
        };
        assert_eq!(schema.primary_key().unwrap().name, "id");
        assert!(schema.column("note").unwrap().nullable);
        assert_eq!(schema.column_names(), ["id", "note"]);
    }
}
