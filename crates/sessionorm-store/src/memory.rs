//! In-memory storage driver.

use crate::engine::TableSet;
use sessionorm_core::error::StorageErrorKind;
use sessionorm_core::{Error, PrimaryKey, Result, Row, SchemaAction, Storage, TableSchema, WriteBatch};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Tables held in process memory. Contents are discarded on `close`.
#[derive(Debug)]
pub struct MemoryStorage {
    name: String,
    tables: RwLock<TableSet>,
    closed: AtomicBool,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(TableSet::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[allow(clippy::result_large_err)]
    fn read(&self) -> Result<RwLockReadGuard<'_, TableSet>> {
        self.ensure_open()?;
        Ok(self.tables.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[allow(clippy::result_large_err)]
    fn write(&self) -> Result<RwLockWriteGuard<'_, TableSet>> {
        self.ensure_open()?;
        Ok(self.tables.write().unwrap_or_else(PoisonError::into_inner))
    }

    #[allow(clippy::result_large_err)]
    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::storage(
                StorageErrorKind::Closed,
                format!("memory storage '{}' is closed", self.name),
            ));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, schema: &TableSchema, action: SchemaAction) -> Result<()> {
        self.write()?.prepare(schema, action)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        if self.write()?.drop_table(table) {
            tracing::debug!(storage = %self.name, table, "Dropped table");
        }
        Ok(())
    }

    fn fetch(&self, table: &str, key: &PrimaryKey) -> Result<Option<Row>> {
        self.read()?.fetch(table, key)
    }

    fn contains(&self, table: &str, key: &PrimaryKey) -> Result<bool> {
        self.read()?.contains(table, key)
    }

    fn row_count(&self, table: &str) -> Result<usize> {
        self.read()?.row_count(table)
    }

    fn apply(&self, batch: &WriteBatch) -> Result<()> {
        let mut tables = self.write()?;
        let staged = tables.stage(batch)?;
        tables.install(staged);
        tracing::trace!(storage = %self.name, writes = batch.len(), "Applied write batch");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.tables
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            tracing::debug!(storage = %self.name, "Closed memory storage");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{student, student_schema};

    #[test]
    fn apply_and_fetch() {
        let storage = MemoryStorage::new("unit");
        storage
            .prepare(&student_schema(), SchemaAction::Create)
            .unwrap();

        let mut batch = WriteBatch::new();
        batch.push(student(1, "A", 20));
        storage.apply(&batch).unwrap();

        assert!(storage.contains("student_table", &PrimaryKey::from(1)).unwrap());
        assert_eq!(storage.row_count("student_table").unwrap(), 1);
        assert!(storage.fetch("student_table", &PrimaryKey::from(2)).unwrap().is_none());
    }

    #[test]
    fn closed_storage_rejects_calls() {
        let storage = MemoryStorage::new("unit");
        storage
            .prepare(&student_schema(), SchemaAction::Create)
            .unwrap();
        storage.close().unwrap();
        storage.close().unwrap();

        let err = storage
            .fetch("student_table", &PrimaryKey::from(1))
            .unwrap_err();
        assert!(err.is_closed());
        assert!(storage.apply(&WriteBatch::new()).is_err());
    }

    #[test]
    fn drop_table_forgets_rows() {
        let storage = MemoryStorage::new("unit");
        storage
            .prepare(&student_schema(), SchemaAction::Create)
            .unwrap();
        storage.drop_table("student_table").unwrap();
        storage.drop_table("student_table").unwrap();
        assert!(storage.row_count("student_table").is_err());
    }
}
