//! JSON snapshot storage driver.
//!
//! Every mutation rewrites the whole snapshot: the new table set is written
//! to a temporary file next to the target, synced, and renamed over it.
//! Memory is only updated after the rename succeeded, so a failed save
//! leaves both the file and the live tables as they were.

use crate::engine::{Snapshot, TableSet};
use sessionorm_core::error::{StorageError, StorageErrorKind};
use sessionorm_core::{Error, PrimaryKey, Result, Row, SchemaAction, Storage, TableSchema, WriteBatch};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Tables persisted as a single JSON document.
#[derive(Debug)]
pub struct JsonFileStorage {
    name: String,
    path: PathBuf,
    tables: RwLock<TableSet>,
    closed: AtomicBool,
}

impl JsonFileStorage {
    /// Open (or start) the snapshot at `path`.
    ///
    /// A missing file is an empty store; it is created on the first write.
    #[allow(clippy::result_large_err)]
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = if path.exists() {
            let bytes = fs::read(&path)?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                Error::Storage(StorageError {
                    kind: StorageErrorKind::Corrupt,
                    message: format!("cannot decode snapshot '{}'", path.display()),
                    source: Some(Box::new(e)),
                })
            })?;
            let tables = TableSet::from_snapshot(snapshot)?;
            tracing::debug!(path = %path.display(), "Loaded storage snapshot");
            tables
        } else {
            tracing::debug!(path = %path.display(), "Starting empty storage snapshot");
            TableSet::default()
        };

        Ok(Self {
            name: path.display().to_string(),
            path,
            tables: RwLock::new(tables),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write `tables` to disk atomically.
    #[allow(clippy::result_large_err)]
    fn save(&self, tables: &TableSet) -> Result<()> {
        let temp_path = self.temp_path();
        let result = (|| -> Result<()> {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &tables.to_snapshot())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            fs::rename(&temp_path, &self.path)?;
            Ok(())
        })();

        if result.is_err() {
            // Best effort; the target file is untouched either way.
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    /// Run `change` on a copy of the tables, persist it, then publish it.
    #[allow(clippy::result_large_err)]
    fn mutate(&self, change: impl FnOnce(&mut TableSet) -> Result<()>) -> Result<()> {
        let mut tables = self.write()?;
        let mut next = tables.clone();
        change(&mut next)?;
        self.save(&next)?;
        *tables = next;
        Ok(())
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
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::storage(
                StorageErrorKind::Closed,
                format!("file storage '{}' is closed", self.name),
            ));
        }
        Ok(())
    }
}

impl Storage for JsonFileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, schema: &TableSchema, action: SchemaAction) -> Result<()> {
        if action == SchemaAction::Validate || action == SchemaAction::None {
            return self.write()?.prepare(schema, action);
        }
        self.mutate(|tables| tables.prepare(schema, action))
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.mutate(|tables| {
            tables.drop_table(table);
            Ok(())
        })
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
        if batch.is_empty() {
            return Ok(());
        }
        self.mutate(|tables| {
            let staged = tables.stage(batch)?;
            tables.install(staged);
            Ok(())
        })?;
        tracing::trace!(path = %self.path.display(), writes = batch.len(), "Saved write batch");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(path = %self.path.display(), "Closed file storage");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{student, student_schema};
    use sessionorm_core::Value;

    fn batch_of(op: sessionorm_core::WriteOp) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.push(op);
        batch
    }

    #[test]
    fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school.json");

        let storage = JsonFileStorage::open(&path).unwrap();
        storage
            .prepare(&student_schema(), SchemaAction::Update)
            .unwrap();
        storage.apply(&batch_of(student(1, "A", 20))).unwrap();
        storage.close().unwrap();

        let reopened = JsonFileStorage::open(&path).unwrap();
        reopened
            .prepare(&student_schema(), SchemaAction::Update)
            .unwrap();
        let row = reopened
            .fetch("student_table", &PrimaryKey::from(1))
            .unwrap()
            .unwrap();
        assert_eq!(row.get_by_name("age"), Some(&Value::Int(20)));
        assert!(!storage.temp_path().exists());
    }

    #[test]
    fn failed_save_keeps_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        let storage = JsonFileStorage::open(nested.join("db.json")).unwrap();
        storage
            .prepare(&student_schema(), SchemaAction::Create)
            .unwrap();
        storage.apply(&batch_of(student(1, "A", 20))).unwrap();

        fs::remove_dir_all(&nested).unwrap();
        assert!(storage.apply(&batch_of(student(2, "B", 21))).is_err());
        assert_eq!(storage.row_count("student_table").unwrap(), 1);
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{ not json").unwrap();

        let err = JsonFileStorage::open(&path).unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(ref e) if e.kind == StorageErrorKind::Corrupt
        ));
    }
}
