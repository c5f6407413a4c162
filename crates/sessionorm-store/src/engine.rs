//! Table engine shared by the storage drivers.

use serde::{Deserialize, Serialize};
use sessionorm_core::error::StorageErrorKind;
use sessionorm_core::{
    ColumnInfo, Error, PrimaryKey, Result, Row, SchemaAction, TableSchema, Value, WriteBatch,
    WriteOp,
};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) struct Table {
    schema: TableSchema,
    pk_index: usize,
    columns: Arc<ColumnInfo>,
    rows: BTreeMap<PrimaryKey, Vec<Value>>,
}

impl Table {
    #[allow(clippy::result_large_err)]
    fn new(schema: TableSchema) -> Result<Self> {
        let pk_index = schema
            .columns
            .iter()
            .position(|c| c.primary_key)
            .ok_or_else(|| {
                Error::storage(
                    StorageErrorKind::SchemaMismatch,
                    format!("table '{}' has no primary key column", schema.name),
                )
            })?;
        let columns = Arc::new(ColumnInfo::new(schema.column_names()));
        Ok(Self {
            schema,
            pk_index,
            columns,
            rows: BTreeMap::new(),
        })
    }

    fn row(&self, values: &[Value]) -> Row {
        Row::with_columns(Arc::clone(&self.columns), values.to_vec())
    }

    /// Reorder an incoming row into this table's column layout.
    ///
    /// Columns the row does not carry are stored as NULL.
    #[allow(clippy::result_large_err)]
    fn project(&self, key: &PrimaryKey, row: &Row) -> Result<Vec<Value>> {
        for (name, _) in row.iter() {
            if !self.columns.contains(name) {
                return Err(self.mismatch(format!("unknown column '{}'", name)));
            }
        }

        let mut values = Vec::with_capacity(self.schema.columns.len());
        for column in &self.schema.columns {
            let value = row.get_by_name(&column.name).cloned().unwrap_or(Value::Null);
            if value.is_null() && !column.nullable {
                return Err(self.mismatch(format!("column '{}' is not nullable", column.name)));
            }
            if !column.sql_type.accepts(&value) {
                return Err(self.mismatch(format!(
                    "column '{}' expects {}, got {}",
                    column.name,
                    column.sql_type.sql_name(),
                    value.type_name()
                )));
            }
            values.push(value);
        }

        let stored_key = PrimaryKey::from_value(&values[self.pk_index])?;
        if &stored_key != key {
            return Err(self.mismatch(format!(
                "write for key {} carries key {}",
                key, stored_key
            )));
        }
        Ok(values)
    }

    fn mismatch(&self, message: String) -> Error {
        Error::storage(
            StorageErrorKind::SchemaMismatch,
            format!("{}: {}", self.schema.name, message),
        )
    }

    /// Apply `Update` rules to an existing table.
    #[allow(clippy::result_large_err)]
    fn evolve(&mut self, wanted: &TableSchema) -> Result<bool> {
        self.check_existing_columns(wanted)?;

        let mut added = false;
        for column in &wanted.columns {
            if self.columns.contains(&column.name) {
                continue;
            }
            if !column.nullable && !self.rows.is_empty() {
                return Err(self.mismatch(format!(
                    "cannot add required column '{}' to a table with rows",
                    column.name
                )));
            }
            self.schema.columns.push(column.clone());
            for values in self.rows.values_mut() {
                values.push(Value::Null);
            }
            added = true;
        }
        if added {
            self.columns = Arc::new(ColumnInfo::new(self.schema.column_names()));
        }
        Ok(added)
    }

    /// Apply `Validate` rules.
    #[allow(clippy::result_large_err)]
    fn validate(&self, wanted: &TableSchema) -> Result<()> {
        self.check_existing_columns(wanted)?;
        match wanted
            .columns
            .iter()
            .find(|c| !self.columns.contains(&c.name))
        {
            Some(missing) => Err(self.mismatch(format!("missing column '{}'", missing.name))),
            None => Ok(()),
        }
    }

    #[allow(clippy::result_large_err)]
    fn check_existing_columns(&self, wanted: &TableSchema) -> Result<()> {
        for column in &wanted.columns {
            if let Some(existing) = self.schema.column(&column.name) {
                if existing.sql_type != column.sql_type {
                    return Err(self.mismatch(format!(
                        "column '{}' is {}, mapping declares {}",
                        column.name,
                        existing.sql_type.sql_name(),
                        column.sql_type.sql_name()
                    )));
                }
                if existing.primary_key != column.primary_key {
                    return Err(
                        self.mismatch(format!("primary key differs at column '{}'", column.name))
                    );
                }
            }
        }
        Ok(())
    }
}

/// Tables changed by a staged batch, keyed by table name.
pub(crate) type Staged = BTreeMap<String, Table>;

#[derive(Debug, Clone, Default)]
pub(crate) struct TableSet {
    tables: BTreeMap<String, Table>,
}

impl TableSet {
    #[allow(clippy::result_large_err)]
    pub(crate) fn prepare(&mut self, schema: &TableSchema, action: SchemaAction) -> Result<()> {
        match action {
            SchemaAction::None => Ok(()),
            SchemaAction::Create | SchemaAction::CreateDrop => {
                let table = Table::new(schema.clone())?;
                self.tables.insert(schema.name.clone(), table);
                tracing::debug!(table = %schema.name, "Created table");
                Ok(())
            }
            SchemaAction::Update => match self.tables.get_mut(&schema.name) {
                Some(table) => {
                    if table.evolve(schema)? {
                        tracing::debug!(table = %schema.name, "Added columns to table");
                    }
                    Ok(())
                }
                None => {
                    let table = Table::new(schema.clone())?;
                    self.tables.insert(schema.name.clone(), table);
                    tracing::debug!(table = %schema.name, "Created missing table");
                    Ok(())
                }
            },
            SchemaAction::Validate => match self.tables.get(&schema.name) {
                Some(table) => table.validate(schema),
                None => Err(Error::storage(
                    StorageErrorKind::UnknownTable,
                    format!("table '{}' does not exist", schema.name),
                )),
            },
        }
    }

    pub(crate) fn drop_table(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    #[allow(clippy::result_large_err)]
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| {
            Error::storage(
                StorageErrorKind::UnknownTable,
                format!("table '{}' does not exist", name),
            )
        })
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn fetch(&self, name: &str, key: &PrimaryKey) -> Result<Option<Row>> {
        let table = self.table(name)?;
        Ok(table.rows.get(key).map(|values| table.row(values)))
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn contains(&self, name: &str, key: &PrimaryKey) -> Result<bool> {
        Ok(self.table(name)?.rows.contains_key(key))
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn row_count(&self, name: &str) -> Result<usize> {
        Ok(self.table(name)?.rows.len())
    }

    /// Run a batch against copies of the tables it touches.
    ///
    /// `self` is never modified; pass the result to `install` to publish it.
    #[allow(clippy::result_large_err)]
    pub(crate) fn stage(&self, batch: &WriteBatch) -> Result<Staged> {
        let mut staged = Staged::new();
        for op in batch {
            let table = match staged.entry(op.table().to_string()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(self.table(op.table())?.clone()),
            };
            match op {
                WriteOp::Insert { key, row, .. } => {
                    if table.rows.contains_key(key) {
                        return Err(Error::duplicate_key(op.entity(), key.clone()));
                    }
                    let values = table.project(key, row)?;
                    table.rows.insert(key.clone(), values);
                }
                WriteOp::Update { key, row, .. } => {
                    if !table.rows.contains_key(key) {
                        return Err(stale(&table.schema.name, key));
                    }
                    let values = table.project(key, row)?;
                    table.rows.insert(key.clone(), values);
                }
                WriteOp::Delete { key, .. } => {
                    if table.rows.remove(key).is_none() {
                        return Err(stale(&table.schema.name, key));
                    }
                }
            }
        }
        Ok(staged)
    }

    pub(crate) fn install(&mut self, staged: Staged) {
        self.tables.extend(staged);
    }

    pub(crate) fn clear(&mut self) {
        self.tables.clear();
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            format: SNAPSHOT_FORMAT,
            tables: self
                .tables
                .values()
                .map(|table| StoredTable {
                    schema: table.schema.clone(),
                    rows: table.rows.values().cloned().collect(),
                })
                .collect(),
        }
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(corrupt(format!(
                "unsupported snapshot format {}",
                snapshot.format
            )));
        }
        let mut tables = BTreeMap::new();
        for stored in snapshot.tables {
            let name = stored.schema.name.clone();
            let mut table =
                Table::new(stored.schema).map_err(|e| corrupt(format!("{}: {}", name, e)))?;
            for values in stored.rows {
                if values.len() != table.schema.columns.len() {
                    return Err(corrupt(format!(
                        "{}: row has {} values for {} columns",
                        name,
                        values.len(),
                        table.schema.columns.len()
                    )));
                }
                let key = PrimaryKey::from_value(&values[table.pk_index])
                    .map_err(|e| corrupt(format!("{}: {}", name, e)))?;
                if table.rows.insert(key.clone(), values).is_some() {
                    return Err(corrupt(format!("{}: duplicate key {}", name, key)));
                }
            }
            tables.insert(name, table);
        }
        Ok(Self { tables })
    }
}

fn stale(table: &str, key: &PrimaryKey) -> Error {
    Error::storage(
        StorageErrorKind::StaleRow,
        format!("row {} of '{}' no longer exists", key, table),
    )
}

fn corrupt(message: String) -> Error {
    Error::storage(StorageErrorKind::Corrupt, message)
}

pub(crate) const SNAPSHOT_FORMAT: u32 = 1;

/// On-disk form of a table set.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub(crate) format: u32,
    pub(crate) tables: Vec<StoredTable>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredTable {
    pub(crate) schema: TableSchema,
    pub(crate) rows: Vec<Vec<Value>>,
}
