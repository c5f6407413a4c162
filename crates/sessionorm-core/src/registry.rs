//! Validated table mappings and the entity registry.
//!
//! A `TableMapping` is the flattened, checked form of an
//! `EntityDescriptor`: one `ColumnMapping` per stored column, embedded
//! value objects expanded in place. The registry is filled while a
//! `Configuration` is turned into a session factory and is read-only
//! afterwards.

use crate::Result;
use crate::descriptor::{EmbeddableDescriptor, EntityDescriptor, FieldDescriptor, FieldKind};
use crate::entity::Entity;
use crate::error::{Error, MappingErrorKind, StorageErrorKind, TypeError};
use crate::key::PrimaryKey;
use crate::record::{FieldValue, Record};
use crate::row::{ColumnInfo, Row};
use crate::storage::{ColumnSchema, TableSchema};
use crate::types::SqlType;
use crate::value::Value;
use regex::Regex;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn is_identifier(name: &str) -> bool {
    static IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();
    match IDENTIFIER.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).ok()) {
        Some(regex) => regex.is_match(name),
        None => {
            tracing::warn!(
                pattern = IDENTIFIER_PATTERN,
                "Identifier pattern failed to compile, rejecting identifier"
            );
            false
        }
    }
}

/// One stored column and the field path that produces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Field names from the entity down to the scalar, e.g. `["name", "first"]`
    pub field_path: Vec<&'static str>,
    /// Column name, including any embedded prefix
    pub column: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
}

/// The validated mapping between one entity type and one table.
#[derive(Debug)]
pub struct TableMapping {
    descriptor: &'static EntityDescriptor,
    type_id: TypeId,
    columns: Vec<ColumnMapping>,
    pk_index: usize,
    column_info: Arc<ColumnInfo>,
}

impl TableMapping {
    /// Validate and flatten a descriptor.
    ///
    /// All problems are collected and reported in one `InvalidDescriptor`
    /// error.
    #[allow(clippy::result_large_err)]
    pub fn new(type_id: TypeId, descriptor: &'static EntityDescriptor) -> Result<Self> {
        let mut problems = Vec::new();
        let mut columns = Vec::new();

        if !is_identifier(descriptor.table) {
            problems.push(format!(
                "table name '{}' is not a valid identifier",
                descriptor.table
            ));
        }

        match descriptor.fields.iter().filter(|f| f.is_id()).count() {
            0 => problems.push("no id field declared".to_string()),
            1 => {}
            n => problems.push(format!("{} id fields declared, expected exactly one", n)),
        }

        let mut path = Vec::new();
        let mut stack = Vec::new();
        flatten_fields(
            descriptor.fields,
            "",
            true,
            &mut path,
            &mut stack,
            &mut columns,
            &mut problems,
        );

        let mut seen_columns = HashSet::new();
        for column in &columns {
            if !seen_columns.insert(column.column.to_ascii_lowercase()) {
                problems.push(format!("column '{}' is mapped more than once", column.column));
            }
        }

        let pk_index = columns.iter().position(|c| c.primary_key);
        if let Some(index) = pk_index {
            let pk = &columns[index];
            if !pk.sql_type.is_key_type() {
                problems.push(format!(
                    "id column '{}' has type {}, which cannot identify a row",
                    pk.column,
                    pk.sql_type.sql_name()
                ));
            }
        }

        match pk_index {
            Some(pk_index) if problems.is_empty() => {
                let column_info = Arc::new(ColumnInfo::new(
                    columns.iter().map(|c| c.column.clone()).collect(),
                ));
                Ok(Self {
                    descriptor,
                    type_id,
                    columns,
                    pk_index,
                    column_info,
                })
            }
            _ => Err(Error::mapping(
                MappingErrorKind::InvalidDescriptor,
                descriptor.name,
                problems.join("; "),
            )),
        }
    }

    pub fn entity_name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn table(&self) -> &'static str {
        self.descriptor.table
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        self.descriptor
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    pub fn primary_key_column(&self) -> &ColumnMapping {
        &self.columns[self.pk_index]
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.column_info)
    }

    /// Physical table layout for storage preparation.
    pub fn schema(&self) -> TableSchema {
        TableSchema {
            name: self.descriptor.table.to_string(),
            columns: self
                .columns
                .iter()
                .map(|c| ColumnSchema {
                    name: c.column.clone(),
                    sql_type: c.sql_type,
                    nullable: c.nullable,
                    primary_key: c.primary_key,
                })
                .collect(),
        }
    }

    /// Flatten an entity's field tree into a row, checking column types.
    #[allow(clippy::result_large_err)]
    pub fn record_to_row(&self, record: &Record) -> Result<Row> {
        let mut values = Vec::with_capacity(self.columns.len());
        self.flatten_record(self.descriptor.fields, record, &mut values)?;
        Ok(Row::with_columns(Arc::clone(&self.column_info), values))
    }

    /// Rebuild an entity's field tree from a stored row.
    ///
    /// Columns are looked up by name, so rows carrying extra columns (or a
    /// different column order) are accepted.
    #[allow(clippy::result_large_err)]
    pub fn row_to_record(&self, row: &Row) -> Result<Record> {
        let mut index = 0;
        self.build_record(self.descriptor.fields, row, &mut index)
    }

    #[allow(clippy::result_large_err)]
    pub fn to_row<E: Entity>(&self, entity: &E) -> Result<Row> {
        self.record_to_row(&entity.to_record())
    }

    #[allow(clippy::result_large_err)]
    pub fn to_entity<E: Entity>(&self, row: &Row) -> Result<E> {
        E::from_record(self.row_to_record(row)?)
    }

    /// Primary key of a row built by this mapping.
    #[allow(clippy::result_large_err)]
    pub fn key_of_row(&self, row: &Row) -> Result<PrimaryKey> {
        let column = &self.columns[self.pk_index].column;
        let value = row.get_by_name(column).ok_or_else(|| {
            Error::storage(
                StorageErrorKind::SchemaMismatch,
                format!("row of '{}' has no id column '{}'", self.table(), column),
            )
        })?;
        PrimaryKey::from_value(value).map_err(|mut e| {
            e.column = Some(column.clone());
            Error::Type(e)
        })
    }

    #[allow(clippy::result_large_err)]
    fn flatten_record(
        &self,
        fields: &'static [FieldDescriptor],
        record: &Record,
        out: &mut Vec<Value>,
    ) -> Result<()> {
        for field in fields {
            match field.kind {
                FieldKind::Id { .. } | FieldKind::Column { .. } => {
                    let value = match record.get(field.name) {
                        Some(FieldValue::Scalar(value)) => value.clone(),
                        Some(FieldValue::Embedded(_)) => {
                            return Err(self.field_mismatch(field.name, "expected a column value"));
                        }
                        None => return Err(self.field_mismatch(field.name, "field missing")),
                    };
                    self.check_value(out.len(), &value)?;
                    out.push(value);
                }
                FieldKind::Embedded { descriptor, .. } => match record.get(field.name) {
                    Some(FieldValue::Embedded(nested)) => {
                        self.flatten_record(descriptor().fields, nested, out)?;
                    }
                    Some(FieldValue::Scalar(_)) => {
                        return Err(self.field_mismatch(field.name, "expected an embedded record"));
                    }
                    None => return Err(self.field_mismatch(field.name, "field missing")),
                },
            }
        }
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn build_record(
        &self,
        fields: &'static [FieldDescriptor],
        row: &Row,
        index: &mut usize,
    ) -> Result<Record> {
        let mut record = Record::with_capacity(fields.len());
        for field in fields {
            match field.kind {
                FieldKind::Id { .. } | FieldKind::Column { .. } => {
                    let column = &self.columns[*index].column;
                    *index += 1;
                    let value = row.get_by_name(column).cloned().ok_or_else(|| {
                        Error::storage(
                            StorageErrorKind::SchemaMismatch,
                            format!("row of '{}' has no column '{}'", self.table(), column),
                        )
                    })?;
                    record.push(field.name, value);
                }
                FieldKind::Embedded { descriptor, .. } => {
                    let nested = self.build_record(descriptor().fields, row, index)?;
                    record.push_embedded(field.name, nested);
                }
            }
        }
        Ok(record)
    }

    #[allow(clippy::result_large_err)]
    fn check_value(&self, index: usize, value: &Value) -> Result<()> {
        let column = &self.columns[index];
        if value.is_null() && !column.nullable {
            return Err(Error::Type(TypeError {
                expected: "non-null value",
                actual: "NULL".to_string(),
                column: Some(column.column.clone()),
            }));
        }
        if !column.sql_type.accepts(value) {
            return Err(Error::Type(TypeError {
                expected: column.sql_type.sql_name(),
                actual: value.type_name().to_string(),
                column: Some(column.column.clone()),
            }));
        }
        Ok(())
    }

    fn field_mismatch(&self, field: &str, message: &str) -> Error {
        Error::mapping(
            MappingErrorKind::FieldMismatch,
            self.entity_name(),
            format!("field '{}': {}", field, message),
        )
    }
}

fn flatten_fields(
    fields: &'static [FieldDescriptor],
    prefix: &str,
    top_level: bool,
    path: &mut Vec<&'static str>,
    stack: &mut Vec<&'static EmbeddableDescriptor>,
    columns: &mut Vec<ColumnMapping>,
    problems: &mut Vec<String>,
) {
    let mut seen = HashSet::new();
    for field in fields {
        if !seen.insert(field.name) {
            problems.push(format!("field '{}' declared more than once", field.name));
        }
        if !is_identifier(field.name) {
            problems.push(format!("field name '{}' is not a valid identifier", field.name));
        }
        path.push(field.name);
        match field.kind {
            FieldKind::Id { column, sql_type } => {
                if !top_level {
                    problems.push(format!(
                        "embedded field '{}' declares an id; embeddables have no identity",
                        path.join(".")
                    ));
                }
                push_column(
                    prefix, column, sql_type, false, top_level, path, columns, problems,
                );
            }
            FieldKind::Column {
                column,
                sql_type,
                nullable,
            } => push_column(
                prefix, column, sql_type, nullable, false, path, columns, problems,
            ),
            FieldKind::Embedded {
                prefix: nested_prefix,
                descriptor,
            } => {
                let embedded = descriptor();
                if stack.iter().any(|seen| std::ptr::eq(*seen, embedded)) {
                    problems.push(format!(
                        "embeddable '{}' contains itself through '{}'",
                        embedded.name,
                        path.join(".")
                    ));
                } else if embedded.fields.is_empty() {
                    problems.push(format!("embeddable '{}' has no fields", embedded.name));
                } else {
                    stack.push(embedded);
                    let combined = format!("{}{}", prefix, nested_prefix);
                    flatten_fields(
                        embedded.fields,
                        &combined,
                        false,
                        path,
                        stack,
                        columns,
                        problems,
                    );
                    stack.pop();
                }
            }
        }
        path.pop();
    }
}

#[allow(clippy::too_many_arguments)]
fn push_column(
    prefix: &str,
    column: &str,
    sql_type: SqlType,
    nullable: bool,
    primary_key: bool,
    path: &[&'static str],
    columns: &mut Vec<ColumnMapping>,
    problems: &mut Vec<String>,
) {
    let name = format!("{}{}", prefix, column);
    if !is_identifier(&name) {
        problems.push(format!("column name '{}' is not a valid identifier", name));
    }
    if primary_key && nullable {
        problems.push(format!("id column '{}' cannot be nullable", name));
    }
    columns.push(ColumnMapping {
        field_path: path.to_vec(),
        column: name,
        sql_type,
        nullable,
        primary_key,
    });
}

/// Entity type -> validated mapping.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    mappings: Vec<Arc<TableMapping>>,
    by_type: HashMap<TypeId, usize>,
    by_name: HashMap<&'static str, usize>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type. Registering the same type twice is a no-op.
    #[allow(clippy::result_large_err)]
    pub fn register<E: Entity>(&mut self) -> Result<Arc<TableMapping>> {
        self.register_descriptor(TypeId::of::<E>(), E::descriptor())
    }

    #[allow(clippy::result_large_err)]
    pub fn register_descriptor(
        &mut self,
        type_id: TypeId,
        descriptor: &'static EntityDescriptor,
    ) -> Result<Arc<TableMapping>> {
        if let Some(&index) = self.by_type.get(&type_id) {
            return Ok(Arc::clone(&self.mappings[index]));
        }
        if self.by_name.contains_key(descriptor.name) {
            return Err(Error::mapping(
                MappingErrorKind::InvalidDescriptor,
                descriptor.name,
                "another entity type is registered under this name",
            ));
        }
        if let Some(other) = self
            .mappings
            .iter()
            .find(|m| m.table().eq_ignore_ascii_case(descriptor.table))
        {
            return Err(Error::mapping(
                MappingErrorKind::InvalidDescriptor,
                descriptor.name,
                format!(
                    "table '{}' is already mapped by '{}'",
                    descriptor.table,
                    other.entity_name()
                ),
            ));
        }

        let mapping = Arc::new(TableMapping::new(type_id, descriptor)?);
        tracing::debug!(
            entity = descriptor.name,
            table = descriptor.table,
            columns = mapping.columns().len(),
            "Registered entity mapping"
        );

        let index = self.mappings.len();
        self.mappings.push(Arc::clone(&mapping));
        self.by_type.insert(type_id, index);
        self.by_name.insert(descriptor.name, index);
        Ok(mapping)
    }

    /// Mapping for `E`, or an `Unregistered` mapping error.
    #[allow(clippy::result_large_err)]
    pub fn mapping<E: Entity>(&self) -> Result<&Arc<TableMapping>> {
        self.mapping_for(TypeId::of::<E>()).ok_or_else(|| {
            Error::mapping(
                MappingErrorKind::Unregistered,
                E::descriptor().name,
                "entity type is not registered with the configuration",
            )
        })
    }

    pub fn mapping_for(&self, type_id: TypeId) -> Option<&Arc<TableMapping>> {
        self.by_type.get(&type_id).map(|&i| &self.mappings[i])
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<TableMapping>> {
        self.by_name.get(name).map(|&i| &self.mappings[i])
    }

    pub fn contains<E: Entity>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<E>())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TableMapping>> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
