//! Core types and traits for SessionORM.
//!
//! This crate provides the foundational abstractions shared by the session
//! layer and the storage drivers:
//!
//! - `Entity` / `Embeddable` traits and their declarative descriptors
//! - `EntityRegistry` of validated table mappings
//! - `Storage` trait, the boundary to the row store
//! - `Configuration` for building a session factory
//! - `Value`, `Row` and `PrimaryKey` data types

pub mod config;
pub mod descriptor;
pub mod entity;
pub mod error;
pub mod key;
pub mod record;
pub mod registry;
pub mod row;
pub mod storage;
pub mod types;
pub mod value;

pub use config::{Configuration, ConnectionConfig, Dialect, SchemaAction, Settings};
pub use descriptor::{EmbeddableDescriptor, EntityDescriptor, FieldDescriptor, FieldKind};
pub use entity::{Embeddable, Entity};
pub use error::{
    CommitError, ConfigError, Error, KeyError, MappingError, MappingErrorKind, Result,
    StorageError, StorageErrorKind, TransactionError, TransactionErrorKind, TypeError,
};
pub use key::PrimaryKey;
pub use record::{FieldValue, Record};
pub use registry::{ColumnMapping, EntityRegistry, TableMapping};
pub use row::{ColumnInfo, Row};
pub use storage::{ColumnSchema, Storage, TableSchema, WriteBatch, WriteOp};
pub use types::{ColumnType, SqlType};
pub use value::Value;
