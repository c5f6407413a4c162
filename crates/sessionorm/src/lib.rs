//! SessionORM - a small unit-of-work persistence session for Rust.
//!
//! SessionORM maps plain structs onto table rows and tracks them in a
//! session:
//!
//! - Declarative entity mapping with `#[derive(Entity)]` and embedded
//!   value objects with `#[derive(Embeddable)]`
//! - A `SessionFactory` built once from a `Configuration`
//! - Sessions with an identity map, dirty checking and lazy references
//! - Transactions that write all pending changes atomically at commit
//! - In-memory and JSON file storage drivers
//!
//! # Quick Start
//!
//! ```ignore
//! use sessionorm::prelude::*;
//!
//! #[derive(Embeddable, Clone, Debug, PartialEq)]
//! struct StudentName {
//!     first: String,
//!     last: String,
//! }
//!
//! #[derive(Entity, Clone, Debug, PartialEq)]
//! #[entity(table = "student_table")]
//! struct Student {
//!     #[entity(id, column = "s_id")]
//!     id: i32,
//!     #[entity(embedded)]
//!     name: StudentName,
//!     age: i32,
//! }
//!
//! fn main() -> Result<()> {
//!     let factory = SessionFactory::build(
//!         &Configuration::new().url("memory://school").register::<Student>(),
//!     )?;
//!     let session = factory.open_session()?;
//!
//!     let mut tx = session.begin_transaction()?;
//!     let student = session.persist(Student {
//!         id: 1,
//!         name: StudentName { first: "Ada".into(), last: "Byron".into() },
//!         age: 20,
//!     })?;
//!     tx.commit()?;
//!
//!     // Changes to managed instances are written at the next commit.
//!     let mut tx = session.begin_transaction()?;
//!     student.write().age = 21;
//!     tx.commit()?;
//!
//!     session.close()?;
//!     factory.close()
//! }
//! ```

// Re-export all public types from sub-crates
pub use sessionorm_core::{
    ColumnMapping, ColumnType, CommitError, ConfigError, Configuration, ConnectionConfig,
    Dialect, Embeddable, EmbeddableDescriptor, Entity, EntityDescriptor, EntityRegistry, Error,
    FieldDescriptor, FieldKind, KeyError, MappingError, MappingErrorKind, PrimaryKey, Record,
    Result, Row, SchemaAction, Settings, SqlType, Storage, StorageError, StorageErrorKind,
    TableMapping, TableSchema, TransactionError, TransactionErrorKind, TypeError, Value,
    WriteBatch, WriteOp,
};

pub use sessionorm_macros::{Embeddable, Entity};

pub use sessionorm_session::{
    EntitySnapshot, EntityState, FactoryCell, FactoryStats, Managed, Reference, ReferenceState,
    Session, SessionDebugInfo, SessionFactory, Transaction, TransactionState,
};

pub use sessionorm_store::{JsonFileStorage, MemoryStorage, open_storage};

/// Everything needed to map entities and work with sessions.
pub mod prelude {
    pub use crate::{
        // Mapping
        Embeddable,
        Entity,
        // Errors
        Error,
        Result,
        // Sessions
        Configuration,
        FactoryCell,
        Managed,
        PrimaryKey,
        Reference,
        SchemaAction,
        Session,
        SessionFactory,
        Transaction,
        TransactionState,
    };
}
