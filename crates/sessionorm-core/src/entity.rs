//! Entity and embeddable traits.
//!
//! The `Entity` trait defines the contract for structs that can be
//! persisted through a session. It is typically derived using the
//! `#[derive(Entity)]` macro from `sessionorm-macros`.

use crate::Result;
use crate::descriptor::{EmbeddableDescriptor, EntityDescriptor};
use crate::key::PrimaryKey;
use crate::record::Record;
use crate::value::Value;

/// A struct persisted as one row of one table.
///
/// # Example
///
/// ```ignore
/// #[derive(Entity, Clone, Debug, PartialEq)]
/// #[entity(table = "student_table")]
/// struct Student {
///     #[entity(id, column = "s_id")]
///     id: i32,
///     #[entity(embedded)]
///     name: StudentName,
///     age: i32,
/// }
/// ```
pub trait Entity: Clone + Send + Sync + 'static {
    /// Static mapping metadata.
    fn descriptor() -> &'static EntityDescriptor;

    /// Decompose into a field tree matching the descriptor.
    fn to_record(&self) -> Record;

    /// Rebuild from a field tree matching the descriptor.
    #[allow(clippy::result_large_err)]
    fn from_record(record: Record) -> Result<Self>;

    /// Raw value of the primary-key field.
    fn primary_key(&self) -> Value;

    /// Normalized primary key.
    #[allow(clippy::result_large_err)]
    fn key(&self) -> Result<PrimaryKey> {
        Ok(PrimaryKey::from_value(&self.primary_key())?)
    }
}

/// A value object stored in its owner's row.
pub trait Embeddable: Clone + Send + Sync + 'static {
    fn descriptor() -> &'static EmbeddableDescriptor;

    fn to_record(&self) -> Record;

    #[allow(clippy::result_large_err)]
    fn from_record(record: Record) -> Result<Self>;
}
