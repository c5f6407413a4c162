//! Declarative entity and embeddable descriptors.
//!
//! Descriptors are plain `static` data, usually emitted by
//! `#[derive(Entity)]` / `#[derive(Embeddable)]`, but they can be written by
//! hand:
//!
//! ```ignore
//! static STUDENT_FIELDS: &[FieldDescriptor] = &[
//!     FieldDescriptor::id("id", "s_id", SqlType::Integer),
//!     FieldDescriptor::column("name", "s_name", SqlType::Text, false),
//!     FieldDescriptor::column("age", "age", SqlType::Integer, false),
//! ];
//! static STUDENT: EntityDescriptor = EntityDescriptor::new("Student", "student_table", STUDENT_FIELDS);
//! ```

use crate::types::SqlType;

/// Metadata describing how an entity maps onto one table.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Entity name (usually the Rust type name)
    pub name: &'static str,
    /// Table the entity is stored in
    pub table: &'static str,
    /// Fields in declaration order
    pub fields: &'static [FieldDescriptor],
}

impl EntityDescriptor {
    pub const fn new(
        name: &'static str,
        table: &'static str,
        fields: &'static [FieldDescriptor],
    ) -> Self {
        Self {
            name,
            table,
            fields,
        }
    }

    /// The primary-key field, if the descriptor declares one at top level.
    pub fn id_field(&self) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|f| f.is_id())
    }
}

/// Metadata for a value object flattened into its owner's table.
///
/// Embeddables have no identity of their own: they may not declare an id.
#[derive(Debug)]
pub struct EmbeddableDescriptor {
    pub name: &'static str,
    pub fields: &'static [FieldDescriptor],
}

impl EmbeddableDescriptor {
    pub const fn new(name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self { name, fields }
    }
}

/// One field of an entity or embeddable.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    /// Rust field name
    pub name: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// The primary key column
    Id {
        column: &'static str,
        sql_type: SqlType,
    },
    /// A plain column
    Column {
        column: &'static str,
        sql_type: SqlType,
        nullable: bool,
    },
    /// A nested value object; its columns are prefixed with `prefix`
    Embedded {
        prefix: &'static str,
        descriptor: fn() -> &'static EmbeddableDescriptor,
    },
}

impl FieldDescriptor {
    pub const fn id(name: &'static str, column: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            kind: FieldKind::Id { column, sql_type },
        }
    }

    pub const fn column(
        name: &'static str,
        column: &'static str,
        sql_type: SqlType,
        nullable: bool,
    ) -> Self {
        Self {
            name,
            kind: FieldKind::Column {
                column,
                sql_type,
                nullable,
            },
        }
    }

    pub const fn embedded(
        name: &'static str,
        prefix: &'static str,
        descriptor: fn() -> &'static EmbeddableDescriptor,
    ) -> Self {
        Self {
            name,
            kind: FieldKind::Embedded { prefix, descriptor },
        }
    }

    pub const fn is_id(&self) -> bool {
        matches!(self.kind, FieldKind::Id { .. })
    }

    /// Column name for scalar fields.
    pub const fn column_name(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::Id { column, .. } | FieldKind::Column { column, .. } => Some(column),
            FieldKind::Embedded { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static NAME_FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::column("first", "first_name", SqlType::Text, false),
        FieldDescriptor::column("last", "last_name", SqlType::Text, true),
    ];
    static NAME: EmbeddableDescriptor = EmbeddableDescriptor::new("Name", NAME_FIELDS);

    fn name() -> &'static EmbeddableDescriptor {
        &NAME
    }

    static PERSON_FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::id("id", "p_id", SqlType::Integer),
        FieldDescriptor::embedded("name", "", name),
    ];
    static PERSON: EntityDescriptor = EntityDescriptor::new("Person", "person", PERSON_FIELDS);

    #[test]
    fn static_descriptors() {
        let id = PERSON.id_field().unwrap();
        assert_eq!(id.name, "id");
        assert_eq!(id.column_name(), Some("p_id"));
        assert!(PERSON.fields[1].column_name().is_none());

        match PERSON.fields[1].kind {
            FieldKind::Embedded { descriptor, .. } => assert_eq!(descriptor().fields.len(), 2),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
