//! Parsing logic for the Entity and Embeddable derive macros.
//!
//! This module extracts struct-level and field-level `#[entity(...)]`
//! attributes from the derive input to build `TypeDef` and `FieldDef`
//! structures used for validation and code generation.

use proc_macro2::Span;
use syn::{Attribute, Data, DeriveInput, Error, Field, Fields, Generics, Ident, Lit, Result, Type};

/// Which derive is being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeriveKind {
    Entity,
    Embeddable,
}

impl DeriveKind {
    pub fn name(self) -> &'static str {
        match self {
            DeriveKind::Entity => "Entity",
            DeriveKind::Embeddable => "Embeddable",
        }
    }
}

/// Parsed definition of a struct with `#[derive(Entity)]` or `#[derive(Embeddable)]`.
#[derive(Debug)]
pub struct TypeDef {
    pub kind: DeriveKind,
    /// The struct name (e.g., `Student`).
    pub ident: Ident,
    /// Logical name used in errors and lookups; defaults to the struct name.
    pub entity_name: String,
    /// Table name; entities only.
    pub table_name: String,
    /// Span of the `table = ...` value, when given.
    pub table_span: Span,
    pub fields: Vec<FieldDef>,
    pub generics: Generics,
}

impl TypeDef {
    pub fn persistent_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.transient)
    }

    pub fn id_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.id)
    }
}

/// Parsed definition of one struct field.
#[derive(Debug)]
pub struct FieldDef {
    /// The Rust field name (e.g., `first_name`).
    pub name: Ident,
    /// Column name; defaults to the field name. Unused for embedded fields.
    pub column_name: String,
    /// Whether `column = ...` was given explicitly.
    pub column_set: bool,
    pub ty: Type,
    pub id: bool,
    pub embedded: bool,
    /// Column prefix applied to an embedded value's columns.
    pub prefix: Option<String>,
    /// Not stored; rebuilt with `Default::default()` on load.
    pub transient: bool,
}

/// Parse a derive input into a `TypeDef`.
pub fn parse_type(input: &DeriveInput, kind: DeriveKind) -> Result<TypeDef> {
    let ident = input.ident.clone();
    let generics = input.generics.clone();

    let StructAttrs {
        entity_name,
        table_name,
        table_span,
    } = parse_struct_attrs(&input.attrs, &ident, kind)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields, kind)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                format!("{} can only be derived for structs, not enums", kind.name()),
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                format!("{} can only be derived for structs, not unions", kind.name()),
            ));
        }
    };

    Ok(TypeDef {
        kind,
        ident,
        entity_name,
        table_name,
        table_span,
        fields,
        generics,
    })
}

struct StructAttrs {
    entity_name: String,
    table_name: String,
    table_span: Span,
}

/// Parse struct-level `#[entity(...)]` attributes.
///
/// Supported keys: `table = "name"` (entities only) and `name = "Name"`.
fn parse_struct_attrs(attrs: &[Attribute], ident: &Ident, kind: DeriveKind) -> Result<StructAttrs> {
    let mut entity_name: Option<String> = None;
    let mut table: Option<(String, Span)> = None;

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if kind == DeriveKind::Embeddable {
                    return Err(meta.error("embeddables are stored in their owner's table; remove `table`"));
                }
                let value: Lit = meta.value()?.parse()?;
                match value {
                    Lit::Str(lit) => {
                        table = Some((lit.value(), lit.span()));
                        Ok(())
                    }
                    other => Err(Error::new_spanned(other, "expected string literal for table name")),
                }
            } else if meta.path.is_ident("name") {
                let value: Lit = meta.value()?.parse()?;
                match value {
                    Lit::Str(lit) => {
                        entity_name = Some(lit.value());
                        Ok(())
                    }
                    other => Err(Error::new_spanned(other, "expected string literal for name")),
                }
            } else {
                Err(meta.error("unknown entity attribute; expected `table` or `name`"))
            }
        })?;
    }

    let entity_name = entity_name.unwrap_or_else(|| ident.to_string());
    let (table_name, table_span) =
        table.unwrap_or_else(|| (to_snake_case(&ident.to_string()), ident.span()));

    Ok(StructAttrs {
        entity_name,
        table_name,
        table_span,
    })
}

/// Convert a PascalCase struct name to the default snake_case table name.
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                // "StudentName" -> "student_name", "HTTPLog" -> "http_log"
                let should_underscore = prev.is_lowercase()
                    || (prev.is_uppercase() && next.is_some_and(|n| n.is_lowercase()));
                if should_underscore {
                    result.push('_');
                }
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

fn parse_fields(fields: &Fields, kind: DeriveKind) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            format!(
                "{} requires a struct with named fields, not a tuple struct",
                kind.name()
            ),
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            format!("{} requires a struct with fields, not a unit struct", kind.name()),
        )),
    }
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let attrs = parse_field_attrs(&field.attrs)?;

    Ok(FieldDef {
        column_name: attrs.column.clone().unwrap_or_else(|| name.to_string()),
        column_set: attrs.column.is_some(),
        name,
        ty: field.ty.clone(),
        id: attrs.id,
        embedded: attrs.embedded,
        prefix: attrs.prefix,
        transient: attrs.transient,
    })
}

#[derive(Default)]
struct FieldAttrs {
    column: Option<String>,
    id: bool,
    embedded: bool,
    prefix: Option<String>,
    transient: bool,
}

/// Parse all `#[entity(...)]` attributes on a field.
fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("id") {
                result.id = true;
            } else if path.is_ident("embedded") {
                result.embedded = true;
            } else if path.is_ident("transient") {
                result.transient = true;
            } else if path.is_ident("column") {
                let value: Lit = meta.value()?.parse()?;
                if let Lit::Str(lit_str) = value {
                    result.column = Some(lit_str.value());
                } else {
                    return Err(Error::new_spanned(
                        value,
                        "expected string literal for column name",
                    ));
                }
            } else if path.is_ident("prefix") {
                let value: Lit = meta.value()?.parse()?;
                if let Lit::Str(lit_str) = value {
                    result.prefix = Some(lit_str.value());
                } else {
                    return Err(Error::new_spanned(
                        value,
                        "expected string literal for column prefix",
                    ));
                }
            } else {
                return Err(meta.error(
                    "unknown entity attribute; expected `id`, `column`, `embedded`, `prefix` or `transient`",
                ));
            }
            Ok(())
        })?;
    }

    Ok(result)
}
