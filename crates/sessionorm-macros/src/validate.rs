//! Compile-time validation for the Entity and Embeddable derives.
//!
//! All problems are collected and reported together, each pointing at the
//! field or name that caused it.

use std::collections::HashSet;

use proc_macro2::Span;
use syn::{Error, GenericArgument, PathArguments, Type};

use crate::parse::{DeriveKind, FieldDef, TypeDef};

/// Validate a parsed type definition.
pub fn validate_type(def: &TypeDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    if !def.generics.params.is_empty() {
        errors.push(Error::new(
            def.ident.span(),
            format!(
                "{} cannot be derived for generic types; descriptors are static",
                def.kind.name()
            ),
        ));
    }

    validate_has_persistent_fields(def, &mut errors);
    if def.kind == DeriveKind::Entity {
        validate_identifier(&def.table_name, "table", def.table_span, &mut errors);
    }
    validate_id_fields(def, &mut errors);
    validate_no_duplicate_columns(def, &mut errors);

    for field in &def.fields {
        validate_field(field, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let mut combined = errors.remove(0);
        for err in errors {
            combined.combine(err);
        }
        Err(combined)
    }
}

fn validate_has_persistent_fields(def: &TypeDef, errors: &mut Vec<Error>) {
    if def.persistent_fields().next().is_none() {
        errors.push(Error::new(
            def.ident.span(),
            format!("{} must have at least one stored field", def.kind.name()),
        ));
    }
}

/// Entities need exactly one id; embeddables have no identity.
fn validate_id_fields(def: &TypeDef, errors: &mut Vec<Error>) {
    let ids: Vec<&FieldDef> = def.id_fields().collect();
    match def.kind {
        DeriveKind::Entity => {
            if ids.is_empty() {
                errors.push(Error::new(
                    def.ident.span(),
                    "entity has no primary key; mark one field with #[entity(id)]",
                ));
            }
            for extra in ids.iter().skip(1) {
                errors.push(Error::new(
                    extra.name.span(),
                    "only one field may be marked #[entity(id)]",
                ));
            }
        }
        DeriveKind::Embeddable => {
            for field in ids {
                errors.push(Error::new(
                    field.name.span(),
                    "embeddables have no identity of their own; remove #[entity(id)]",
                ));
            }
        }
    }
}

/// No two stored scalar fields may map to the same column.
fn validate_no_duplicate_columns(def: &TypeDef, errors: &mut Vec<Error>) {
    let mut seen: HashSet<&str> = HashSet::new();

    for field in def.persistent_fields().filter(|f| !f.embedded) {
        if !seen.insert(&field.column_name) {
            errors.push(Error::new(
                field.name.span(),
                format!(
                    "duplicate column name '{}'; another field already maps to this column",
                    field.column_name
                ),
            ));
        }
    }
}

fn validate_field(field: &FieldDef, errors: &mut Vec<Error>) {
    let span = field.name.span();

    if field.id && field.embedded {
        errors.push(Error::new(
            span,
            "an embedded value cannot be the primary key; composite keys are not supported",
        ));
    }
    if field.id && field.transient {
        errors.push(Error::new(span, "the primary key cannot be transient"));
    }
    if field.transient && field.embedded {
        errors.push(Error::new(
            span,
            "cannot use both #[entity(transient)] and #[entity(embedded)] on the same field",
        ));
    }
    if field.prefix.is_some() && !field.embedded {
        errors.push(Error::new(
            span,
            "`prefix` only applies to #[entity(embedded)] fields",
        ));
    }
    if field.column_set && field.embedded {
        errors.push(Error::new(
            span,
            "embedded fields span several columns; use `prefix` instead of `column`",
        ));
    }

    if !field.transient {
        if field.embedded {
            if let Some(prefix) = &field.prefix {
                validate_prefix(prefix, span, errors);
            }
        } else {
            validate_identifier(&field.column_name, "column", span, errors);
        }
        validate_field_type(&field.ty, span, errors);
    }
}

/// Table and column names must be plain identifiers.
fn validate_identifier(name: &str, what: &str, span: Span, errors: &mut Vec<Error>) {
    if name.trim().is_empty() {
        errors.push(Error::new(span, format!("{what} name cannot be empty")));
        return;
    }
    if let Some(bad) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        errors.push(Error::new(
            span,
            format!(
                "{what} name contains invalid character '{bad}'; \
                 use only ASCII letters, digits and underscores"
            ),
        ));
        return;
    }
    if let Some(first) = name.chars().next() {
        if first.is_ascii_digit() {
            errors.push(Error::new(
                span,
                format!("{what} name must start with a letter or underscore, got '{first}'"),
            ));
        }
    }
}

fn validate_prefix(prefix: &str, span: Span, errors: &mut Vec<Error>) {
    if let Some(bad) = prefix.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        errors.push(Error::new(
            span,
            format!("column prefix contains invalid character '{bad}'"),
        ));
    }
}

fn validate_field_type(ty: &Type, span: Span, errors: &mut Vec<Error>) {
    if is_nested_option(ty) {
        errors.push(Error::new(
            span,
            "nested Option<Option<T>> is ambiguous and not supported; \
             use a single Option<T>",
        ));
    }
    if matches!(ty, Type::Reference(_)) {
        errors.push(Error::new(
            span,
            "reference types (&T) are not supported; use owned types instead",
        ));
    }
    if matches!(ty, Type::Ptr(_)) {
        errors.push(Error::new(
            span,
            "raw pointer types (*const T, *mut T) are not supported; use owned types instead",
        ));
    }
}

/// Check if a type is Option<Option<T>>.
fn is_nested_option(ty: &Type) -> bool {
    let Type::Path(type_path) = ty else {
        return false;
    };
    let Some(segment) = type_path.path.segments.last() else {
        return false;
    };
    if segment.ident != "Option" {
        return false;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return false;
    };
    matches!(
        args.args.first(),
        Some(GenericArgument::Type(Type::Path(inner)))
            if inner.path.segments.last().is_some_and(|s| s.ident == "Option")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_type;
    use syn::{DeriveInput, parse_quote};

    fn check(input: &DeriveInput, kind: DeriveKind) -> Result<(), Error> {
        validate_type(&parse_type(input, kind)?)
    }

    #[test]
    fn test_is_nested_option() {
        let ty: Type = parse_quote!(Option<Option<i32>>);
        assert!(is_nested_option(&ty));

        let ty: Type = parse_quote!(Option<i32>);
        assert!(!is_nested_option(&ty));

        let ty: Type = parse_quote!(i32);
        assert!(!is_nested_option(&ty));
    }

    #[test]
    fn test_valid_entity() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "student_table")]
            struct Student {
                #[entity(id, column = "s_id")]
                id: i32,
                #[entity(embedded, prefix = "s_")]
                name: StudentName,
                age: Option<i32>,
                #[entity(transient)]
                scratch: Vec<&'static str>,
            }
        };
        assert!(check(&input, DeriveKind::Entity).is_ok());
    }

    #[test]
    fn test_entity_requires_one_id() {
        let none: DeriveInput = parse_quote! {
            struct Student { name: String }
        };
        let err = check(&none, DeriveKind::Entity).unwrap_err();
        assert!(err.to_string().contains("no primary key"));

        let two: DeriveInput = parse_quote! {
            struct Student {
                #[entity(id)]
                a: i32,
                #[entity(id)]
                b: i32,
            }
        };
        assert!(check(&two, DeriveKind::Entity).is_err());
    }

    #[test]
    fn test_embeddable_rejects_id() {
        let input: DeriveInput = parse_quote! {
            struct StudentName {
                #[entity(id)]
                first: String,
            }
        };
        let err = check(&input, DeriveKind::Embeddable).unwrap_err();
        assert!(err.to_string().contains("no identity"));
    }

    #[test]
    fn test_reports_all_problems_together() {
        let input: DeriveInput = parse_quote! {
            struct Student {
                #[entity(id, embedded)]
                id: Key,
                #[entity(column = "age")]
                years: i32,
                age: i32,
                #[entity(prefix = "x_")]
                nick: &'static str,
            }
        };
        let err = check(&input, DeriveKind::Entity).unwrap_err();
        assert_eq!(err.into_iter().count(), 4);
    }

    #[test]
    fn test_invalid_names() {
        let mut errors = Vec::new();
        validate_identifier("student_table", "table", Span::call_site(), &mut errors);
        validate_identifier("_internal", "table", Span::call_site(), &mut errors);
        assert!(errors.is_empty());

        validate_identifier("students; DROP", "table", Span::call_site(), &mut errors);
        validate_identifier("1st", "column", Span::call_site(), &mut errors);
        validate_identifier(" ", "column", Span::call_site(), &mut errors);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_rejects_generics() {
        let input: DeriveInput = parse_quote! {
            struct Wrapper<T> {
                #[entity(id)]
                id: i32,
                value: T,
            }
        };
        assert!(check(&input, DeriveKind::Entity).is_err());
    }
}
