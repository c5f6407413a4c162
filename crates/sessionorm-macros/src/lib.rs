//! Procedural macros for SessionORM.
//!
//! `#[derive(Entity)]` and `#[derive(Embeddable)]` turn plain structs into
//! mapped types: they emit the static descriptor the registry validates and
//! the record conversions the session uses to read and write rows.
//!
//! These macros are used by application crates via the `sessionorm` facade.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;

mod parse;
mod validate;

use parse::{DeriveKind, FieldDef, TypeDef, parse_type};

/// Derive macro for the `Entity` trait.
///
/// # Attributes
///
/// - `#[entity(table = "name")]` - Override table name (defaults to snake_case struct name)
/// - `#[entity(name = "Name")]` - Override the entity name used in errors
/// - `#[entity(id)]` - Mark the primary-key field (exactly one)
/// - `#[entity(column = "name")]` - Override column name
/// - `#[entity(embedded)]` - Flatten an `Embeddable` value into this table
/// - `#[entity(embedded, prefix = "p_")]` - Same, prefixing its column names
/// - `#[entity(transient)]` - Not stored; set to `Default::default()` on load
///
/// # Example
///
/// ```ignore
/// use sessionorm::{Embeddable, Entity};
///
/// #[derive(Embeddable, Clone, Debug, PartialEq)]
/// struct StudentName {
///     #[entity(column = "first_name")]
///     first: String,
///     #[entity(column = "last_name")]
///     last: String,
/// }
///
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
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    expand(input, DeriveKind::Entity)
}

/// Derive macro for the `Embeddable` trait.
///
/// Accepts the field attributes of `#[derive(Entity)]` except `id`.
#[proc_macro_derive(Embeddable, attributes(entity))]
pub fn derive_embeddable(input: TokenStream) -> TokenStream {
    expand(input, DeriveKind::Embeddable)
}

fn expand(input: TokenStream, kind: DeriveKind) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let def = match parse_type(&input, kind) {
        Ok(def) => def,
        Err(e) => return e.to_compile_error().into(),
    };

    if let Err(e) = validate::validate_type(&def) {
        return e.to_compile_error().into();
    }

    match kind {
        DeriveKind::Entity => generate_entity_impl(&def),
        DeriveKind::Embeddable => generate_embeddable_impl(&def),
    }
    .into()
}

fn generate_entity_impl(def: &TypeDef) -> TokenStream2 {
    let name = &def.ident;
    let entity_name = &def.entity_name;
    let table_name = &def.table_name;
    let field_descriptors = generate_field_descriptors(def);
    let to_record_body = generate_to_record(def);
    let from_record_body = generate_from_record(def);
    let primary_key_body = generate_primary_key(def);

    quote! {
        impl ::sessionorm_core::Entity for #name {
            fn descriptor() -> &'static ::sessionorm_core::EntityDescriptor {
                static FIELDS: &[::sessionorm_core::FieldDescriptor] = &[
                    #field_descriptors
                ];
                static DESCRIPTOR: ::sessionorm_core::EntityDescriptor =
                    ::sessionorm_core::EntityDescriptor::new(#entity_name, #table_name, FIELDS);
                &DESCRIPTOR
            }

            fn to_record(&self) -> ::sessionorm_core::Record {
                #to_record_body
            }

            fn from_record(
                mut record: ::sessionorm_core::Record,
            ) -> ::sessionorm_core::Result<Self> {
                #from_record_body
            }

            fn primary_key(&self) -> ::sessionorm_core::Value {
                #primary_key_body
            }
        }
    }
}

fn generate_embeddable_impl(def: &TypeDef) -> TokenStream2 {
    let name = &def.ident;
    let entity_name = &def.entity_name;
    let field_descriptors = generate_field_descriptors(def);
    let to_record_body = generate_to_record(def);
    let from_record_body = generate_from_record(def);

    quote! {
        impl ::sessionorm_core::Embeddable for #name {
            fn descriptor() -> &'static ::sessionorm_core::EmbeddableDescriptor {
                static FIELDS: &[::sessionorm_core::FieldDescriptor] = &[
                    #field_descriptors
                ];
                static DESCRIPTOR: ::sessionorm_core::EmbeddableDescriptor =
                    ::sessionorm_core::EmbeddableDescriptor::new(#entity_name, FIELDS);
                &DESCRIPTOR
            }

            fn to_record(&self) -> ::sessionorm_core::Record {
                #to_record_body
            }

            fn from_record(
                mut record: ::sessionorm_core::Record,
            ) -> ::sessionorm_core::Result<Self> {
                #from_record_body
            }
        }
    }
}

/// One `FieldDescriptor` expression per stored field, in declaration order.
fn generate_field_descriptors(def: &TypeDef) -> TokenStream2 {
    let descriptors = def.persistent_fields().map(|field| {
        let field_name = field.name.to_string();
        let column = &field.column_name;
        let ty = &field.ty;

        if field.embedded {
            let prefix = field.prefix.as_deref().unwrap_or("");
            quote! {
                ::sessionorm_core::FieldDescriptor::embedded(
                    #field_name,
                    #prefix,
                    <#ty as ::sessionorm_core::Embeddable>::descriptor,
                )
            }
        } else if field.id {
            quote! {
                ::sessionorm_core::FieldDescriptor::id(
                    #field_name,
                    #column,
                    <#ty as ::sessionorm_core::ColumnType>::SQL_TYPE,
                )
            }
        } else {
            quote! {
                ::sessionorm_core::FieldDescriptor::column(
                    #field_name,
                    #column,
                    <#ty as ::sessionorm_core::ColumnType>::SQL_TYPE,
                    <#ty as ::sessionorm_core::ColumnType>::NULLABLE,
                )
            }
        }
    });

    quote! { #(#descriptors),* }
}

fn generate_to_record(def: &TypeDef) -> TokenStream2 {
    let capacity = def.persistent_fields().count();
    let pushes = def.persistent_fields().map(|field| {
        let ident = &field.name;
        let field_name = field.name.to_string();
        let ty = &field.ty;

        if field.embedded {
            quote! {
                record.push_embedded(
                    #field_name,
                    <#ty as ::sessionorm_core::Embeddable>::to_record(&self.#ident),
                );
            }
        } else {
            quote! {
                record.push(
                    #field_name,
                    <#ty as ::sessionorm_core::ColumnType>::to_value(&self.#ident),
                );
            }
        }
    });

    quote! {
        let mut record = ::sessionorm_core::Record::with_capacity(#capacity);
        #(#pushes)*
        record
    }
}

fn generate_from_record(def: &TypeDef) -> TokenStream2 {
    let inits = def.fields.iter().map(field_init);
    quote! {
        Ok(Self {
            #(#inits),*
        })
    }
}

fn field_init(field: &FieldDef) -> TokenStream2 {
    let ident = &field.name;
    let field_name = field.name.to_string();
    let ty = &field.ty;

    if field.transient {
        quote! { #ident: ::core::default::Default::default() }
    } else if field.embedded {
        quote! { #ident: record.take_embedded::<#ty>(#field_name)? }
    } else {
        quote! { #ident: record.take_column::<#ty>(#field_name)? }
    }
}

fn generate_primary_key(def: &TypeDef) -> TokenStream2 {
    match def.id_fields().next() {
        Some(field) => {
            let ident = &field.name;
            let ty = &field.ty;
            quote! { <#ty as ::sessionorm_core::ColumnType>::to_value(&self.#ident) }
        }
        // Unreachable after validation.
        None => quote! { ::sessionorm_core::Value::Null },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::{DeriveInput, parse_quote};

    fn entity_tokens(input: &DeriveInput) -> String {
        let def = parse_type(input, DeriveKind::Entity).unwrap();
        validate::validate_type(&def).unwrap();
        generate_entity_impl(&def).to_string()
    }

    #[test]
    fn test_entity_descriptor_uses_mapped_names() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "student_table")]
            struct Student {
                #[entity(id, column = "s_id")]
                id: i32,
                #[entity(embedded, prefix = "home_")]
                address: Address,
                age: i32,
            }
        };
        let tokens = entity_tokens(&input);
        assert!(tokens.contains("\"student_table\""));
        assert!(tokens.contains("\"s_id\""));
        assert!(tokens.contains("\"home_\""));
        assert!(tokens.contains("take_embedded"));
        assert!(tokens.contains("FieldDescriptor :: id"));
    }

    #[test]
    fn test_transient_fields_are_not_stored() {
        let input: DeriveInput = parse_quote! {
            struct Laptop {
                #[entity(id)]
                id: i32,
                model: String,
                #[entity(transient)]
                seen: u32,
            }
        };
        let def = parse_type(&input, DeriveKind::Entity).unwrap();
        let to_record = generate_to_record(&def).to_string();
        assert!(to_record.contains("\"model\""));
        assert!(!to_record.contains("\"seen\""));

        let from_record = generate_from_record(&def).to_string();
        assert!(from_record.contains("Default :: default"));
        assert!(!from_record.contains("\"seen\""));
    }
}
