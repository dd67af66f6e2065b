//! Derive macros for Composable Data
//!
//! This crate provides procedural macros to reduce boilerplate when
//! describing entities for specifications and repositories.
//!
//! # Available Macros
//!
//! - `#[derive(Entity)]` - Implements `Entity` and generates typed field constants
//!
//! # Example
//!
//! ```ignore
//! use composable_data_macros::Entity;
//!
//! #[derive(Entity, Clone, Debug)]
//! #[entity(table = "todos")]
//! struct Todo {
//!     #[entity(id)]
//!     id: Uuid,
//!     user_id: i64,
//!     title: String,
//!     is_completed: bool,
//! }
//!
//! // Generated constants:
//! let spec = Specification::eq(Todo::USER_ID, 7).and(Specification::eq(Todo::IS_COMPLETED, false));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, LitStr, Type};

/// Derive macro for entity structs
///
/// Generates:
/// - One `Field<Self, T>` constant per persisted field, named in
///   `UPPER_SNAKE_CASE` (`user_id` becomes `Todo::USER_ID`)
/// - An `Entity` implementation: schema, field access and record decoding
///
/// # Attributes
///
/// - `#[entity(table = "name")]` on the struct - Collection name (default: snake case of the struct name plus `s`)
/// - `#[entity(id)]` on a field - Identifier field (default: the field named `id`)
/// - `#[entity(skip)]` on a field - Not persisted; rebuilt with `Default::default()`
///
/// # Panics
///
/// This macro will produce a compile error (not a runtime panic) if:
/// - Applied to anything but a struct with named fields
/// - Applied to a generic struct
/// - No identifier field can be found, or more than one is marked
///
/// # Example
///
/// ```ignore
/// #[derive(Entity, Clone, Debug)]
/// #[entity(table = "projects")]
/// struct Project {
///     #[entity(id)]
///     project_id: i64,
///     name: String,
///     archived_at: Option<DateTime<Utc>>,
/// }
///
/// assert_eq!(Project::NAME, "projects");
/// assert_eq!(Project::ARCHIVED_AT.name(), "archived_at");
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_entity(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Field-level options
struct FieldOptions {
    id: bool,
    skip: bool,
}

/// A persisted field
struct Persisted<'a> {
    ident: &'a Ident,
    name: String,
    ty: &'a Type,
}

fn expand_entity(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "#[derive(Entity)] does not support generic structs",
        ));
    }

    let Data::Struct(data_struct) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "#[derive(Entity)] can only be used on structs",
        ));
    };

    let Fields::Named(named) = &data_struct.fields else {
        return Err(syn::Error::new_spanned(
            &data_struct.fields,
            "#[derive(Entity)] requires named fields",
        ));
    };

    let table = table_name(&input.attrs)?.unwrap_or_else(|| default_table_name(&name.to_string()));

    let mut persisted = Vec::new();
    let mut skipped = Vec::new();
    let mut marked_id = None;

    for field in &named.named {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let options = field_options(&field.attrs)?;
        if options.skip {
            if options.id {
                return Err(syn::Error::new_spanned(field, "the identifier field cannot be skipped"));
            }
            skipped.push(ident);
            continue;
        }
        let field_name = ident.to_string().trim_start_matches("r#").to_string();
        if options.id {
            if marked_id.is_some() {
                return Err(syn::Error::new_spanned(field, "only one field can be marked #[entity(id)]"));
            }
            marked_id = Some(persisted.len());
        }
        persisted.push(Persisted {
            ident,
            name: field_name,
            ty: &field.ty,
        });
    }

    let id_index = marked_id
        .or_else(|| persisted.iter().position(|field| field.name == "id"))
        .ok_or_else(|| {
            syn::Error::new_spanned(
                name,
                "no identifier field: add a field named `id` or mark one with #[entity(id)]",
            )
        })?;
    let id_field = &persisted[id_index];
    let id_ident = id_field.ident;
    let id_name = &id_field.name;
    let id_ty = id_field.ty;

    let field_consts = persisted.iter().map(|field| {
        let const_name = Ident::new(&field.name.to_uppercase(), Span::call_site());
        let field_name = &field.name;
        let ty = field.ty;
        let doc = format!("Field `{field_name}`");
        quote! {
            #[doc = #doc]
            pub const #const_name: ::composable_data_core::entity::Field<Self, #ty> =
                ::composable_data_core::entity::Field::new(#field_name);
        }
    });

    let field_defs = persisted.iter().map(|field| {
        let field_name = &field.name;
        let ty = field.ty;
        quote! { ::composable_data_core::entity::FieldDef::of::<#ty>(#field_name) }
    });

    let value_arms = persisted.iter().map(|field| {
        let field_name = &field.name;
        let ident = field.ident;
        quote! {
            #field_name => ::std::option::Option::Some(
                ::composable_data_core::value::IntoValue::into_value(
                    ::std::clone::Clone::clone(&self.#ident),
                ),
            ),
        }
    });

    let decode_fields = persisted.iter().map(|field| {
        let field_name = &field.name;
        let ident = field.ident;
        quote! { #ident: record.take(#field_name)?, }
    });

    let default_fields = skipped.iter().map(|ident| {
        quote! { #ident: ::std::default::Default::default(), }
    });

    Ok(quote! {
        impl #name {
            #(#field_consts)*
        }

        impl ::composable_data_core::entity::Entity for #name {
            type Id = #id_ty;

            const NAME: &'static str = #table;
            const ID_FIELD: &'static str = #id_name;

            fn id(&self) -> Self::Id {
                ::std::clone::Clone::clone(&self.#id_ident)
            }

            fn fields() -> &'static [::composable_data_core::entity::FieldDef] {
                const FIELDS: &[::composable_data_core::entity::FieldDef] = &[#(#field_defs),*];
                FIELDS
            }

            fn value_of(
                &self,
                field: &str,
            ) -> ::std::option::Option<::composable_data_core::value::Value> {
                match field {
                    #(#value_arms)*
                    _ => ::std::option::Option::None,
                }
            }

            fn from_record(
                mut record: ::composable_data_core::value::Record,
            ) -> ::composable_data_core::error::Result<Self> {
                ::std::result::Result::Ok(Self {
                    #(#decode_fields)*
                    #(#default_fields)*
                })
            }
        }
    })
}

/// Read `#[entity(table = "...")]` from the struct attributes
fn table_name(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut table = None;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: LitStr = meta.value()?.parse()?;
                table = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported entity attribute, expected `table = \"...\"`"))
            }
        })?;
    }
    Ok(table)
}

/// Read `#[entity(id)]` / `#[entity(skip)]` from field attributes
fn field_options(attrs: &[Attribute]) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions { id: false, skip: false };
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                options.id = true;
                Ok(())
            } else if meta.path.is_ident("skip") {
                options.skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported entity field attribute, expected `id` or `skip`"))
            }
        })?;
    }
    Ok(options)
}

/// `TodoItem` becomes `todo_items`
fn default_table_name(type_name: &str) -> String {
    let mut snake = String::with_capacity(type_name.len() + 4);
    for (i, ch) in type_name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                snake.push('_');
            }
            snake.extend(ch.to_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake.push('s');
    snake
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_name_is_plural_snake_case() {
        assert_eq!(default_table_name("Todo"), "todos");
        assert_eq!(default_table_name("TodoItem"), "todo_items");
    }

    #[test]
    fn rejects_enums() {
        let input: DeriveInput = syn::parse_quote! {
            enum NotAnEntity { A, B }
        };
        assert!(expand_entity(&input).is_err());
    }

    #[test]
    fn requires_an_identifier() {
        let input: DeriveInput = syn::parse_quote! {
            struct Anonymous { title: String }
        };
        let error = expand_entity(&input).err().map(|e| e.to_string());
        assert!(error.is_some_and(|message| message.contains("no identifier field")));
    }

    #[test]
    fn rejects_two_identifiers() {
        let input: DeriveInput = syn::parse_quote! {
            struct Twice {
                #[entity(id)]
                a: i64,
                #[entity(id)]
                b: i64,
            }
        };
        assert!(expand_entity(&input).is_err());
    }

    #[test]
    fn rejects_unknown_attributes() {
        let input: DeriveInput = syn::parse_quote! {
            #[entity(collection = "x")]
            struct Odd { id: i64 }
        };
        assert!(expand_entity(&input).is_err());
    }

    #[test]
    fn expands_constants_and_impl() {
        let input: DeriveInput = syn::parse_quote! {
            #[entity(table = "todos")]
            struct Todo {
                id: i64,
                user_id: i64,
            }
        };
        let expanded = expand_entity(&input).map(|tokens| tokens.to_string()).unwrap_or_default();
        assert!(expanded.contains("pub const USER_ID"));
        assert!(expanded.contains("\"todos\""));
    }
}
