//! Entity schema: the fields a specification may reference.
//!
//! An [`Entity`] describes its fields once ([`Entity::fields`]) and exposes
//! them as typed [`Field`] constants. Specifications are built from those
//! constants, so a reference to a field that does not exist, or a literal of
//! the wrong type, is rejected by the compiler. `#[derive(Entity)]` from
//! `composable-data-macros` generates everything in this module for a
//! plain struct.

use crate::error::{DataError, Result};
use crate::value::{FieldType, IntoValue, Record, Value, ValueKind};
use std::fmt;
use std::marker::PhantomData;

/// Schema entry for one entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Field (and storage column) name
    pub name: &'static str,
    /// Storage kind
    pub kind: ValueKind,
    /// Whether the field may be null
    pub nullable: bool,
}

impl FieldDef {
    /// Schema entry for a field of Rust type `T`.
    #[must_use]
    pub const fn of<T: FieldType>(name: &'static str) -> Self {
        Self {
            name,
            kind: T::KIND,
            nullable: T::NULLABLE,
        }
    }

    /// Check that `value` may be stored in (or compared against) this field.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] on a kind mismatch or a null for a
    /// non-nullable field.
    pub fn check(&self, value: &Value) -> Result<()> {
        match value.kind() {
            None if self.nullable => Ok(()),
            None => Err(DataError::validation(format!(
                "field '{}' is not nullable",
                self.name
            ))),
            Some(kind) if kind == self.kind => Ok(()),
            Some(kind) => Err(DataError::validation(format!(
                "field '{}' holds {} values, got {kind}",
                self.name, self.kind
            ))),
        }
    }
}

/// An entity type addressable by specifications and repositories.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Identifier type
    type Id: IntoValue + Clone + fmt::Display + Send + Sync + 'static;

    /// Collection (table) name
    const NAME: &'static str;

    /// Name of the identifier field
    const ID_FIELD: &'static str;

    /// The identifier of this entity.
    fn id(&self) -> Self::Id;

    /// Every persisted field, identifier included.
    fn fields() -> &'static [FieldDef];

    /// Current value of `field`, `None` if the entity has no such field.
    fn value_of(&self, field: &str) -> Option<Value>;

    /// Rebuild an entity from stored field values.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Unknown`] if a field is missing or has the wrong kind.
    fn from_record(record: Record) -> Result<Self>;

    /// The identifier as a [`Value`].
    fn id_value(&self) -> Value {
        self.id().into_value()
    }

    /// Look up a field definition by name.
    #[must_use]
    fn field(name: &str) -> Option<&'static FieldDef> {
        Self::fields().iter().find(|def| def.name == name)
    }

    /// Look up a field definition by name, rejecting unknown names.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] if `name` is not a field of this entity.
    fn require_field(name: &str) -> Result<&'static FieldDef> {
        Self::field(name).ok_or_else(|| {
            DataError::validation(format!("'{}' has no field named '{name}'", Self::NAME))
        })
    }

    /// Snapshot all field values.
    fn to_record(&self) -> Record {
        Self::fields()
            .iter()
            .filter_map(|def| self.value_of(def.name).map(|value| (def.name, value)))
            .collect()
    }
}

/// Typed reference to a field of entity `E` holding Rust type `V`.
pub struct Field<E, V> {
    name: &'static str,
    _marker: PhantomData<fn(&E) -> V>,
}

impl<E, V> Field<E, V> {
    /// Create a field reference. Normally generated by `#[derive(Entity)]`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The field name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.name
    }
}

impl<E: Entity, V: FieldType> Field<E, V> {
    /// Read this field from an entity.
    #[must_use]
    pub fn get(self, entity: &E) -> Option<Value> {
        entity.value_of(self.name)
    }
}

impl<E, V> Clone for Field<E, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, V> Copy for Field<E, V> {}

impl<E, V> fmt::Debug for Field<E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Hand-written entity used by the core unit tests.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Note {
        pub id: i64,
        pub body: String,
        pub pinned: bool,
        pub rank: Option<i64>,
    }

    impl Note {
        pub const ID: Field<Self, i64> = Field::new("id");
        pub const BODY: Field<Self, String> = Field::new("body");
        pub const PINNED: Field<Self, bool> = Field::new("pinned");
        pub const RANK: Field<Self, Option<i64>> = Field::new("rank");

        pub fn new(id: i64, body: &str, pinned: bool, rank: Option<i64>) -> Self {
            Self {
                id,
                body: body.to_string(),
                pinned,
                rank,
            }
        }
    }

    impl Entity for Note {
        type Id = i64;
        const NAME: &'static str = "notes";
        const ID_FIELD: &'static str = "id";

        fn id(&self) -> i64 {
            self.id
        }

        fn fields() -> &'static [FieldDef] {
            const FIELDS: &[FieldDef] = &[
                FieldDef::of::<i64>("id"),
                FieldDef::of::<String>("body"),
                FieldDef::of::<bool>("pinned"),
                FieldDef::of::<Option<i64>>("rank"),
            ];
            FIELDS
        }

        fn value_of(&self, field: &str) -> Option<Value> {
            match field {
                "id" => Some(self.id.into_value()),
                "body" => Some(self.body.clone().into_value()),
                "pinned" => Some(self.pinned.into_value()),
                "rank" => Some(self.rank.into_value()),
                _ => None,
            }
        }

        fn from_record(mut record: Record) -> Result<Self> {
            Ok(Self {
                id: record.take("id")?,
                body: record.take("body")?,
                pinned: record.take("pinned")?,
                rank: record.take("rank")?,
            })
        }
    }

    #[test]
    fn record_round_trip_preserves_entity() {
        let note = Note::new(1, "hello", true, None);
        let record = note.to_record();
        assert_eq!(record.get("rank"), Some(&Value::Null));
        assert_eq!(Note::from_record(record), Ok(note));
    }

    #[test]
    fn field_definitions_follow_rust_types() {
        let rank = Note::field("rank");
        assert_eq!(rank.map(|d| (d.kind, d.nullable)), Some((ValueKind::Int, true)));
        assert!(Note::require_field("missing").is_err());
    }

    #[test]
    fn field_check_rejects_wrong_kinds_and_nulls() {
        let body = FieldDef::of::<String>("body");
        assert!(body.check(&Value::Text("x".into())).is_ok());
        assert!(body.check(&Value::Null).is_err());
        assert!(body.check(&Value::Int(1)).is_err());
        assert!(FieldDef::of::<Option<i64>>("rank").check(&Value::Null).is_ok());
    }

    #[test]
    fn typed_field_reads_entity() {
        let note = Note::new(3, "x", false, Some(9));
        assert_eq!(Note::RANK.get(&note), Some(Value::Int(9)));
        assert_eq!(Note::PINNED.name(), "pinned");
    }
}
