//! Scalar values shared by the specification evaluator and storage adapters.
//!
//! A [`Value`] is what a field of an entity looks like to the query layer.
//! Both evaluation paths (in-memory and storage-native) compare `Value`s
//! with the same rules:
//!
//! - `Null` compared to anything is *unknown* (SQL three-valued logic).
//! - Text compares bytewise (PostgreSQL `COLLATE "C"`).
//! - Timestamps carry microsecond precision, the resolution PostgreSQL stores.
//! - For sorting, `Null` orders after every other value (PostgreSQL's default
//!   `NULLS LAST` for ascending order).

use crate::error::{DataError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A scalar field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// UTF-8 text
    Text(String),
    /// UTC timestamp, microsecond precision
    Timestamp(DateTime<Utc>),
    /// UUID
    Uuid(Uuid),
}

/// The type of a non-null [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// [`Value::Bool`]
    Bool,
    /// [`Value::Int`]
    Int,
    /// [`Value::Text`]
    Text,
    /// [`Value::Timestamp`]
    Timestamp,
    /// [`Value::Uuid`]
    Uuid,
}

impl ValueKind {
    /// Lowercase name used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
            Self::Uuid => "uuid",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    /// Build a timestamp value truncated to microseconds.
    #[must_use]
    pub fn timestamp(at: DateTime<Utc>) -> Self {
        Self::Timestamp(at.trunc_subsecs(6))
    }

    /// The kind of this value, `None` for [`Value::Null`].
    #[must_use]
    pub const fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) => Some(ValueKind::Int),
            Self::Text(_) => Some(ValueKind::Text),
            Self::Timestamp(_) => Some(ValueKind::Timestamp),
            Self::Uuid(_) => Some(ValueKind::Uuid),
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Comparison under SQL semantics.
    ///
    /// `None` means *unknown*: either side is null, or the kinds differ.
    #[must_use]
    pub fn sql_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Parse raw text (e.g. a query-string parameter) as a value of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] if `raw` is not a valid `kind`.
    pub fn parse(kind: ValueKind, raw: &str) -> Result<Self> {
        let invalid = || DataError::validation(format!("'{raw}' is not a valid {kind}"));
        match kind {
            ValueKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Self::Bool(true)),
                "false" | "0" => Ok(Self::Bool(false)),
                _ => Err(invalid()),
            },
            ValueKind::Int => raw.parse().map(Self::Int).map_err(|_| invalid()),
            ValueKind::Text => Ok(Self::Text(raw.to_string())),
            ValueKind::Timestamp => DateTime::parse_from_rfc3339(raw)
                .map(|at| Self::timestamp(at.with_timezone(&Utc)))
                .map_err(|_| invalid()),
            ValueKind::Uuid => Uuid::parse_str(raw).map(Self::Uuid).map_err(|_| invalid()),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::Text(_) => 2,
            Self::Timestamp(_) => 3,
            Self::Uuid(_) => 4,
            Self::Null => 5,
        }
    }
}

/// Total order used for sorting; `Null` sorts last.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sql_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Timestamp(at) => write!(f, "'{}'", at.to_rfc3339()),
            Self::Uuid(id) => write!(f, "'{id}'"),
        }
    }
}

/// Conversion of a Rust field type into a [`Value`].
pub trait IntoValue {
    /// Perform the conversion.
    fn into_value(self) -> Value;
}

/// Conversion of a [`Value`] back into a Rust field type.
pub trait FromValue: Sized {
    /// Perform the conversion.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Unknown`] if the value has the wrong kind.
    fn from_value(value: Value) -> Result<Self>;
}

/// A Rust type usable as an entity field.
///
/// Fixes the storage kind and nullability at compile time.
pub trait FieldType: IntoValue + FromValue {
    /// Storage kind of the field
    const KIND: ValueKind;
    /// Whether the field may hold [`Value::Null`]
    const NULLABLE: bool = false;
    /// Literal accepted by typed comparisons; never null, also for `Option<T>`
    type Literal: IntoValue;
}

fn mismatch(expected: ValueKind, found: &Value) -> DataError {
    DataError::Unknown(format!("expected {expected} value, found {found}"))
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for i16 {
    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl FromValue for i16 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(i) => Self::try_from(i)
                .map_err(|_| DataError::Unknown(format!("{i} does not fit in i16"))),
            other => Err(mismatch(ValueKind::Int, &other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(i) => Self::try_from(i)
                .map_err(|_| DataError::Unknown(format!("{i} does not fit in i32"))),
            other => Err(mismatch(ValueKind::Int, &other)),
        }
    }
}

impl FieldType for i16 {
    const KIND: ValueKind = ValueKind::Int;
    type Literal = Self;
}

impl FieldType for i32 {
    const KIND: ValueKind = ValueKind::Int;
    type Literal = Self;
}

macro_rules! scalar_field_type {
    ($ty:ty, $variant:ident, $kind:ident, |$v:ident| $into:expr) => {
        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                let $v = self;
                $into
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::$variant(inner) => Ok(inner),
                    other => Err(mismatch(ValueKind::$kind, &other)),
                }
            }
        }

        impl FieldType for $ty {
            const KIND: ValueKind = ValueKind::$kind;
            type Literal = $ty;
        }
    };
}

scalar_field_type!(bool, Bool, Bool, |v| Value::Bool(v));
scalar_field_type!(i64, Int, Int, |v| Value::Int(v));
scalar_field_type!(String, Text, Text, |v| Value::Text(v));
scalar_field_type!(DateTime<Utc>, Timestamp, Timestamp, |v| Value::timestamp(v));
scalar_field_type!(Uuid, Uuid, Uuid, |v| Value::Uuid(v));

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        self.map_or(Value::Null, IntoValue::into_value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: ValueKind = T::KIND;
    const NULLABLE: bool = true;
    type Literal = T::Literal;
}

/// Field values of one entity, keyed by field name.
///
/// The neutral row shape exchanged between storage adapters and
/// [`Entity::from_record`](crate::entity::Entity::from_record).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    values: HashMap<&'static str, Value>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value, replacing any previous one.
    pub fn insert(&mut self, field: &'static str, value: Value) {
        self.values.insert(field, value);
    }

    /// Borrow a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Remove a field value and convert it.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Unknown`] if the field is missing or has the wrong kind.
    pub fn take<T: FromValue>(&mut self, field: &str) -> Result<T> {
        let value = self
            .values
            .remove(field)
            .ok_or_else(|| DataError::Unknown(format!("record is missing field '{field}'")))?;
        T::from_value(value)
            .map_err(|e| DataError::Unknown(format!("field '{field}': {e}")))
    }

    /// Number of fields present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no field is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(&'static str, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (&'static str, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn null_sorts_after_everything() {
        let mut values = vec![Value::Null, Value::Int(3), Value::Int(-1)];
        values.sort();
        assert_eq!(values, vec![Value::Int(-1), Value::Int(3), Value::Null]);
    }

    #[test]
    fn sql_comparison_with_null_is_unknown() {
        assert_eq!(Value::Null.sql_cmp(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).sql_cmp(&Value::Null), None);
        assert_eq!(Value::Int(1).sql_cmp(&Value::Text("1".into())), None);
        assert_eq!(Value::Int(1).sql_cmp(&Value::Int(2)), Some(Ordering::Less));
    }

    #[test]
    fn text_compares_bytewise() {
        // Uppercase letters precede lowercase ones in byte order.
        assert_eq!(
            Value::Text("Zebra".into()).sql_cmp(&Value::Text("apple".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn timestamps_are_truncated_to_microseconds() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).single();
        let value = at.map(IntoValue::into_value);
        let expected = Utc.timestamp_opt(1_700_000_000, 123_456_000).single();
        assert_eq!(value, expected.map(Value::Timestamp));
    }

    #[test]
    fn option_round_trips_through_null() {
        assert_eq!(None::<i64>.into_value(), Value::Null);
        assert_eq!(Option::<i64>::from_value(Value::Null), Ok(None));
        assert_eq!(Option::<i64>::from_value(Value::Int(4)), Ok(Some(4)));
        assert!(<Option<i64> as FieldType>::NULLABLE);
        assert_eq!(<Option<i64> as FieldType>::KIND, ValueKind::Int);
    }

    #[test]
    fn narrowing_integer_conversion_fails_cleanly() {
        assert!(i32::from_value(Value::Int(i64::MAX)).is_err());
        assert_eq!(i32::from_value(Value::Int(12)), Ok(12));
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert_eq!(Value::parse(ValueKind::Int, "42"), Ok(Value::Int(42)));
        assert_eq!(Value::parse(ValueKind::Bool, "TRUE"), Ok(Value::Bool(true)));
        assert!(matches!(
            Value::parse(ValueKind::Int, "forty-two"),
            Err(DataError::Validation(_))
        ));
        assert!(Value::parse(ValueKind::Uuid, "not-a-uuid").is_err());
    }

    #[test]
    fn record_take_reports_missing_fields() {
        let mut record: Record = [("id", Value::Int(1))].into_iter().collect();
        assert_eq!(record.take::<i64>("id"), Ok(1));
        assert!(matches!(record.take::<i64>("id"), Err(DataError::Unknown(_))));
    }

    #[test]
    fn display_quotes_text() {
        assert_eq!(Value::Text("it's".into()).to_string(), "'it''s'");
        assert_eq!(Value::Null.to_string(), "NULL");
    }
}
