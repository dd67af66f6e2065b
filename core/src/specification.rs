//! Specifications - composable, dual-target predicates over entities.
//!
//! A [`Specification<E>`] wraps a small [`Predicate`] tree. The same tree is
//!
//! - evaluated directly against an in-memory entity ([`Specification::is_satisfied_by`]), and
//! - handed to storage adapters ([`Specification::as_predicate`]) which translate it
//!   into their native filter so rows are filtered at the source.
//!
//! # Null semantics
//!
//! The direct evaluator follows SQL three-valued logic: comparing against a
//! null is *unknown*, `NOT unknown` is *unknown*, and an entity satisfies a
//! specification only when the predicate is *true*. This keeps both
//! evaluation paths selecting exactly the same entities, negations included.
//!
//! # Example
//!
//! ```ignore
//! let open_for_user = Specification::eq(Todo::USER_ID, 7)
//!     .and(!Specification::eq(Todo::COMPLETED, true));
//!
//! assert!(open_for_user.is_satisfied_by(&todo));
//! ```

use crate::entity::{Entity, Field};
use crate::error::{DataError, Result};
use crate::value::{FieldType, IntoValue, Value, ValueKind};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

/// Comparison operator of a [`Predicate::Compare`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// SQL spelling of the operator.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Whether `ordering` (left compared to right) satisfies the operator.
    #[must_use]
    pub const fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::Ne => !matches!(ordering, Ordering::Equal),
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::Le => !matches!(ordering, Ordering::Greater),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Ge => !matches!(ordering, Ordering::Less),
        }
    }

    /// Parse a query-string operator name (`eq`, `ne`, `lt`, `le`, `gt`, `ge`).
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "lt" => Ok(Self::Lt),
            "le" | "lte" => Ok(Self::Le),
            "gt" => Ok(Self::Gt),
            "ge" | "gte" => Ok(Self::Ge),
            _ => Err(DataError::validation(format!("unknown comparison operator '{name}'"))),
        }
    }
}

/// Untyped predicate tree shared by every evaluation backend.
///
/// Field names inside a tree always refer to fields of the entity the
/// owning [`Specification`] was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Matches everything
    All,
    /// Matches nothing
    None,
    /// `field op value`
    Compare {
        /// Field name
        field: &'static str,
        /// Operator
        op: CompareOp,
        /// Right-hand literal
        value: Value,
    },
    /// `field IN (values...)`; an empty list matches nothing
    In {
        /// Field name
        field: &'static str,
        /// Candidate literals
        values: Vec<Value>,
    },
    /// Case-sensitive substring match on a text field
    Contains {
        /// Field name
        field: &'static str,
        /// Substring to look for
        needle: String,
    },
    /// `field IS NULL`
    IsNull {
        /// Field name
        field: &'static str,
    },
    /// Conjunction
    And(Box<Predicate>, Box<Predicate>),
    /// Disjunction
    Or(Box<Predicate>, Box<Predicate>),
    /// Negation
    Not(Box<Predicate>),
}

impl Predicate {
    /// Conjunction with `all`/`none` folded away.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, p) | (p, Self::All) => p,
            (Self::None, _) | (_, Self::None) => Self::None,
            (a, b) => Self::And(Box::new(a), Box::new(b)),
        }
    }

    /// Disjunction with `all`/`none` folded away.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::None, p) | (p, Self::None) => p,
            (Self::All, _) | (_, Self::All) => Self::All,
            (a, b) => Self::Or(Box::new(a), Box::new(b)),
        }
    }

    /// Negation with double negation and constants folded away.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::All => Self::None,
            Self::None => Self::All,
            Self::Not(inner) => *inner,
            p => Self::Not(Box::new(p)),
        }
    }

    /// Evaluate under SQL three-valued logic.
    ///
    /// `lookup` returns the value of a field; a missing field counts as null.
    /// The result is `None` when the predicate is *unknown*.
    pub fn evaluate<F>(&self, lookup: &F) -> Option<bool>
    where
        F: Fn(&str) -> Option<Value>,
    {
        match self {
            Self::All => Some(true),
            Self::None => Some(false),
            Self::Compare { field, op, value } => {
                let actual = lookup(field)?;
                actual.sql_cmp(value).map(|ordering| op.holds(ordering))
            },
            Self::In { field, values } => {
                if values.is_empty() {
                    return Some(false);
                }
                let actual = lookup(field).unwrap_or(Value::Null);
                let mut unknown = actual.is_null();
                for candidate in values {
                    match actual.sql_cmp(candidate) {
                        Some(Ordering::Equal) => return Some(true),
                        Some(_) => {},
                        None => unknown = true,
                    }
                }
                if unknown { None } else { Some(false) }
            },
            Self::Contains { field, needle } => match lookup(field)? {
                Value::Text(text) => Some(text.contains(needle.as_str())),
                _ => None,
            },
            Self::IsNull { field } => Some(lookup(field).is_none_or(|value| value.is_null())),
            Self::And(a, b) => match (a.evaluate(lookup), b.evaluate(lookup)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Self::Or(a, b) => match (a.evaluate(lookup), b.evaluate(lookup)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Self::Not(inner) => inner.evaluate(lookup).map(|truth| !truth),
        }
    }

    /// Every field name referenced by this tree.
    #[must_use]
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut Vec<&'static str>) {
        match self {
            Self::All | Self::None => {},
            Self::Compare { field, .. }
            | Self::In { field, .. }
            | Self::Contains { field, .. }
            | Self::IsNull { field } => {
                if !out.contains(field) {
                    out.push(field);
                }
            },
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            },
            Self::Not(inner) => inner.collect_fields(out),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("TRUE"),
            Self::None => f.write_str("FALSE"),
            Self::Compare { field, op, value } => write!(f, "{field} {} {value}", op.as_sql()),
            Self::In { field, values } => {
                write!(f, "{field} IN (")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            },
            Self::Contains { field, needle } => write!(f, "{field} CONTAINS {}", Value::Text(needle.clone())),
            Self::IsNull { field } => write!(f, "{field} IS NULL"),
            Self::And(a, b) => write!(f, "({a} AND {b})"),
            Self::Or(a, b) => write!(f, "({a} OR {b})"),
            Self::Not(inner) => write!(f, "NOT {inner}"),
        }
    }
}

/// Field types that support substring matching.
pub trait TextField: FieldType {}

impl TextField for String {}
impl TextField for Option<String> {}

/// An immutable, composable predicate over entities of type `E`.
///
/// Built from typed [`Field`] constants, so malformed predicates do not
/// compile. String-named builders (`try_*`) validate against the entity
/// schema and fail at construction instead.
pub struct Specification<E> {
    predicate: Predicate,
    _entity: PhantomData<fn(&E) -> bool>,
}

impl<E> Clone for Specification<E> {
    fn clone(&self) -> Self {
        Self::from_predicate(self.predicate.clone())
    }
}

impl<E> PartialEq for Specification<E> {
    fn eq(&self, other: &Self) -> bool {
        self.predicate == other.predicate
    }
}

impl<E> fmt::Debug for Specification<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Specification").field(&self.predicate).finish()
    }
}

impl<E> fmt::Display for Specification<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.predicate.fmt(f)
    }
}

impl<E> Specification<E> {
    const fn from_predicate(predicate: Predicate) -> Self {
        Self {
            predicate,
            _entity: PhantomData,
        }
    }

    /// The translatable predicate tree.
    #[must_use]
    pub const fn as_predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Consume the specification, keeping its predicate tree.
    #[must_use]
    pub fn into_predicate(self) -> Predicate {
        self.predicate
    }

    /// Matches every entity. Identity element of [`and`](Self::and).
    #[must_use]
    pub const fn all() -> Self {
        Self::from_predicate(Predicate::All)
    }

    /// Matches no entity. Identity element of [`or`](Self::or).
    #[must_use]
    pub const fn none() -> Self {
        Self::from_predicate(Predicate::None)
    }

    /// Both specifications must hold.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::from_predicate(self.predicate.and(other.predicate))
    }

    /// At least one specification must hold.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::from_predicate(self.predicate.or(other.predicate))
    }

    /// Fold optional filters together with `and`; absent ones are skipped.
    ///
    /// ```ignore
    /// let spec = Specification::all_of([
    ///     params.user_id.map(Todo::by_user),
    ///     params.completed.then(Todo::is_completed),
    /// ]);
    /// ```
    #[must_use]
    pub fn all_of<I>(specs: I) -> Self
    where
        I: IntoIterator<Item = Option<Self>>,
    {
        specs.into_iter().flatten().fold(Self::all(), Self::and)
    }

    /// Fold optional filters together with `or`; absent ones are skipped.
    #[must_use]
    pub fn any_of<I>(specs: I) -> Self
    where
        I: IntoIterator<Item = Option<Self>>,
    {
        specs.into_iter().flatten().fold(Self::none(), Self::or)
    }
}

impl<E: Entity> Specification<E> {
    fn compare<V: FieldType>(field: Field<E, V>, op: CompareOp, value: V::Literal) -> Self {
        Self::from_predicate(Predicate::Compare {
            field: field.name(),
            op,
            value: value.into_value(),
        })
    }

    /// `field = value`
    ///
    /// Nullable fields compare against the inner type; a null literal does
    /// not type-check. Use [`is_null`](Self::is_null) instead.
    #[must_use]
    pub fn eq<V: FieldType>(field: Field<E, V>, value: V::Literal) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    /// `field <> value`
    #[must_use]
    pub fn ne<V: FieldType>(field: Field<E, V>, value: V::Literal) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    /// `field < value`
    #[must_use]
    pub fn lt<V: FieldType>(field: Field<E, V>, value: V::Literal) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    /// `field <= value`
    #[must_use]
    pub fn le<V: FieldType>(field: Field<E, V>, value: V::Literal) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    /// `field > value`
    #[must_use]
    pub fn gt<V: FieldType>(field: Field<E, V>, value: V::Literal) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    /// `field >= value`
    #[must_use]
    pub fn ge<V: FieldType>(field: Field<E, V>, value: V::Literal) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    /// `field IN (values...)`
    #[must_use]
    pub fn is_in<V, I>(field: Field<E, V>, values: I) -> Self
    where
        V: FieldType,
        I: IntoIterator<Item = V>,
    {
        Self::from_predicate(Predicate::In {
            field: field.name(),
            values: values.into_iter().map(IntoValue::into_value).collect(),
        })
    }

    /// Case-sensitive substring match.
    #[must_use]
    pub fn contains<V: TextField>(field: Field<E, V>, needle: impl Into<String>) -> Self {
        Self::from_predicate(Predicate::Contains {
            field: field.name(),
            needle: needle.into(),
        })
    }

    /// `field IS NULL`
    #[must_use]
    pub fn is_null<V>(field: Field<E, Option<V>>) -> Self
    where
        Option<V>: FieldType,
    {
        Self::from_predicate(Predicate::IsNull { field: field.name() })
    }

    /// `field IS NOT NULL`
    #[must_use]
    pub fn is_not_null<V>(field: Field<E, Option<V>>) -> Self
    where
        Option<V>: FieldType,
    {
        Self::from_predicate(Predicate::IsNull { field: field.name() }.negate())
    }

    /// The entity whose identifier is `id`.
    #[must_use]
    pub fn with_id(id: E::Id) -> Self {
        Self::from_predicate(Predicate::Compare {
            field: E::ID_FIELD,
            op: CompareOp::Eq,
            value: id.into_value(),
        })
    }

    /// `field op value` for a field named at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] if the field does not exist, the
    /// value has the wrong kind, or the value is null.
    pub fn try_compare(field: &str, op: CompareOp, value: Value) -> Result<Self> {
        let def = E::require_field(field)?;
        if value.is_null() {
            return Err(DataError::validation(format!(
                "cannot compare '{field}' with null; use an IS NULL filter"
            )));
        }
        def.check(&value)?;
        Ok(Self::from_predicate(Predicate::Compare {
            field: def.name,
            op,
            value,
        }))
    }

    /// `field IN (values...)` for a field named at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] if the field does not exist or any
    /// value has the wrong kind.
    pub fn try_is_in(field: &str, values: Vec<Value>) -> Result<Self> {
        let def = E::require_field(field)?;
        values.iter().try_for_each(|value| def.check(value))?;
        Ok(Self::from_predicate(Predicate::In {
            field: def.name,
            values,
        }))
    }

    /// Substring match for a text field named at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] if the field does not exist or is not text.
    pub fn try_contains(field: &str, needle: impl Into<String>) -> Result<Self> {
        let def = E::require_field(field)?;
        if def.kind != ValueKind::Text {
            return Err(DataError::validation(format!(
                "field '{field}' is not a text field"
            )));
        }
        Ok(Self::from_predicate(Predicate::Contains {
            field: def.name,
            needle: needle.into(),
        }))
    }

    /// `field IS NULL` for a nullable field named at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Validation`] if the field does not exist or is not nullable.
    pub fn try_is_null(field: &str) -> Result<Self> {
        let def = E::require_field(field)?;
        if !def.nullable {
            return Err(DataError::validation(format!(
                "field '{field}' is not nullable"
            )));
        }
        Ok(Self::from_predicate(Predicate::IsNull { field: def.name }))
    }

    /// Evaluate directly against one in-memory entity.
    #[must_use]
    pub fn is_satisfied_by(&self, entity: &E) -> bool {
        self.predicate.evaluate(&|field: &str| entity.value_of(field)) == Some(true)
    }
}

impl<E> std::ops::BitAnd for Specification<E> {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.and(rhs)
    }
}

impl<E> std::ops::BitOr for Specification<E> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.or(rhs)
    }
}

impl<E> std::ops::Not for Specification<E> {
    type Output = Self;

    fn not(self) -> Self {
        Self::from_predicate(self.predicate.negate())
    }
}
