//! Translation of specifications, sort keys and entities into SQL.
//!
//! Every literal is sent as a bind parameter. Text comparisons and ordering
//! use `COLLATE "C"` so that the database orders strings bytewise, exactly
//! like in-memory evaluation. Three-valued logic needs no special handling:
//! SQL already treats comparisons with NULL as unknown.

use composable_data_core::entity::{Entity, FieldDef};
use composable_data_core::error::{DataError, Result};
use composable_data_core::paging::{SortDirection, SortKey};
use composable_data_core::specification::{Predicate, Specification};
use composable_data_core::value::{Record, Value, ValueKind};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

/// Query builder with owned bind parameters.
pub type Sql = QueryBuilder<'static, Postgres>;

/// Double-quote an identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

const fn column_type(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Bool => "BOOLEAN",
        ValueKind::Int => "BIGINT",
        ValueKind::Text => "TEXT",
        ValueKind::Timestamp => "TIMESTAMPTZ",
        ValueKind::Uuid => "UUID",
    }
}

fn kind_of<E: Entity>(field: &str) -> Result<ValueKind> {
    E::require_field(field).map(|def| def.kind)
}

/// Push a column reference, with bytewise collation for text.
fn push_column(builder: &mut Sql, field: &str, kind: ValueKind) {
    builder.push(quote_ident(field));
    if kind == ValueKind::Text {
        builder.push(" COLLATE \"C\"");
    }
}

/// Push the identifier column as an ascending sort key.
fn push_id_order<E: Entity>(builder: &mut Sql) -> Result<()> {
    push_column(builder, E::ID_FIELD, kind_of::<E>(E::ID_FIELD)?);
    builder.push(" ASC");
    Ok(())
}

/// Bind `value`; nulls are typed by the column kind.
pub fn push_value(builder: &mut Sql, value: &Value, kind: ValueKind) {
    match value {
        Value::Bool(v) => builder.push_bind(*v),
        Value::Int(v) => builder.push_bind(*v),
        Value::Text(v) => builder.push_bind(v.clone()),
        Value::Timestamp(v) => builder.push_bind(*v),
        Value::Uuid(v) => builder.push_bind(*v),
        Value::Null => match kind {
            ValueKind::Bool => builder.push_bind(None::<bool>),
            ValueKind::Int => builder.push_bind(None::<i64>),
            ValueKind::Text => builder.push_bind(None::<String>),
            ValueKind::Timestamp => builder.push_bind(None::<DateTime<Utc>>),
            ValueKind::Uuid => builder.push_bind(None::<Uuid>),
        },
    };
}

/// Append the SQL form of `predicate`.
///
/// # Errors
///
/// Returns [`DataError::Validation`] if the predicate names a field `E` lacks.
pub fn push_predicate<E: Entity>(builder: &mut Sql, predicate: &Predicate) -> Result<()> {
    match predicate {
        Predicate::All => {
            builder.push("TRUE");
        },
        Predicate::None => {
            builder.push("FALSE");
        },
        Predicate::Compare { field, op, value } => {
            let kind = kind_of::<E>(field)?;
            push_column(builder, field, kind);
            builder.push(format!(" {} ", op.as_sql()));
            push_value(builder, value, kind);
        },
        Predicate::In { field, values } => {
            let kind = kind_of::<E>(field)?;
            if values.is_empty() {
                builder.push("FALSE");
                return Ok(());
            }
            push_column(builder, field, kind);
            builder.push(" IN (");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(builder, value, kind);
            }
            builder.push(")");
        },
        Predicate::Contains { field, needle } => {
            kind_of::<E>(field)?;
            builder.push(format!("strpos({}, ", quote_ident(field)));
            builder.push_bind(needle.clone());
            builder.push(") > 0");
        },
        Predicate::IsNull { field } => {
            kind_of::<E>(field)?;
            builder.push(format!("{} IS NULL", quote_ident(field)));
        },
        Predicate::And(a, b) => push_binary::<E>(builder, a, " AND ", b)?,
        Predicate::Or(a, b) => push_binary::<E>(builder, a, " OR ", b)?,
        Predicate::Not(inner) => {
            builder.push("(NOT ");
            push_predicate::<E>(builder, inner)?;
            builder.push(")");
        },
    }
    Ok(())
}

fn push_binary<E: Entity>(builder: &mut Sql, a: &Predicate, op: &str, b: &Predicate) -> Result<()> {
    builder.push("(");
    push_predicate::<E>(builder, a)?;
    builder.push(op);
    push_predicate::<E>(builder, b)?;
    builder.push(")");
    Ok(())
}

fn column_list<E: Entity>() -> String {
    E::fields()
        .iter()
        .map(|def| quote_ident(def.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_where<E: Entity>(spec: &Specification<E>) -> Result<Sql> {
    let mut builder = Sql::new(format!(
        "SELECT {} FROM {} WHERE ",
        column_list::<E>(),
        quote_ident(E::NAME)
    ));
    push_predicate::<E>(&mut builder, spec.as_predicate())?;
    Ok(builder)
}

/// `SELECT` every row matching `spec`, ordered by identifier.
///
/// # Errors
///
/// See [`push_predicate`].
pub fn select<E: Entity>(spec: &Specification<E>) -> Result<Sql> {
    let mut builder = select_where(spec)?;
    builder.push(" ORDER BY ");
    push_id_order::<E>(&mut builder)?;
    Ok(builder)
}

/// `SELECT` one ordered, bounded slice of the rows matching `spec`.
///
/// # Errors
///
/// See [`push_predicate`].
pub fn select_slice<E: Entity>(spec: &Specification<E>, sort: &SortKey<E>, offset: u64, limit: u64) -> Result<Sql> {
    let mut builder = select_where(spec)?;
    builder.push(" ORDER BY ");
    push_column(&mut builder, sort.field(), kind_of::<E>(sort.field())?);
    builder.push(match sort.direction() {
        SortDirection::Ascending => " ASC",
        SortDirection::Descending => " DESC",
    });
    if sort.needs_tie_break() {
        builder.push(", ");
        push_id_order::<E>(&mut builder)?;
    }
    builder.push(" LIMIT ");
    builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    builder.push(" OFFSET ");
    builder.push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
    Ok(builder)
}

/// `SELECT COUNT(*)` of the rows matching `spec`.
///
/// # Errors
///
/// See [`push_predicate`].
pub fn count<E: Entity>(spec: &Specification<E>) -> Result<Sql> {
    let mut builder = Sql::new(format!("SELECT COUNT(*) FROM {} WHERE ", quote_ident(E::NAME)));
    push_predicate::<E>(&mut builder, spec.as_predicate())?;
    Ok(builder)
}

/// `INSERT` one entity.
///
/// # Errors
///
/// Returns [`DataError::Validation`] if a field value does not fit its column.
pub fn insert<E: Entity>(entity: &E) -> Result<Sql> {
    let mut builder = Sql::new(format!(
        "INSERT INTO {} ({}) VALUES (",
        quote_ident(E::NAME),
        column_list::<E>()
    ));
    for (i, def) in E::fields().iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        push_field(&mut builder, entity, def)?;
    }
    builder.push(")");
    Ok(builder)
}

/// `UPDATE` every non-identifier column of one entity.
///
/// # Errors
///
/// Returns [`DataError::Validation`] if a field value does not fit its column.
pub fn update<E: Entity>(entity: &E) -> Result<Sql> {
    let mut builder = Sql::new(format!("UPDATE {} SET ", quote_ident(E::NAME)));
    let columns = E::fields().iter().filter(|def| def.name != E::ID_FIELD);
    for (i, def) in columns.enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(format!("{} = ", quote_ident(def.name)));
        push_field(&mut builder, entity, def)?;
    }
    push_id_filter(&mut builder, entity)?;
    Ok(builder)
}

/// `DELETE` one entity by identifier.
///
/// # Errors
///
/// Returns [`DataError::Validation`] if the identifier does not fit its column.
pub fn delete<E: Entity>(entity: &E) -> Result<Sql> {
    let mut builder = Sql::new(format!("DELETE FROM {}", quote_ident(E::NAME)));
    push_id_filter(&mut builder, entity)?;
    Ok(builder)
}

fn push_id_filter<E: Entity>(builder: &mut Sql, entity: &E) -> Result<()> {
    builder.push(format!(" WHERE {} = ", quote_ident(E::ID_FIELD)));
    push_value(builder, &entity.id_value(), kind_of::<E>(E::ID_FIELD)?);
    Ok(())
}

fn push_field<E: Entity>(builder: &mut Sql, entity: &E, def: &FieldDef) -> Result<()> {
    let value = entity.value_of(def.name).unwrap_or(Value::Null);
    def.check(&value)?;
    push_value(builder, &value, def.kind);
    Ok(())
}

/// `CREATE TABLE IF NOT EXISTS` statement for `E`.
#[must_use]
pub fn create_table<E: Entity>() -> String {
    let columns: Vec<String> = E::fields()
        .iter()
        .map(|def| {
            let mut column = format!("{} {}", quote_ident(def.name), column_type(def.kind));
            if !def.nullable {
                column.push_str(" NOT NULL");
            }
            if def.name == E::ID_FIELD {
                column.push_str(" PRIMARY KEY");
            }
            column
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(E::NAME),
        columns.join(", ")
    )
}

/// Decode one row selected with the column list of `E`.
///
/// # Errors
///
/// Returns [`DataError::Unknown`] if a column is missing or has an unexpected type.
pub fn decode<E: Entity>(row: &PgRow) -> Result<E> {
    let mut record = Record::new();
    for def in E::fields() {
        record.insert(def.name, decode_column(row, def)?);
    }
    E::from_record(record)
}

fn decode_column(row: &PgRow, def: &FieldDef) -> Result<Value> {
    let undecodable = |error: sqlx::Error| DataError::Unknown(format!("cannot decode column '{}': {error}", def.name));
    let value = match def.kind {
        ValueKind::Bool => row.try_get::<Option<bool>, _>(def.name).map_err(undecodable)?.map(Value::Bool),
        ValueKind::Int => row.try_get::<Option<i64>, _>(def.name).map_err(undecodable)?.map(Value::Int),
        ValueKind::Text => row.try_get::<Option<String>, _>(def.name).map_err(undecodable)?.map(Value::Text),
        ValueKind::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(def.name)
            .map_err(undecodable)?
            .map(Value::Timestamp),
        ValueKind::Uuid => row.try_get::<Option<Uuid>, _>(def.name).map_err(undecodable)?.map(Value::Uuid),
    };
    Ok(value.unwrap_or(Value::Null))
}
