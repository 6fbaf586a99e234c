//! Conversion between dynamic SQLite rows and JSON objects.
//!
//! The engine works on tables whose shape is only known at runtime, so rows are
//! decoded by storage class rather than through `FromRow`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};

pub type Record = Map<String, Value>;

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Decode every column of `row` into a JSON object keyed by column name.
pub fn row_to_record(row: &SqliteRow) -> Result<Record, sqlx::Error> {
    let mut record = Map::with_capacity(row.columns().len());

    for column in row.columns() {
        let ordinal = column.ordinal();
        let raw = row.try_get_raw(ordinal)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_ascii_uppercase();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(ordinal)?),
                "REAL" => Number::from_f64(row.try_get_unchecked::<f64, _>(ordinal)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => Value::String(STANDARD.encode(row.try_get_unchecked::<Vec<u8>, _>(ordinal)?)),
                _ => Value::String(row.try_get_unchecked::<String, _>(ordinal)?),
            }
        };

        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}

pub fn rows_to_records(rows: &[SqliteRow]) -> Result<Vec<Record>, sqlx::Error> {
    rows.iter().map(row_to_record).collect()
}

/// Bind a JSON value as a query parameter.
///
/// Arrays and objects are stored as their JSON text.
pub fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                query.bind(int)
            } else if let Some(float) = number.as_f64() {
                query.bind(float)
            } else {
                query.bind(number.to_string())
            }
        }
        Value::String(text) => query.bind(text.clone()),
        other => query.bind(other.to_string()),
    }
}

pub fn bind_values<'q>(mut query: SqliteQuery<'q>, values: &[Value]) -> SqliteQuery<'q> {
    for value in values {
        query = bind_value(query, value);
    }
    query
}

/// Loose textual form of a value, used when comparing old and new field contents.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(if *flag { "1" } else { "0" }.to_string()),
        Value::Number(number) => {
            if let Some(float) = number.as_f64() {
                if float.fract() == 0.0 && float.abs() < 1e15 {
                    return Some(format!("{}", float as i64));
                }
            }
            Some(number.to_string())
        }
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Interpret a value as an integer id, accepting numeric strings.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
