//! Parameter binding for each sqlx backend.
//!
//! MySQL and SQLite convert loosely between parameter and column types, so
//! values without a matching engine type (UUIDs on both, timestamps on
//! SQLite) are bound as text.
//!
//! PostgreSQL is strict. A prepared statement fixes the type of every
//! parameter, and a binary value of a different type is rejected. Each value
//! is therefore converted to the type the server inferred at prepare time
//! before it is bound.

use crate::db::types::{DATE_FORMAT, DATETIME_FORMAT, parse_date, parse_datetime};
use crate::models::QueryParam;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};
use std::borrow::Cow;
use uuid::Uuid;

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        // sqlx encodes Uuid as BINARY(16); CHAR(36) columns are the norm
        QueryParam::Uuid(v) => query.bind(v.hyphenated().to_string()),
        QueryParam::DateTime(v) => query.bind(*v),
        QueryParam::Date(v) => query.bind(*v),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Uuid(v) => query.bind(v.hyphenated().to_string()),
        // Same text layout the row decoder produces, so comparisons match
        QueryParam::DateTime(v) => query.bind(v.format(DATETIME_FORMAT).to_string()),
        QueryParam::Date(v) => query.bind(v.format(DATE_FORMAT).to_string()),
    }
}

/// Bind a parameter to a PostgreSQL query.
///
/// `expected` is the server's type name for this parameter position
/// (`INT4`, `UUID`, `TIMESTAMPTZ`, ...), when the statement was prepared.
pub(crate) fn bind_postgres_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
    expected: Option<&str>,
) -> Query<'q, Postgres, PgArguments> {
    match pg_value(param, expected) {
        PgValue::Null => query.bind(None::<String>),
        PgValue::Bool(v) => query.bind(v),
        PgValue::Int2(v) => query.bind(v),
        PgValue::Int4(v) => query.bind(v),
        PgValue::Int8(v) => query.bind(v),
        PgValue::Float4(v) => query.bind(v),
        PgValue::Float8(v) => query.bind(v),
        PgValue::Text(Cow::Borrowed(v)) => query.bind(v),
        PgValue::Text(Cow::Owned(v)) => query.bind(v),
        PgValue::Bytes(v) => query.bind(v),
        PgValue::Uuid(v) => query.bind(v),
        PgValue::Timestamp(v) => query.bind(v),
        PgValue::Timestamptz(v) => query.bind(v),
        PgValue::Date(v) => query.bind(v),
        PgValue::Json(v) => query.bind(v),
    }
}

/// A parameter value in the Rust type PostgreSQL will accept for it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PgValue<'a> {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(Cow<'a, str>),
    Bytes(&'a [u8]),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    Timestamptz(DateTime<Utc>),
    Date(NaiveDate),
    Json(JsonValue),
}

/// Convert `param` to the parameter type the server expects.
///
/// Values that cannot be converted (out of range integers, text that does
/// not parse) keep their own type and the server reports the mismatch.
/// NUMERIC and other types without a conversion here also bind as-is.
pub(crate) fn pg_value<'a>(param: &'a QueryParam, expected: Option<&str>) -> PgValue<'a> {
    let expected = expected.unwrap_or_default();
    match param {
        // A NULL carries no bytes, so its declared type never conflicts
        QueryParam::Null => PgValue::Null,
        QueryParam::Bool(v) => match expected {
            "INT2" => PgValue::Int2(i16::from(*v)),
            "INT4" => PgValue::Int4(i32::from(*v)),
            "INT8" => PgValue::Int8(i64::from(*v)),
            "TEXT" | "VARCHAR" | "BPCHAR" => PgValue::Text(Cow::Owned(v.to_string())),
            _ => PgValue::Bool(*v),
        },
        QueryParam::Int(v) => int_value(*v, expected),
        QueryParam::Float(v) => match expected {
            "FLOAT4" => PgValue::Float4(*v as f32),
            "TEXT" | "VARCHAR" | "BPCHAR" => PgValue::Text(Cow::Owned(v.to_string())),
            _ => PgValue::Float8(*v),
        },
        QueryParam::String(v) => text_value(v, expected),
        QueryParam::Bytes(v) => PgValue::Bytes(v.as_slice()),
        QueryParam::Uuid(v) => match expected {
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                PgValue::Text(Cow::Owned(v.hyphenated().to_string()))
            }
            _ => PgValue::Uuid(*v),
        },
        QueryParam::DateTime(v) => match expected {
            "TIMESTAMPTZ" => PgValue::Timestamptz(v.and_utc()),
            "DATE" => PgValue::Date(v.date()),
            "TEXT" | "VARCHAR" | "BPCHAR" => {
                PgValue::Text(Cow::Owned(v.format(DATETIME_FORMAT).to_string()))
            }
            _ => PgValue::Timestamp(*v),
        },
        QueryParam::Date(v) => {
            let midnight = NaiveDateTime::from(*v);
            match expected {
                "TIMESTAMP" => PgValue::Timestamp(midnight),
                "TIMESTAMPTZ" => PgValue::Timestamptz(midnight.and_utc()),
                "TEXT" | "VARCHAR" | "BPCHAR" => {
                    PgValue::Text(Cow::Owned(v.format(DATE_FORMAT).to_string()))
                }
                _ => PgValue::Date(*v),
            }
        }
    }
}

fn int_value(v: i64, expected: &str) -> PgValue<'static> {
    match expected {
        "INT2" => i16::try_from(v).map_or(PgValue::Int8(v), PgValue::Int2),
        "INT4" => i32::try_from(v).map_or(PgValue::Int8(v), PgValue::Int4),
        "FLOAT4" => PgValue::Float4(v as f32),
        "FLOAT8" => PgValue::Float8(v as f64),
        "BOOL" => PgValue::Bool(v != 0),
        "TEXT" | "VARCHAR" | "BPCHAR" => PgValue::Text(Cow::Owned(v.to_string())),
        _ => PgValue::Int8(v),
    }
}

fn text_value<'a>(v: &'a str, expected: &str) -> PgValue<'a> {
    let converted = match expected {
        "UUID" => Uuid::parse_str(v.trim()).ok().map(PgValue::Uuid),
        "TIMESTAMP" => parse_datetime(v).map(PgValue::Timestamp),
        "TIMESTAMPTZ" => parse_datetime(v).map(|dt| PgValue::Timestamptz(dt.and_utc())),
        "DATE" => parse_date(v).map(PgValue::Date),
        "JSON" | "JSONB" => serde_json::from_str(v).ok().map(PgValue::Json),
        "INT2" | "INT4" | "INT8" => v.trim().parse::<i64>().ok().map(|i| int_value(i, expected)),
        "FLOAT4" => v.trim().parse::<f32>().ok().map(PgValue::Float4),
        "FLOAT8" => v.trim().parse::<f64>().ok().map(PgValue::Float8),
        "BOOL" => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "on" => Some(PgValue::Bool(true)),
            "0" | "false" | "f" | "no" | "off" => Some(PgValue::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    converted.unwrap_or(PgValue::Text(Cow::Borrowed(v)))
}
