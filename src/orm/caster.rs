//! Casting between column values and record field values.
//!
//! Drivers hand back loosely typed JSON (SQLite integers for booleans,
//! MySQL text for decimals, base64 for blobs). Before a row is deserialized
//! into a record each declared field is cast to the shape serde expects for
//! its [`FieldType`]. The reverse direction turns record values into bind
//! parameters.

use crate::db::types::{DATE_FORMAT, Row, parse_date, parse_datetime};
use crate::models::QueryParam;
use crate::orm::record::RecordSchema;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Format chrono's serde implementation reads for `NaiveDateTime`.
const RECORD_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Semantic type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Float,
    Bool,
    String,
    /// Structured value stored as JSON text.
    Json,
    DateTime,
    Date,
    Uuid,
    Bytes,
}

/// Cast a column value to the JSON shape of `field_type`.
///
/// Values that cannot be cast are passed through unchanged; NULL stays NULL.
pub fn cast_value(value: JsonValue, field_type: FieldType) -> JsonValue {
    if value.is_null() {
        return value;
    }
    match field_type {
        FieldType::Int => cast_int(value),
        FieldType::Float => cast_float(value),
        FieldType::Bool => cast_bool(value),
        FieldType::String | FieldType::Uuid => cast_string(value),
        FieldType::Json => match value {
            JsonValue::String(text) => {
                serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
            }
            other => other,
        },
        FieldType::DateTime => match value {
            JsonValue::String(text) => match parse_datetime(&text) {
                Some(dt) => JsonValue::String(dt.format(RECORD_DATETIME_FORMAT).to_string()),
                None => JsonValue::String(text),
            },
            other => other,
        },
        FieldType::Date => match value {
            JsonValue::String(text) => match parse_date(&text) {
                Some(date) => JsonValue::String(date.format(DATE_FORMAT).to_string()),
                None => JsonValue::String(text),
            },
            other => other,
        },
        FieldType::Bytes => match value {
            JsonValue::String(text) => {
                let bytes = STANDARD
                    .decode(text.as_bytes())
                    .unwrap_or_else(|_| text.into_bytes());
                JsonValue::from(bytes)
            }
            other => other,
        },
    }
}

/// Cast every declared field of a decoded row in place.
///
/// Columns the record does not declare are left untouched.
pub fn cast_row(mut row: Row, schema: &RecordSchema) -> Row {
    for descriptor in schema.fields() {
        if let Some(value) = row.remove(descriptor.name) {
            row.insert(
                descriptor.name.to_string(),
                cast_value(value, descriptor.field_type),
            );
        }
    }
    row
}

/// Convert a serialized record value to a bind parameter.
///
/// Temporal and UUID fields become typed parameters when their text parses,
/// so engines with native column types receive them in that form.
pub fn to_param(value: &JsonValue, field_type: FieldType) -> QueryParam {
    match (field_type, value) {
        (_, JsonValue::Null) => QueryParam::Null,
        (FieldType::Bytes, JsonValue::Array(items)) => QueryParam::Bytes(
            items
                .iter()
                .filter_map(JsonValue::as_u64)
                .map(|b| b as u8)
                .collect(),
        ),
        (FieldType::Bytes, JsonValue::String(text)) => QueryParam::Bytes(text.as_bytes().to_vec()),
        (FieldType::Json, JsonValue::String(text)) => QueryParam::String(text.clone()),
        (FieldType::Json, other) => QueryParam::String(other.to_string()),
        (FieldType::Bool, JsonValue::Number(n)) => {
            QueryParam::Bool(n.as_f64().is_some_and(|v| v != 0.0))
        }
        (FieldType::DateTime, JsonValue::String(text)) => parse_datetime(text)
            .map(QueryParam::DateTime)
            .unwrap_or_else(|| QueryParam::String(text.clone())),
        (FieldType::Date, JsonValue::String(text)) => parse_date(text)
            .map(QueryParam::Date)
            .unwrap_or_else(|| QueryParam::String(text.clone())),
        (FieldType::Uuid, JsonValue::String(text)) => Uuid::parse_str(text.trim())
            .map(QueryParam::Uuid)
            .unwrap_or_else(|_| QueryParam::String(text.clone())),
        (_, other) => QueryParam::from_json(other),
    }
}

fn cast_int(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => JsonValue::Number(n),
        JsonValue::Number(n) => n
            .as_f64()
            .map(|f| JsonValue::from(f.trunc() as i64))
            .unwrap_or(JsonValue::Number(n)),
        JsonValue::Bool(b) => JsonValue::from(i64::from(b)),
        JsonValue::String(text) => {
            let trimmed = text.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                JsonValue::from(i)
            } else if let Ok(f) = trimmed.parse::<f64>() {
                JsonValue::from(f.trunc() as i64)
            } else {
                JsonValue::String(text)
            }
        }
        other => other,
    }
}

fn cast_float(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Bool(b) => JsonValue::from(if b { 1.0 } else { 0.0 }),
        JsonValue::String(text) => match text.trim().parse::<f64>() {
            Ok(f) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::String(text)),
            Err(_) => JsonValue::String(text),
        },
        other => other,
    }
}

fn cast_bool(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Number(n) => JsonValue::Bool(n.as_f64().is_some_and(|v| v != 0.0)),
        JsonValue::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" | "on" => JsonValue::Bool(true),
            "0" | "false" | "f" | "no" | "n" | "off" | "" => JsonValue::Bool(false),
            _ => JsonValue::String(text),
        },
        other => other,
    }
}

fn cast_string(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::String(text) => JsonValue::String(text),
        JsonValue::Number(n) => JsonValue::String(n.to_string()),
        JsonValue::Bool(b) => JsonValue::String(b.to_string()),
        other => JsonValue::String(other.to_string()),
    }
}
