//! Row decoding.
//!
//! Driver rows are decoded into [`Row`] maps of JSON values so the record
//! layer can cast and deserialize them without knowing the dialect.
//!
//! # Architecture
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! SQLite is dynamically typed, so its decoder looks at the storage class of
//! each value rather than the declared column type.

use crate::models::DatabaseType;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

/// A decoded result row: column name to JSON value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Text layout used for DATETIME/TIMESTAMP values.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Text layout used for DATE values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    DateTime,
    DateTimeTz,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Temporal types, before the integer check ("interval" contains "int")
    match lower.as_str() {
        "timestamptz" => return TypeCategory::DateTimeTz,
        "timestamp" | "datetime" => return TypeCategory::DateTime,
        "date" => return TypeCategory::Date,
        "time" => return TypeCategory::Time,
        _ => {}
    }

    // Integer types
    if (lower.contains("int") && lower != "interval")
        || lower.contains("serial")
        || lower.contains("tiny")
    {
        return TypeCategory::Integer;
    }

    // Boolean
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Float types
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    // JSON types
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    // Binary types
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "enum" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Value helpers
// =============================================================================

/// Binary values are exposed as standard base64 text.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn datetime_value(v: chrono::NaiveDateTime) -> JsonValue {
    JsonValue::String(v.format(DATETIME_FORMAT).to_string())
}

/// Parse timestamp text as written by any of the engines or by chrono's
/// serde. Offsets are folded into UTC; a bare date means midnight.
pub(crate) fn parse_datetime(text: &str) -> Option<chrono::NaiveDateTime> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};

    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Parse the date part of date or timestamp text.
pub(crate) fn parse_date(text: &str) -> Option<chrono::NaiveDate> {
    let text = text.trim();
    let head = text.get(..10).unwrap_or(text);
    chrono::NaiveDate::parse_from_str(head, DATE_FORMAT).ok()
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting driver rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> Row;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::MySQL);
                let value = mysql::decode_column(self, idx, type_name, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                let value = postgres::decode_column(self, idx, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let declared = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                let value = sqlite::decode_column(self, idx, declared);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::DateTime | TypeCategory::DateTimeTz => decode_datetime(row, idx),
            TypeCategory::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Time => row
                .try_get::<Option<chrono::NaiveTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.format("%H:%M:%S").to_string()))
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        // Check NULL first
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Null;
        }
        // Try signed types
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        // Try unsigned types
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| encode_binary(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_datetime(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return datetime_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return datetime_value(v.naive_utc());
        }
        JsonValue::Null
    }

    fn decode_text(row: &MySqlRow, idx: usize, type_name: &str) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            if type_name.to_lowercase().contains("json") {
                if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                    return json;
                }
            }
            return JsonValue::String(v);
        }
        // VARBINARY-backed text columns
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| match String::from_utf8(v) {
                Ok(s) => JsonValue::String(s),
                Err(e) => encode_binary(e.as_bytes()),
            })
            .unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::DateTime => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(datetime_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::DateTimeTz => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| datetime_value(v.naive_utc()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Time => row
                .try_get::<Option<chrono::NaiveTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.format("%H:%M:%S").to_string()))
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| encode_binary(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<uuid::Uuid>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;
    use sqlx::ValueRef;

    /// Storage class of the value actually held by the cell.
    fn storage_class(row: &SqliteRow, idx: usize) -> Option<String> {
        let raw = row.try_get_raw(idx).ok()?;
        if raw.is_null() {
            return None;
        }
        Some(raw.type_info().name().to_ascii_uppercase())
    }

    pub fn decode_column(row: &SqliteRow, idx: usize, declared: TypeCategory) -> JsonValue {
        let Some(class) = storage_class(row, idx) else {
            return JsonValue::Null;
        };
        match class.as_str() {
            c if c.contains("INT") || c == "BOOLEAN" => {
                match row.try_get_unchecked::<i64, _>(idx) {
                    Ok(v) if declared == TypeCategory::Boolean => JsonValue::Bool(v != 0),
                    Ok(v) => JsonValue::Number(v.into()),
                    Err(_) => JsonValue::Null,
                }
            }
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
                .try_get_unchecked::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            _ => match row.try_get_unchecked::<String, _>(idx) {
                Ok(v) if declared == TypeCategory::Json => {
                    serde_json::from_str::<JsonValue>(&v).unwrap_or(JsonValue::String(v))
                }
                Ok(v) => JsonValue::String(v),
                Err(_) => JsonValue::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("TINYINT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("SERIAL", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        // SQLite NUMERIC is a float
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::DateTime
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::DateTimeTz
        );
        assert_eq!(
            categorize_type("DATE", DatabaseType::MySQL),
            TypeCategory::Date
        );
        assert_eq!(
            categorize_type("INTERVAL", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_json_and_text() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("BYTEA", DatabaseType::PostgreSQL),
            TypeCategory::Binary
        );
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_binary(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_parse_temporal_text() {
        let at = parse_datetime("2024-03-01 10:20:30").unwrap();
        assert_eq!(at.to_string(), "2024-03-01 10:20:30");
        let fractional = parse_datetime("2024-03-01T10:20:30.5").unwrap();
        assert_eq!(fractional.and_utc().timestamp_subsec_millis(), 500);
        assert_eq!(
            parse_datetime("2024-03-01T10:20:30+02:00").unwrap().to_string(),
            "2024-03-01 08:20:30"
        );
        assert_eq!(parse_datetime("2024-03-01").unwrap().to_string(), "2024-03-01 00:00:00");
        assert!(parse_datetime("yesterday").is_none());

        assert_eq!(parse_date("2024-03-01 10:20:30").unwrap().to_string(), "2024-03-01");
        assert!(parse_date("03/01/2024").is_none());
    }
}
