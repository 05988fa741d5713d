//! Bind parameter values.
//!
//! The driver parameter kind is inferred from the Rust type handed to
//! [`QueryExecutor::bind`](crate::db::QueryExecutor::bind) through the `From`
//! conversions below.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A parameter value for parameterized queries.
///
/// The typed variants (`Uuid`, `DateTime`, `Date`) bind with the matching
/// column type on PostgreSQL and as text on engines without one.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    Uuid(Uuid),
    /// Timestamp without time zone
    DateTime(NaiveDateTime),
    Date(NaiveDate),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a JSON value into a bind parameter.
    ///
    /// Arrays and objects are bound as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            JsonValue::String(s) => Self::String(s.clone()),
            other => Self::String(other.to_string()),
        }
    }

    /// Render for diagnostics; long strings are truncated.
    pub fn render(&self) -> String {
        const MAX_RENDERED: usize = 64;
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) if s.chars().count() > MAX_RENDERED => {
                let head: String = s.chars().take(MAX_RENDERED).collect();
                format!("'{}...'", head)
            }
            Self::String(s) => format!("'{}'", s),
            Self::Bytes(b) => format!("<{} bytes>", b.len()),
            Self::Uuid(u) => format!("'{}'", u),
            Self::DateTime(dt) => format!("'{}'", dt),
            Self::Date(d) => format!("'{}'", d),
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for QueryParam {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u64> for QueryParam {
    fn from(v: u64) -> Self {
        // Values above i64::MAX cannot be bound as integers by every driver.
        i64::try_from(v)
            .map(Self::Int)
            .unwrap_or_else(|_| Self::String(v.to_string()))
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&String> for QueryParam {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Uuid> for QueryParam {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<NaiveDateTime> for QueryParam {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<NaiveDate> for QueryParam {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_inferred_from_rust_type() {
        assert_eq!(QueryParam::from(7i32), QueryParam::Int(7));
        assert_eq!(QueryParam::from(true), QueryParam::Bool(true));
        assert_eq!(QueryParam::from("a"), QueryParam::String("a".into()));
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(3i64)), QueryParam::Int(3));

        let id = Uuid::new_v4();
        assert_eq!(QueryParam::from(id), QueryParam::Uuid(id));
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(QueryParam::from(day), QueryParam::Date(day));
    }

    #[test]
    fn test_u64_overflow_binds_as_string() {
        assert_eq!(
            QueryParam::from(u64::MAX),
            QueryParam::String(u64::MAX.to_string())
        );
    }

    #[test]
    fn test_from_json() {
        assert_eq!(QueryParam::from_json(&json!(5)), QueryParam::Int(5));
        assert_eq!(QueryParam::from_json(&json!(1.5)), QueryParam::Float(1.5));
        assert_eq!(QueryParam::from_json(&json!(null)), QueryParam::Null);
        assert_eq!(
            QueryParam::from_json(&json!({"a": 1})),
            QueryParam::String("{\"a\":1}".into())
        );
    }

    #[test]
    fn test_render_truncates_long_strings() {
        let long = "x".repeat(200);
        let rendered = QueryParam::String(long).render();
        assert!(rendered.ends_with("...'"));
        assert!(rendered.len() < 80);
        assert_eq!(QueryParam::Bytes(vec![1, 2]).render(), "<2 bytes>");
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(10, 20, 30))
            .unwrap();
        assert_eq!(QueryParam::DateTime(at).render(), "'2024-03-01 10:20:30'");
    }
}
