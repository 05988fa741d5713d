//! Primary-key resolution, validation and UUID generation.

use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use crate::orm::record::RecordSchema;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Int,
    String,
    Uuid,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Int => write!(f, "int"),
            KeyKind::String => write!(f, "string"),
            KeyKind::Uuid => write!(f, "uuid"),
        }
    }
}

impl FromStr for KeyKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(KeyKind::Int),
            "string" => Ok(KeyKind::String),
            "uuid" => Ok(KeyKind::Uuid),
            other => Err(DbError::usage(format!(
                "Invalid primary key type '{}'. Valid types: int, integer, string, uuid",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub column: String,
    pub kind: KeyKind,
    /// Generate a value on insert when the record has none (UUID keys).
    pub auto_generate: bool,
}

impl PrimaryKey {
    pub fn new(column: impl Into<String>, kind: KeyKind) -> Self {
        Self {
            column: column.into(),
            kind,
            auto_generate: false,
        }
    }

    /// A UUID key generated on first access.
    pub fn uuid(column: impl Into<String>) -> Self {
        Self::new(column, KeyKind::Uuid).with_auto_generate(true)
    }

    #[must_use]
    pub fn with_auto_generate(mut self, auto_generate: bool) -> Self {
        self.auto_generate = auto_generate;
        self
    }

    /// Parse a `(column, kind)` pair as given by callers.
    pub fn parse(column: &str, kind: &str) -> DbResult<Self> {
        crate::orm::validator::validate_identifier(column)?;
        let kind = kind.parse::<KeyKind>()?;
        Ok(Self::new(column, kind).with_auto_generate(kind == KeyKind::Uuid))
    }

    /// Check a key value is well formed for this key's kind.
    pub fn validate(&self, value: &QueryParam) -> DbResult<()> {
        let valid = match (self.kind, value) {
            (KeyKind::Int, QueryParam::Int(i)) => *i > 0,
            (KeyKind::Int, QueryParam::String(s)) => s.trim().parse::<i64>().is_ok_and(|i| i > 0),
            (KeyKind::String, QueryParam::String(s)) => !s.trim().is_empty(),
            (KeyKind::String, QueryParam::Int(_)) => true,
            (KeyKind::Uuid, QueryParam::String(s)) => Uuid::parse_str(s.trim()).is_ok(),
            (KeyKind::Uuid, QueryParam::Uuid(_)) => true,
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(DbError::usage(format!(
                "Invalid {} primary key value {} for '{}'",
                self.kind,
                value.render(),
                self.column
            )))
        }
    }

    /// Normalize a key value to the parameter bound in statements.
    pub fn param(&self, value: &QueryParam) -> DbResult<QueryParam> {
        self.validate(value)?;
        Ok(match (self.kind, value) {
            (KeyKind::Int, QueryParam::String(s)) => {
                QueryParam::Int(s.trim().parse::<i64>().unwrap_or_default())
            }
            (KeyKind::String, QueryParam::Int(i)) => QueryParam::String(i.to_string()),
            (KeyKind::Uuid, QueryParam::String(s)) => Uuid::parse_str(s.trim())
                .map(QueryParam::Uuid)
                .unwrap_or_else(|_| QueryParam::String(s.clone())),
            (_, other) => other.clone(),
        })
    }

    /// Key value held in a serialized record, if set.
    pub fn value_in<'a>(&self, values: &'a Map<String, JsonValue>) -> Option<&'a JsonValue> {
        values.get(&self.column).filter(|v| !is_empty_key(v))
    }

    /// Give a UUID key its value if it has none. Returns true when a value
    /// was generated.
    pub fn ensure_generated(&self, values: &mut Map<String, JsonValue>) -> bool {
        if self.kind != KeyKind::Uuid || !self.auto_generate || self.value_in(values).is_some() {
            return false;
        }
        values.insert(
            self.column.clone(),
            JsonValue::String(Uuid::new_v4().to_string()),
        );
        true
    }
}

/// NULL, zero and empty strings mean "no key yet".
pub fn is_empty_key(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Number(n) => n.as_i64() == Some(0),
        JsonValue::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Resolves the key of one gateway lazily and remembers the answer.
#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyStrategy {
    configured: Option<PrimaryKey>,
    resolved: Option<PrimaryKey>,
}

impl PrimaryKeyStrategy {
    /// Use an explicit key. Resolution runs again on next access.
    pub fn configure(&mut self, key: PrimaryKey) {
        self.configured = Some(key);
        self.resolved = None;
    }

    /// Resolve in order: a declared `id` field, the configured key, the key
    /// declared by the record, then `id` as an integer.
    pub fn resolve(
        &mut self,
        schema: &RecordSchema,
        declared: Option<PrimaryKey>,
    ) -> &PrimaryKey {
        self.resolved.get_or_insert_with(|| {
            if schema.has_field("id") {
                PrimaryKey::new("id", KeyKind::Int)
            } else if let Some(key) = self.configured.clone() {
                key
            } else if let Some(key) = declared {
                key
            } else {
                PrimaryKey::new("id", KeyKind::Int)
            }
        })
    }
}
