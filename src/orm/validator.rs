//! Field, key and identifier validation.
//!
//! Identifiers cannot be bound, so every table, column and join target that
//! reaches generated SQL passes [`validate_identifier`] first.

use crate::error::{DbError, DbResult};
use crate::orm::record::RecordSchema;

/// Longest accepted identifier segment (MySQL's limit).
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Check `name` is a plain or dotted identifier (`users`, `u.email`, `u.*`).
pub fn is_safe_identifier(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let segments: Vec<&str> = name.split('.').collect();
    let last = segments.len() - 1;
    segments.iter().enumerate().all(|(i, segment)| {
        if *segment == "*" {
            return i == last && i > 0;
        }
        let mut chars = segment.chars();
        segment.len() <= MAX_IDENTIFIER_LENGTH
            && chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

pub fn validate_identifier(name: &str) -> DbResult<()> {
    if is_safe_identifier(name) {
        Ok(())
    } else {
        Err(DbError::usage(format!("Invalid identifier '{}'", name)))
    }
}

/// Check a field is declared and persisted.
pub fn validate_field(schema: &RecordSchema, name: &str) -> DbResult<()> {
    match schema.field(name) {
        Some(field) if !field.internal => Ok(()),
        Some(_) => Err(DbError::usage(format!(
            "Field '{}' of {} is internal and never persisted",
            name,
            schema.table()
        ))),
        None => Err(DbError::usage(format!(
            "Unknown field '{}' on {}",
            name,
            schema.table()
        ))),
    }
}

pub fn validate_fields<'a>(
    schema: &RecordSchema,
    names: impl IntoIterator<Item = &'a str>,
) -> DbResult<()> {
    names
        .into_iter()
        .try_for_each(|name| validate_field(schema, name))
}

/// Check a column exists on the record, for configured columns such as the
/// soft-delete pair.
pub fn validate_column(schema: &RecordSchema, name: &str) -> DbResult<()> {
    validate_identifier(name)?;
    if schema.has_field(name) {
        Ok(())
    } else {
        Err(DbError::usage(format!(
            "Column '{}' is not declared on {}",
            name,
            schema.table()
        )))
    }
}
