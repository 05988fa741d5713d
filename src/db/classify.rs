//! Driver error classification.
//!
//! Turns a [`DriverError`] into the [`DbError`] the caller sees. Constraint
//! violations are recognised across dialects by sqlx error kind, SQLSTATE,
//! engine error code or message text, and rewritten into stable messages.

use crate::db::connection::{DriverError, DriverErrorKind};
use crate::db::placeholders::StatementKind;
use crate::error::{DbError, ErrorContext};

/// SQLSTATE / engine codes for unique violations (PostgreSQL, MySQL, SQLite).
const UNIQUE_CODES: &[&str] = &["23505", "1062", "2067", "1555"];
/// SQLSTATE / engine codes for foreign-key violations.
const FOREIGN_KEY_CODES: &[&str] = &["23503", "1451", "1452", "787"];
/// Codes of transient failures. Any SQLSTATE of class 08 is transient too.
const TRANSIENT_CODES: &[&str] = &["40001", "40P01", "57P01", "HYT00", "1205", "1213", "2006", "2013"];
const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "deadlock",
    "gone away",
    "lost connection",
    "connection reset",
    "broken pipe",
    "database is locked",
];

/// Whether the driver error reports a unique-constraint violation.
pub fn is_unique_violation(err: &DriverError) -> bool {
    err.kind == DriverErrorKind::UniqueViolation
        || err
            .code
            .as_deref()
            .is_some_and(|code| UNIQUE_CODES.contains(&code))
        || err.message.contains("Duplicate entry")
        || err.message.contains("UNIQUE constraint failed")
        || err.message.contains("duplicate key value")
}

/// Whether the driver error reports a foreign-key violation.
pub fn is_foreign_key_violation(err: &DriverError) -> bool {
    err.kind == DriverErrorKind::ForeignKeyViolation
        || err
            .code
            .as_deref()
            .is_some_and(|code| FOREIGN_KEY_CODES.contains(&code))
        || err.message.contains("FOREIGN KEY constraint failed")
        || err.message.contains("a foreign key constraint fails")
}

/// Whether the failure belongs to the transient class worth retrying.
pub fn is_transient(err: &DriverError) -> bool {
    if matches!(
        err.kind,
        DriverErrorKind::Connection | DriverErrorKind::Timeout
    ) {
        return true;
    }
    if let Some(code) = err.code.as_deref() {
        if code.starts_with("08") || TRANSIENT_CODES.contains(&code) {
            return true;
        }
    }
    let lower = err.message.to_lowercase();
    TRANSIENT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Field named by a unique violation, when the engine reports it.
///
/// MySQL: `Duplicate entry 'x' for key 'users.email'`;
/// SQLite: `UNIQUE constraint failed: users.email`;
/// PostgreSQL: `Key (email)=(x) already exists.` in the detail, which sqlx
/// does not surface, so the constraint name is used when present.
pub fn duplicate_field(message: &str) -> Option<String> {
    if let Some(rest) = message.split("UNIQUE constraint failed:").nth(1) {
        let first = rest.split(',').next()?.trim();
        return Some(strip_table(first).to_string());
    }
    if let Some(rest) = message.split("for key '").nth(1) {
        let key = rest.split('\'').next()?;
        return Some(strip_table(key).to_string());
    }
    if let Some(rest) = message.split("Key (").nth(1) {
        return rest.split(')').next().map(String::from);
    }
    if let Some(rest) = message.split("unique constraint \"").nth(1) {
        let name = rest.split('"').next()?;
        // Conventional names end with _key (users_email_key)
        let trimmed = name.strip_suffix("_key").unwrap_or(name);
        return Some(trimmed.rsplit('_').next().unwrap_or(trimmed).to_string());
    }
    None
}

fn strip_table(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// Operation-aware message for a duplicate key.
pub fn duplicate_message(kind: StatementKind, field: Option<&str>) -> String {
    let subject = match field {
        Some(field) => format!("A record with this {field}"),
        None => "A record with this value".to_string(),
    };
    match kind {
        StatementKind::Insert => format!("Cannot create record: {subject} already exists"),
        StatementKind::Update => format!("Cannot update record: {subject} already exists"),
        _ => format!("{subject} already exists"),
    }
}

/// Operation-aware message for a foreign-key violation.
pub fn foreign_key_message(kind: StatementKind) -> String {
    match kind {
        StatementKind::Delete => {
            "Cannot delete record: related data exists in other tables".to_string()
        }
        StatementKind::Update => {
            "Cannot update record: related data exists in other tables or the referenced record does not exist".to_string()
        }
        StatementKind::Insert => {
            "Cannot create record: the referenced record does not exist".to_string()
        }
        _ => "Operation violates a foreign key constraint".to_string(),
    }
}

/// Classify a driver failure raised while executing a statement.
///
/// `context` must already carry sql, bindings, timing and transaction state;
/// driver fields and the retryable flag are filled in here.
pub fn classify(err: &DriverError, kind: StatementKind, mut context: ErrorContext) -> DbError {
    context.driver_code = err.code.clone();
    context.driver_message = err.message.clone();
    context.retryable = is_transient(err);

    if is_unique_violation(err) {
        let field = duplicate_field(&err.message);
        return DbError::duplicate_key(duplicate_message(kind, field.as_deref()), context);
    }
    if is_foreign_key_violation(err) {
        return DbError::foreign_key(foreign_key_message(kind), context);
    }
    if err.kind == DriverErrorKind::Timeout {
        return DbError::timeout("statement execution", (context.elapsed_ms / 1000) as u32);
    }
    DbError::query(err.message.clone(), err.code.clone(), context)
}
