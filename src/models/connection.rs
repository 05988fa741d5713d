//! Connection-related data models.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Value for the `db.system` span attribute.
    pub fn system_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }

    /// PostgreSQL numbers its placeholders (`$1`), the others use `?`.
    pub fn numbered_placeholders(&self) -> bool {
        matches!(self, Self::PostgreSQL)
    }

    /// Whether INSERT ids must be read back through `RETURNING`.
    pub fn uses_returning_for_insert_id(&self) -> bool {
        matches!(self, Self::PostgreSQL)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_from_connection_string() {
        assert_eq!(
            DatabaseType::from_connection_string("postgres://localhost/db"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("postgresql://localhost/db"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("mysql://localhost/db"),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("mariadb://localhost/db"),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("sqlite:test.db"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(
            DatabaseType::from_connection_string("unknown://localhost"),
            None
        );
    }

    #[test]
    fn test_dialect_switches() {
        assert!(DatabaseType::PostgreSQL.numbered_placeholders());
        assert!(!DatabaseType::MySQL.numbered_placeholders());
        assert!(DatabaseType::PostgreSQL.uses_returning_for_insert_id());
        assert!(!DatabaseType::SQLite.uses_returning_for_insert_id());
        assert_eq!(DatabaseType::MySQL.system_name(), "mysql");
    }
}
