//! Error types for rowgate.
//!
//! All driver failures are converted into [`DbError`] at the query executor
//! boundary. Each variant carries a message fit for end users; constraint
//! violations are rewritten into stable, operation-aware text while the
//! original driver details stay available through [`ErrorContext`].

use serde::Serialize;
use thiserror::Error;

/// Diagnostic context attached to errors raised while executing a statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    /// Statement text as prepared (named placeholders).
    pub sql: String,
    /// Rendered bindings, in placeholder name order.
    pub bindings: Vec<(String, String)>,
    pub elapsed_ms: u64,
    pub in_transaction: bool,
    /// The failure belongs to a transient class (lost connection, deadlock, timeout).
    /// Nothing in rowgate retries on its own; the flag is advice for callers.
    pub retryable: bool,
    /// Driver error code (SQLSTATE or engine specific code).
    pub driver_code: Option<String>,
    /// Original driver message.
    pub driver_message: String,
}

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Usage error: {message}")]
    Usage { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("{message}")]
    DuplicateKey {
        message: String,
        context: Box<ErrorContext>,
    },

    #[error("{message}")]
    ForeignKey {
        message: String,
        context: Box<ErrorContext>,
    },

    #[error("Database error: {message}")]
    Query {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        context: Box<ErrorContext>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Pool not configured: {pool_name}")]
    PoolNotFound { pool_name: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a usage error (caller misuse, never retried).
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a duplicate-key error.
    pub fn duplicate_key(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::DuplicateKey {
            message: message.into(),
            context: Box::new(context),
        }
    }

    /// Create a foreign-key violation error.
    pub fn foreign_key(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ForeignKey {
            message: message.into(),
            context: Box::new(context),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(
        message: impl Into<String>,
        sql_state: Option<String>,
        context: ErrorContext,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
            context: Box::new(context),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a pool not found error.
    pub fn pool_not_found(pool_name: impl Into<String>) -> Self {
        Self::PoolNotFound {
            pool_name: pool_name.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::DuplicateKey { .. } => Some("Use a different value for the unique field"),
            Self::ForeignKey { .. } => {
                Some("Remove or reassign the dependent records before retrying")
            }
            _ => None,
        }
    }

    /// Statement context, for errors raised while executing SQL.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::DuplicateKey { context, .. }
            | Self::ForeignKey { context, .. }
            | Self::Query { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Query { context, .. } => context.retryable,
            _ => false,
        }
    }

    /// Check if this error was caused by caller misuse.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage { .. })
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
