//! Database access layer.
//!
//! This module provides:
//! - Driver sessions over sqlx for MySQL, PostgreSQL and SQLite
//! - Direct and pooled connection providers
//! - Placeholder rewriting and error classification
//! - The query executor and its per-pool factory
//! - Row decoding to JSON maps
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod classify;
pub mod connection;
pub mod direct;
pub mod executor;
pub mod manager;
pub mod params;
pub mod placeholders;
pub mod pooled;
pub mod provider;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use connection::{Connection, DriverError, DriverErrorKind, ExecOutcome, SqlxConnection};
pub use direct::DirectProvider;
pub use executor::{ExecutorState, QueryExecution, QueryExecutor};
pub use manager::ConnectionManager;
pub use pooled::{DbPool, PooledProvider};
pub use provider::{ConnectionProvider, ProviderStats, build_provider, provider_from_config};
pub use types::Row;
