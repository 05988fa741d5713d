//! rowgate
//!
//! Record gateway and query executor for SQL databases (SQLite, PostgreSQL,
//! MySQL). Statements run over either dedicated connections or a shared
//! pool, chosen once per process.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod orm;
pub mod telemetry;

pub use config::Config;
pub use db::{ConnectionManager, QueryExecutor};
pub use error::{DbError, DbResult};
pub use orm::{Record, RecordGateway};
