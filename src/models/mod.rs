//! Data models shared by the executor and the record gateway.

pub mod connection;
pub mod param;

pub use connection::DatabaseType;
pub use param::QueryParam;
