//! Shared fixtures for the SQLite integration suites.

#![allow(dead_code)]

use chrono::NaiveDateTime;
use rowgate::config::{DatabaseConfig, PoolOptions, ProviderKind};
use rowgate::db::{ConnectionManager, ConnectionProvider, build_provider};
use rowgate::orm::{FieldDescriptor, FieldType, PrimaryKey, Record, field};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;

pub const POOL: &str = "main";

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        age INTEGER,
        score REAL,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        deleted_at DATETIME
    )",
    "CREATE TABLE orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        total REAL NOT NULL
    )",
    "CREATE TABLE sessions (
        token TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL
    )",
];

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub age: Option<i64>,
    pub score: Option<f64>,
    pub is_active: bool,
    pub deleted_at: Option<NaiveDateTime>,
}

impl User {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            is_active: true,
            ..Self::default()
        }
    }
}

impl Record for User {
    fn table_name() -> &'static str {
        "users"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            field("id", FieldType::Int),
            field("name", FieldType::String),
            field("email", FieldType::String),
            field("age", FieldType::Int),
            field("score", FieldType::Float),
            field("is_active", FieldType::Bool),
            field("deleted_at", FieldType::DateTime),
        ]
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub total: f64,
}

impl Record for Order {
    fn table_name() -> &'static str {
        "orders"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            field("id", FieldType::Int),
            field("user_id", FieldType::Int),
            field("total", FieldType::Float),
        ]
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    /// Never persisted.
    #[serde(default)]
    pub _fresh: bool,
}

impl Record for Session {
    fn table_name() -> &'static str {
        "sessions"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            field("token", FieldType::Uuid),
            field("user_id", FieldType::Int),
            field("_fresh", FieldType::Bool),
        ]
    }

    fn primary_key() -> Option<PrimaryKey> {
        Some(PrimaryKey::uuid("token"))
    }
}

/// A SQLite file living as long as the fixture.
pub struct TestDb {
    _dir: TempDir,
    pub config: DatabaseConfig,
}

impl TestDb {
    pub fn url(&self) -> &str {
        &self.config.connection_string
    }
}

pub fn sqlite_db(options: PoolOptions) -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let config = DatabaseConfig::new(POOL, url, options).unwrap();
    TestDb { _dir: dir, config }
}

pub fn provider(db: &TestDb, kind: ProviderKind) -> Arc<dyn ConnectionProvider> {
    build_provider(kind, vec![db.config.clone()], false)
}

pub fn manager(provider: &Arc<dyn ConnectionProvider>) -> ConnectionManager {
    ConnectionManager::new(provider.clone(), POOL)
}

/// Run DDL or setup statements without bindings.
pub async fn exec_all(manager: &ConnectionManager, statements: &[&str]) {
    let mut executor = manager.executor();
    for sql in statements {
        executor.run(sql, &[]).await.unwrap();
    }
}

/// Fresh database with the test schema, served by a direct provider.
pub async fn setup_direct() -> (TestDb, Arc<dyn ConnectionProvider>, ConnectionManager) {
    let db = sqlite_db(PoolOptions::default());
    let provider = provider(&db, ProviderKind::Direct);
    let manager = manager(&provider);
    exec_all(&manager, SCHEMA).await;
    (db, provider, manager)
}

/// Count rows with a plain executor.
pub async fn count(manager: &ConnectionManager, table: &str) -> i64 {
    let mut executor = manager.executor();
    executor
        .run(&format!("SELECT COUNT(*) AS n FROM {table}"), &[])
        .await
        .unwrap();
    executor.fetch_scalar().unwrap().and_then(|v| v.as_i64()).unwrap()
}
