//! Integration tests for the query executor against real drivers.
//!
//! Tests verify that:
//! - Named placeholders bind by name, including repeated names
//! - Missing bindings are reported before anything reaches the database
//! - Parameter values of every kind survive the trip to the database
//! - Auto-generated keys come back from MySQL and PostgreSQL inserts
//! - UUID keys, soft-delete timestamps and duplicate keys work on PostgreSQL
//!
//! MySQL and PostgreSQL tests are ignored by default. Run them with
//! `cargo test -- --ignored` and TEST_MYSQL_URL / TEST_POSTGRES_URL set.

mod common;

use chrono::NaiveDateTime;
use common::{POOL, setup_direct};
use rowgate::config::{DatabaseConfig, PoolOptions, ProviderKind};
use rowgate::db::{ConnectionManager, ExecutorState, build_provider};
use rowgate::error::DbError;
use rowgate::models::QueryParam;
use rowgate::orm::{FieldDescriptor, FieldType, PrimaryKey, Record, RecordGateway, field};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[tokio::test]
async fn test_repeated_placeholder_binds_once() {
    let (_db, _provider, manager) = setup_direct().await;
    let mut executor = manager.executor();

    executor
        .run(
            "SELECT :word AS a, :word || '-' || :word AS b",
            &[("word".to_string(), QueryParam::from("echo"))],
        )
        .await
        .unwrap();
    let execution = executor.execution().unwrap();
    assert_eq!(execution.statement.positions.len(), 3);
    assert_eq!(execution.bindings.len(), 1);

    let row = executor.fetch_one().unwrap().unwrap();
    assert_eq!(row["a"], json!("echo"));
    assert_eq!(row["b"], json!("echo-echo"));
}

#[tokio::test]
async fn test_missing_binding_never_reaches_database() {
    let (_db, provider, manager) = setup_direct().await;
    let mut executor = manager.executor();

    executor
        .prepare("INSERT INTO users (name, email) VALUES (:name, :email)")
        .await
        .unwrap();
    executor.bind(":name", "only-name").unwrap();
    let err = executor.execute().await.unwrap_err();
    assert!(err.is_usage());
    assert!(err.to_string().contains("email"));
    assert_eq!(executor.state(), ExecutorState::Failed);
    assert_eq!(provider.stats().checked_out, 0);
    assert_eq!(common::count(&manager, "users").await, 0);
}

#[tokio::test]
async fn test_parameter_kinds_survive_round_trip() {
    let (_db, _provider, manager) = setup_direct().await;
    let mut executor = manager.executor();
    executor
        .run(
            "CREATE TABLE kinds (i INTEGER, f REAL, t TEXT, b BLOB, flag BOOLEAN, empty TEXT)",
            &[],
        )
        .await
        .unwrap();

    executor
        .prepare("INSERT INTO kinds VALUES (:i, :f, :t, :b, :flag, :empty)")
        .await
        .unwrap();
    executor
        .bind_all([
            ("i", QueryParam::from(i64::MIN)),
            ("f", QueryParam::from(2.5)),
            ("t", QueryParam::from("héllo 世界")),
            ("b", QueryParam::from(vec![0u8, 159, 255])),
            ("flag", QueryParam::from(true)),
            ("empty", QueryParam::Null),
        ])
        .unwrap();
    assert_eq!(executor.execute().await.unwrap(), 1);

    executor.run("SELECT * FROM kinds", &[]).await.unwrap();
    let row = executor.fetch_one().unwrap().unwrap();
    assert_eq!(row["i"], json!(i64::MIN));
    assert_eq!(row["f"], json!(2.5));
    assert_eq!(row["t"], json!("héllo 世界"));
    assert_eq!(row["b"], json!("AJ//"));
    assert_eq!(row["flag"], json!(true));
    assert_eq!(row["empty"], json!(null));
}

#[tokio::test]
async fn test_fetch_column_and_scalar() {
    let (_db, _provider, manager) = setup_direct().await;
    common::exec_all(
        &manager,
        &[
            "INSERT INTO users (name, email) VALUES ('a', 'a@x.io')",
            "INSERT INTO users (name, email) VALUES ('b', 'b@x.io')",
        ],
    )
    .await;

    let mut executor = manager.executor();
    executor
        .run("SELECT name FROM users ORDER BY name", &[])
        .await
        .unwrap();
    assert_eq!(executor.fetch_column().unwrap(), vec![json!("a"), json!("b")]);

    executor
        .run(
            "SELECT email FROM users WHERE name = :name",
            &[("name".to_string(), QueryParam::from("zzz"))],
        )
        .await
        .unwrap();
    assert_eq!(executor.fetch_scalar().unwrap(), None);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Note {
    id: i64,
    body: String,
}

impl Record for Note {
    fn table_name() -> &'static str {
        "rowgate_notes"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![field("id", FieldType::Int), field("body", FieldType::String)]
    }
}

fn server_manager(url: &str) -> ConnectionManager {
    let config = DatabaseConfig::new(POOL, url, PoolOptions::default()).unwrap();
    let provider = build_provider(ProviderKind::Pooled, vec![config], false);
    ConnectionManager::new(provider, POOL)
}

async fn insert_returns_generated_key(manager: ConnectionManager, create: &str) {
    common::exec_all(&manager, &["DROP TABLE IF EXISTS rowgate_notes", create]).await;

    let mut notes = RecordGateway::<Note>::new(manager.clone());
    let mut first = Note {
        body: "first".to_string(),
        ..Note::default()
    };
    let mut second = Note {
        body: "second".to_string(),
        ..Note::default()
    };
    notes.insert_single_query(&mut first).await.unwrap();
    notes.insert_single_query(&mut second).await.unwrap();
    assert!(first.id > 0);
    assert_eq!(second.id, first.id + 1);
    assert_eq!(notes.select_by_id(second.id).await.unwrap().body, "second");

    common::exec_all(&manager, &["DROP TABLE rowgate_notes"]).await;
    manager.provider().shutdown().await;
}

fn mysql_url() -> String {
    std::env::var("TEST_MYSQL_URL").expect("TEST_MYSQL_URL must be set")
}

fn postgres_url() -> String {
    std::env::var("TEST_POSTGRES_URL").expect("TEST_POSTGRES_URL must be set")
}

#[tokio::test]
#[ignore = "requires TEST_MYSQL_URL"]
async fn test_mysql_insert_returns_generated_key() {
    insert_returns_generated_key(
        server_manager(&mysql_url()),
        "CREATE TABLE rowgate_notes (id BIGINT AUTO_INCREMENT PRIMARY KEY, body VARCHAR(100) NOT NULL)",
    )
    .await;
}

#[tokio::test]
#[ignore = "requires TEST_POSTGRES_URL"]
async fn test_postgres_insert_returns_generated_key() {
    insert_returns_generated_key(
        server_manager(&postgres_url()),
        "CREATE TABLE rowgate_notes (id BIGSERIAL PRIMARY KEY, body TEXT NOT NULL)",
    )
    .await;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ticket {
    token: String,
    seat: i64,
}

impl Record for Ticket {
    fn table_name() -> &'static str {
        "rowgate_tickets"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![field("token", FieldType::Uuid), field("seat", FieldType::Int)]
    }

    fn primary_key() -> Option<PrimaryKey> {
        Some(PrimaryKey::uuid("token"))
    }
}

#[tokio::test]
#[ignore = "requires TEST_POSTGRES_URL"]
async fn test_postgres_uuid_key_round_trip() {
    let manager = server_manager(&postgres_url());
    common::exec_all(
        &manager,
        &[
            "DROP TABLE IF EXISTS rowgate_tickets",
            "CREATE TABLE rowgate_tickets (token UUID PRIMARY KEY, seat INT4 NOT NULL)",
        ],
    )
    .await;

    let mut tickets = RecordGateway::<Ticket>::new(manager.clone());
    let mut ticket = Ticket {
        seat: 12,
        ..Ticket::default()
    };
    let key = tickets.insert_single_query(&mut ticket).await.unwrap();
    assert_eq!(ticket.token, key.as_str().unwrap());

    // Text keys are converted to the column's UUID type
    let stored = tickets.select_by_id(ticket.token.clone()).await.unwrap();
    assert_eq!(stored.seat, 12);
    let typed = uuid::Uuid::parse_str(&ticket.token).unwrap();
    assert_eq!(tickets.select_by_id(typed).await.unwrap().token, ticket.token);

    // An i64 bound against an INT4 column
    tickets.select(&[]).where_equal("seat", 12);
    assert_eq!(tickets.run().await.unwrap().len(), 1);

    assert_eq!(tickets.delete_by_id_query(typed).await.unwrap(), 1);
    common::exec_all(&manager, &["DROP TABLE rowgate_tickets"]).await;
    manager.provider().shutdown().await;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Member {
    id: i64,
    email: String,
    is_active: bool,
    deleted_at: Option<NaiveDateTime>,
}

impl Record for Member {
    fn table_name() -> &'static str {
        "rowgate_members"
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            field("id", FieldType::Int),
            field("email", FieldType::String),
            field("is_active", FieldType::Bool),
            field("deleted_at", FieldType::DateTime),
        ]
    }
}

fn member(email: &str) -> Member {
    Member {
        email: email.to_string(),
        is_active: true,
        ..Member::default()
    }
}

async fn postgres_members() -> ConnectionManager {
    let manager = server_manager(&postgres_url());
    common::exec_all(
        &manager,
        &[
            "DROP TABLE IF EXISTS rowgate_members",
            "CREATE TABLE rowgate_members (
                id BIGSERIAL PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                deleted_at TIMESTAMP
            )",
        ],
    )
    .await;
    manager
}

#[tokio::test]
#[ignore = "requires TEST_POSTGRES_URL"]
async fn test_postgres_soft_delete_binds_timestamp() {
    let manager = postgres_members().await;
    let mut members = RecordGateway::<Member>::new(manager.clone());
    let mut ada = member("ada@example.com");
    members.insert_single_query(&mut ada).await.unwrap();

    assert_eq!(members.safe_delete_query(ada.id).await.unwrap(), 1);
    let deleted = members.select_by_id(ada.id).await.unwrap();
    assert!(!deleted.is_active);
    let deleted_at = deleted.deleted_at.unwrap();

    // The stored timestamp reads back as a typed bind parameter
    members
        .select(&[])
        .where_equal("deleted_at", QueryParam::DateTime(deleted_at));
    assert_eq!(members.run().await.unwrap().len(), 1);

    assert_eq!(members.restore_query(ada.id).await.unwrap(), 1);
    assert!(members.select_by_id(ada.id).await.unwrap().deleted_at.is_none());

    common::exec_all(&manager, &["DROP TABLE rowgate_members"]).await;
    manager.provider().shutdown().await;
}

#[tokio::test]
#[ignore = "requires TEST_POSTGRES_URL"]
async fn test_postgres_duplicate_key_classified() {
    let manager = postgres_members().await;
    let mut members = RecordGateway::<Member>::new(manager.clone());
    members
        .insert_single_query(&mut member("dup@example.com"))
        .await
        .unwrap();

    let err = members
        .insert_single_query(&mut member("dup@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));
    assert!(err.to_string().contains("already exists"));
    assert_eq!(manager.provider().stats().checked_out, 0);

    common::exec_all(&manager, &["DROP TABLE rowgate_members"]).await;
    manager.provider().shutdown().await;
}
