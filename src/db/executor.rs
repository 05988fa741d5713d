//! Query execution engine.
//!
//! A [`QueryExecutor`] drives one prepared statement at a time through
//! `prepare → bind → execute → fetch` and owns the connection for the unit of
//! work while it needs one.
//!
//! # Release policy
//!
//! - Outside a transaction, writes hand the connection back as soon as they
//!   have executed; reads keep it until a fetch method has consumed the rows.
//! - Inside a transaction the connection is held until `commit` or
//!   `rollback`, which always release it whatever their outcome.
//! - Failures outside a transaction release the connection immediately.
//! - Dropping an executor that still holds a connection rolls back any open
//!   transaction on a spawned task and releases it.

use crate::db::classify::classify;
use crate::db::connection::Connection;
use crate::db::placeholders::{self, ParsedStatement, StatementKind};
use crate::db::provider::ConnectionProvider;
use crate::db::types::Row;
use crate::error::{DbError, DbResult, ErrorContext};
use crate::models::{DatabaseType, QueryParam};
use crate::telemetry::{Instrumentation, KeyValue, SpanHandle, SpanKind, SpanStatus, swallow};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Longest statement accepted by [`QueryExecutor::prepare`], in characters.
pub const MAX_QUERY_LENGTH: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Prepared,
    Bound,
    Executed,
    Released,
    Failed,
}

/// State of the statement currently owned by an executor.
#[derive(Debug, Clone)]
pub struct QueryExecution {
    /// Statement text as given, with named placeholders.
    pub query: String,
    pub statement: ParsedStatement,
    /// Bound values in bind order.
    pub bindings: Vec<(String, QueryParam)>,
    pub affected_rows: u64,
    pub last_insert_id: Option<i64>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub in_transaction: bool,
    pub error: Option<DbError>,
}

impl QueryExecution {
    fn new(query: &str, statement: ParsedStatement, in_transaction: bool) -> Self {
        Self {
            query: query.to_string(),
            statement,
            bindings: Vec::new(),
            affected_rows: 0,
            last_insert_id: None,
            started_at: None,
            finished_at: None,
            in_transaction,
            error: None,
        }
    }

    pub fn binding(&self, name: &str) -> Option<&QueryParam> {
        self.bindings
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
    }

    /// Placeholder names that have no value yet.
    pub fn unbound(&self) -> Vec<&str> {
        self.statement
            .names()
            .into_iter()
            .filter(|name| self.binding(name).is_none())
            .collect()
    }

    /// Wall time of the last execution, if it finished.
    pub fn elapsed_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start).as_millis() as u64),
            _ => None,
        }
    }

    fn positional_params(&self) -> Vec<QueryParam> {
        self.statement
            .positions
            .iter()
            .map(|name| self.binding(name).cloned().unwrap_or(QueryParam::Null))
            .collect()
    }

    fn rendered_bindings(&self) -> Vec<(String, String)> {
        self.bindings
            .iter()
            .map(|(name, value)| (name.clone(), value.render()))
            .collect()
    }
}

pub struct QueryExecutor {
    provider: Arc<dyn ConnectionProvider>,
    pool_name: String,
    instrumentation: Instrumentation,
    connection: Option<Box<dyn Connection>>,
    execution: Option<QueryExecution>,
    rows: Option<Vec<Row>>,
    state: ExecutorState,
    in_transaction: bool,
    last_error: Option<String>,
}

impl QueryExecutor {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        pool_name: impl Into<String>,
        instrumentation: Instrumentation,
    ) -> Self {
        Self {
            provider,
            pool_name: pool_name.into(),
            instrumentation,
            connection: None,
            execution: None,
            rows: None,
            state: ExecutorState::Idle,
            in_transaction: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Whether a connection is currently held.
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn execution(&self) -> Option<&QueryExecution> {
        self.execution.as_ref()
    }

    /// Message of the last failure, cleared by the next `prepare`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn affected_rows(&self) -> u64 {
        self.execution.as_ref().map_or(0, |e| e.affected_rows)
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.execution.as_ref().and_then(|e| e.last_insert_id)
    }

    pub fn database_type(&self) -> DbResult<DatabaseType> {
        match &self.connection {
            Some(conn) => Ok(conn.database_type()),
            None => self.provider.database_type(&self.pool_name),
        }
    }

    /// Prepare a statement written with `:name` placeholders.
    ///
    /// Replaces any previous statement. Acquires a connection when none is
    /// held.
    pub async fn prepare(&mut self, sql: &str) -> DbResult<()> {
        self.last_error = None;
        self.rows = None;
        self.execution = None;

        if sql.trim().is_empty() {
            return Err(self.fail(DbError::usage("Query cannot be empty"), false));
        }
        let length = sql.chars().count();
        if length > MAX_QUERY_LENGTH {
            return Err(self.fail(
                DbError::usage(format!(
                    "Query is too long ({} characters, maximum {})",
                    length, MAX_QUERY_LENGTH
                )),
                false,
            ));
        }

        self.ensure_connection().await?;
        let Some(conn) = self.connection.as_mut() else {
            return Err(self.fail(DbError::internal("Connection vanished after acquire"), true));
        };

        let statement = placeholders::parse(sql, conn.database_type());
        let started = Instant::now();
        if let Err(driver_err) = conn.prepare(&statement.sql).await {
            let context = ErrorContext {
                sql: sql.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                in_transaction: self.in_transaction,
                ..ErrorContext::default()
            };
            let err = classify(&driver_err, statement.kind, context);
            self.execution = Some(QueryExecution::new(sql, statement, self.in_transaction));
            return Err(self.fail(err, true));
        }

        debug!(pool = %self.pool_name, sql = %sql, "Prepared statement");
        self.execution = Some(QueryExecution::new(sql, statement, self.in_transaction));
        self.state = ExecutorState::Prepared;
        Ok(())
    }

    /// Bind a value to a named placeholder (with or without the leading `:`).
    ///
    /// The parameter kind follows the Rust type of `value`.
    pub fn bind(&mut self, name: &str, value: impl Into<QueryParam>) -> DbResult<()> {
        let name = name.strip_prefix(':').unwrap_or(name);

        if self.execution.is_none()
            || !matches!(
                self.state,
                ExecutorState::Prepared | ExecutorState::Bound | ExecutorState::Executed
            )
        {
            return Err(self.fail(DbError::usage("Cannot bind without a prepared statement"), false));
        }
        let known = self
            .execution
            .as_ref()
            .is_some_and(|e| e.statement.has_placeholder(name));
        if !known {
            let err = DbError::usage(format!("Unknown placeholder ':{}'", name));
            return Err(self.fail(err, false));
        }

        let value = value.into();
        if let Some(execution) = self.execution.as_mut() {
            match execution.bindings.iter_mut().find(|(bound, _)| bound == name) {
                Some((_, slot)) => *slot = value,
                None => execution.bindings.push((name.to_string(), value)),
            }
        }
        self.state = ExecutorState::Bound;
        Ok(())
    }

    /// Bind several values at once.
    pub fn bind_all<I, K>(&mut self, params: I) -> DbResult<()>
    where
        I: IntoIterator<Item = (K, QueryParam)>,
        K: AsRef<str>,
    {
        for (name, value) in params {
            self.bind(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// Execute the prepared statement.
    ///
    /// Returns the affected row count, or the number of rows produced by a
    /// row-returning statement. Zero is a success.
    pub async fn execute(&mut self) -> DbResult<u64> {
        let ready = matches!(
            self.state,
            ExecutorState::Prepared
                | ExecutorState::Bound
                | ExecutorState::Executed
                | ExecutorState::Released
        );
        let missing: Option<Vec<String>> = self.execution.as_ref().map(|e| {
            e.unbound()
                .into_iter()
                .map(|name| format!(":{name}"))
                .collect()
        });
        let Some(missing) = missing.filter(|_| ready) else {
            return Err(self.fail(DbError::usage("No statement has been prepared"), false));
        };
        if !missing.is_empty() {
            let err = DbError::usage(format!(
                "Missing values for placeholders: {}",
                missing.join(", ")
            ));
            return Err(self.fail(err, false));
        }

        // A write outside a transaction may already have released the connection
        self.ensure_connection().await?;

        let in_transaction = self.in_transaction;
        let Some(execution) = self.execution.as_mut() else {
            return Err(self.fail(DbError::internal("Statement vanished before execute"), false));
        };
        let Some(conn) = self.connection.as_mut() else {
            return Err(self.fail(DbError::internal("Connection vanished before execute"), true));
        };

        let params = execution.positional_params();
        let statement = execution.statement.clone();
        let db_type = conn.database_type();

        let span = if self.instrumentation.should_trace() {
            start_span(&self.instrumentation, &statement, db_type, params.len(), in_transaction)
        } else {
            None
        };

        debug!(
            pool = %self.pool_name,
            sql = %execution.query,
            params = params.len(),
            in_transaction,
            "Executing statement"
        );

        execution.in_transaction = in_transaction;
        execution.started_at = Some(Instant::now());
        execution.finished_at = None;
        execution.error = None;
        execution.last_insert_id = None;

        let result = if statement.returns_rows {
            conn.fetch_all(&statement.sql, &params).await.map(|rows| {
                let last_insert_id = (statement.kind == StatementKind::Insert)
                    .then(|| first_value(&rows).and_then(JsonValue::as_i64))
                    .flatten();
                (rows.len() as u64, last_insert_id, Some(rows))
            })
        } else {
            conn.execute(&statement.sql, &params).await.map(|outcome| {
                let last_insert_id = (statement.kind == StatementKind::Insert)
                    .then_some(outcome.last_insert_id)
                    .flatten();
                (outcome.rows_affected, last_insert_id, None)
            })
        };

        let finished = Instant::now();
        execution.finished_at = Some(finished);
        let elapsed_ms = execution.elapsed_ms().unwrap_or_default();

        match result {
            Ok((affected, last_insert_id, rows)) => {
                execution.affected_rows = affected;
                execution.last_insert_id = last_insert_id;
                self.rows = rows;
                self.state = ExecutorState::Executed;

                if let Some(span) = span {
                    let attributes = [
                        KeyValue::new("db.rows_affected", affected),
                        KeyValue::new("db.execution_time_ms", elapsed_ms),
                    ];
                    swallow(
                        "end_span",
                        self.instrumentation
                            .tracer()
                            .end_span(span, &attributes, SpanStatus::Ok),
                    );
                }

                debug!(
                    pool = %self.pool_name,
                    rows = affected,
                    elapsed_ms,
                    "Statement executed"
                );

                // Reads keep the connection until their rows are fetched
                if statement.kind != StatementKind::Select && !self.in_transaction {
                    self.release_connection(false);
                    self.state = ExecutorState::Released;
                }
                Ok(affected)
            }
            Err(driver_err) => {
                let context = ErrorContext {
                    sql: execution.query.clone(),
                    bindings: execution.rendered_bindings(),
                    elapsed_ms,
                    in_transaction,
                    ..ErrorContext::default()
                };
                let err = classify(&driver_err, statement.kind, context);

                if let Some(span) = span {
                    let tracer = self.instrumentation.tracer();
                    swallow("record_exception", tracer.record_exception(&span, &err.to_string()));
                    let attributes = [KeyValue::new("db.execution_time_ms", elapsed_ms)];
                    swallow(
                        "end_span",
                        tracer.end_span(span, &attributes, SpanStatus::Error(err.to_string())),
                    );
                }

                // Constraint violations leave the session healthy
                let broken = !matches!(
                    err,
                    DbError::DuplicateKey { .. } | DbError::ForeignKey { .. }
                );
                Err(self.fail(err, broken))
            }
        }
    }

    /// Prepare, bind and execute in one call.
    pub async fn run(&mut self, sql: &str, params: &[(String, QueryParam)]) -> DbResult<u64> {
        self.prepare(sql).await?;
        for (name, value) in params {
            self.bind(name, value.clone())?;
        }
        self.execute().await
    }

    /// All rows of the executed statement. Releases the connection.
    pub fn fetch_all(&mut self) -> DbResult<Vec<Row>> {
        let rows = self.take_rows()?;
        self.finish_read();
        Ok(rows)
    }

    /// First row, if any. Releases the connection.
    pub fn fetch_one(&mut self) -> DbResult<Option<Row>> {
        let rows = self.take_rows()?;
        self.finish_read();
        Ok(rows.into_iter().next())
    }

    /// First column of every row. Releases the connection.
    pub fn fetch_column(&mut self) -> DbResult<Vec<JsonValue>> {
        let rows = self.take_rows()?;
        self.finish_read();
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().next().map(|(_, v)| v).unwrap_or(JsonValue::Null))
            .collect())
    }

    /// First column of the first row. Releases the connection.
    pub fn fetch_scalar(&mut self) -> DbResult<Option<JsonValue>> {
        let rows = self.take_rows()?;
        self.finish_read();
        Ok(first_value(&rows).cloned())
    }

    /// Start a transaction. No connection may be held at this point.
    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(self.record(DbError::transaction("A transaction is already active")));
        }
        if self.connection.is_some() {
            return Err(self.record(DbError::transaction(
                "Cannot begin a transaction while a statement holds the connection",
            )));
        }

        self.last_error = None;
        self.ensure_connection().await?;
        let Some(conn) = self.connection.as_mut() else {
            return Err(self.fail(DbError::internal("Connection vanished after acquire"), true));
        };

        if let Err(e) = conn.begin().await {
            let err = DbError::transaction(format!("Failed to begin transaction: {}", e));
            return Err(self.fail(err, true));
        }

        self.in_transaction = true;
        self.execution = None;
        self.rows = None;
        self.state = ExecutorState::Idle;
        info!(pool = %self.pool_name, "Transaction started");
        Ok(())
    }

    /// Commit the open transaction. The connection is released either way.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.end_transaction(true).await
    }

    /// Roll back the open transaction. The connection is released either way.
    pub async fn rollback(&mut self) -> DbResult<()> {
        self.end_transaction(false).await
    }

    /// Roll back any open transaction and release any held connection.
    pub async fn close(&mut self) {
        if self.in_transaction {
            if let Err(e) = self.rollback().await {
                warn!(pool = %self.pool_name, error = %e, "Rollback during close failed");
            }
        }
        self.release_connection(false);
        self.rows = None;
        self.state = ExecutorState::Idle;
    }

    async fn end_transaction(&mut self, commit: bool) -> DbResult<()> {
        let action = if commit { "commit" } else { "rollback" };
        if !self.in_transaction {
            return Err(self.record(DbError::transaction(format!(
                "No active transaction to {}",
                action
            ))));
        }

        self.in_transaction = false;
        self.rows = None;
        let Some(conn) = self.connection.as_mut() else {
            return Err(self.record(DbError::transaction(format!(
                "Transaction lost its connection before {}",
                action
            ))));
        };

        let result = if commit {
            conn.commit().await
        } else {
            conn.rollback().await
        };

        match result {
            Ok(()) => {
                self.release_connection(false);
                self.state = ExecutorState::Released;
                info!(pool = %self.pool_name, action, "Transaction finished");
                Ok(())
            }
            Err(e) => {
                let err = DbError::transaction(format!("Failed to {} transaction: {}", action, e));
                Err(self.fail(err, true))
            }
        }
    }

    async fn ensure_connection(&mut self) -> DbResult<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        match self.provider.acquire(&self.pool_name).await {
            Ok(conn) => {
                self.connection = Some(conn);
                Ok(())
            }
            Err(e) => {
                warn!(pool = %self.pool_name, error = %e, "Could not acquire a connection");
                self.last_error = Some(e.to_string());
                self.state = ExecutorState::Failed;
                Err(e)
            }
        }
    }

    fn take_rows(&mut self) -> DbResult<Vec<Row>> {
        if self.state != ExecutorState::Executed
            && !(self.state == ExecutorState::Released && self.rows.is_some())
        {
            return Err(self.fail(DbError::usage("No executed statement to fetch from"), false));
        }
        match self.rows.take() {
            Some(rows) => Ok(rows),
            None => Err(self.fail(DbError::usage("Statement did not return rows"), false)),
        }
    }

    fn finish_read(&mut self) {
        if !self.in_transaction {
            self.release_connection(false);
        }
        self.state = ExecutorState::Released;
    }

    fn release_connection(&mut self, broken: bool) {
        if let Some(conn) = self.connection.take() {
            self.provider.release(conn, broken);
        }
    }

    /// Store the error without touching the connection.
    fn record(&mut self, err: DbError) -> DbError {
        self.last_error = Some(err.to_string());
        err
    }

    /// Store the error, mark the statement failed and, outside a
    /// transaction, release the connection.
    fn fail(&mut self, err: DbError, broken: bool) -> DbError {
        if err.is_usage() {
            debug!(pool = %self.pool_name, error = %err, "Executor usage error");
        } else {
            warn!(pool = %self.pool_name, error = %err, "Statement failed");
        }
        self.last_error = Some(err.to_string());
        if let Some(execution) = self.execution.as_mut() {
            execution.error = Some(err.clone());
        }
        self.rows = None;
        self.state = ExecutorState::Failed;
        if !self.in_transaction {
            self.release_connection(broken);
        }
        err
    }
}

impl Drop for QueryExecutor {
    fn drop(&mut self) {
        let Some(conn) = self.connection.take() else {
            return;
        };

        if !self.in_transaction {
            self.provider.release(conn, false);
            return;
        }

        let provider = Arc::clone(&self.provider);
        let pool_name = self.pool_name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut conn = conn;
                    let broken = conn.rollback().await.is_err();
                    provider.release(conn, broken);
                    warn!(
                        pool = %pool_name,
                        "Open transaction rolled back via Drop - consider calling close()"
                    );
                });
            }
            Err(_) => {
                // No runtime to roll back on; closing the session aborts the transaction
                warn!(pool = %pool_name, "Discarding connection with open transaction");
                provider.release(conn, true);
            }
        }
    }
}

fn first_value(rows: &[Row]) -> Option<&JsonValue> {
    rows.first().and_then(|row| row.values().next())
}

fn start_span(
    instrumentation: &Instrumentation,
    statement: &ParsedStatement,
    db_type: DatabaseType,
    param_count: usize,
    in_transaction: bool,
) -> Option<SpanHandle> {
    let operation = placeholders::first_keyword(&statement.sql);
    let mut attributes = vec![
        KeyValue::new("db.operation", operation.as_str()),
        KeyValue::new("db.system", db_type.system_name()),
        KeyValue::new("db.params.count", param_count),
        KeyValue::new("db.in_transaction", in_transaction),
    ];
    if let Some(context) = instrumentation.context() {
        attributes.push(KeyValue::new("trace.id", context.trace_id()));
    }
    swallow(
        "start_span",
        instrumentation
            .tracer()
            .start_span(&operation, &attributes, SpanKind::Client),
    )
}
