//! In-memory provider and connection used by unit tests.

use crate::config::ProviderKind;
use crate::db::connection::{Connection, DriverError, ExecOutcome};
use crate::db::provider::{ConnectionProvider, ProviderStats};
use crate::db::types::Row;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    events: Mutex<Vec<String>>,
    params: Mutex<Vec<Vec<QueryParam>>>,
    rows: Mutex<VecDeque<Vec<Row>>>,
    failures: Mutex<Vec<(String, DriverError)>>,
    prepare_failures: Mutex<Vec<(String, DriverError)>>,
    last_insert_id: Mutex<Option<i64>>,
}

impl MockState {
    fn failure(list: &Mutex<Vec<(String, DriverError)>>, sql: &str) -> Option<DriverError> {
        list.lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, err)| err.clone())
    }

    fn log(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

pub(crate) struct MockProvider {
    state: Arc<MockState>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    broken: AtomicUsize,
    fail_acquire: AtomicBool,
}

impl MockProvider {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(MockState::default()),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            broken: AtomicUsize::new(0),
            fail_acquire: AtomicBool::new(false),
        })
    }

    pub(crate) fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn broken(&self) -> usize {
        self.broken.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::SeqCst);
    }

    /// Queue the result set of the next row-returning statement.
    /// Each value must be a JSON object.
    pub(crate) fn push_rows(&self, rows: Vec<JsonValue>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                JsonValue::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.state.rows.lock().unwrap().push_back(rows);
    }

    /// Fail statements (and `BEGIN`/`COMMIT`/`ROLLBACK`) containing `pattern`.
    pub(crate) fn fail_when(&self, pattern: &str, err: DriverError) {
        self.state
            .failures
            .lock()
            .unwrap()
            .push((pattern.to_string(), err));
    }

    pub(crate) fn fail_prepare_when(&self, pattern: &str, err: DriverError) {
        self.state
            .prepare_failures
            .lock()
            .unwrap()
            .push((pattern.to_string(), err));
    }

    pub(crate) fn set_last_insert_id(&self, id: i64) {
        *self.state.last_insert_id.lock().unwrap() = Some(id);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.state.events.lock().unwrap().clone()
    }

    pub(crate) fn executed_params(&self) -> Vec<Vec<QueryParam>> {
        self.state.params.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Direct
    }

    async fn acquire(&self, pool_name: &str) -> DbResult<Box<dyn Connection>> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(DbError::connection("connection refused", "Check the server"));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            pool_name: pool_name.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    fn release(&self, _connection: Box<dyn Connection>, broken: bool) {
        self.released.fetch_add(1, Ordering::SeqCst);
        if broken {
            self.broken.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_initialized(&self) -> bool {
        self.acquired() > 0
    }

    fn last_error(&self) -> Option<String> {
        None
    }

    fn database_type(&self, _pool_name: &str) -> DbResult<DatabaseType> {
        Ok(DatabaseType::SQLite)
    }

    fn stats(&self) -> ProviderStats {
        ProviderStats {
            acquired: self.acquired() as u64,
            released: self.released() as u64,
            checked_out: self.acquired().saturating_sub(self.released()),
        }
    }

    async fn shutdown(&self) {}
}

struct MockConnection {
    pool_name: String,
    state: Arc<MockState>,
}

impl MockConnection {
    fn control(&self, statement: &str) -> Result<(), DriverError> {
        self.state.log(statement.to_ascii_lowercase());
        match MockState::failure(&self.state.failures, statement) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn pool_name(&self) -> &str {
        &self.pool_name
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn prepare(&mut self, sql: &str) -> Result<(), DriverError> {
        self.state.log(format!("prepare {sql}"));
        match MockState::failure(&self.state.prepare_failures, sql) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<ExecOutcome, DriverError> {
        self.state.log(format!("execute {sql}"));
        self.state.params.lock().unwrap().push(params.to_vec());
        if let Some(err) = MockState::failure(&self.state.failures, sql) {
            return Err(err);
        }
        Ok(ExecOutcome {
            rows_affected: 1,
            last_insert_id: *self.state.last_insert_id.lock().unwrap(),
        })
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<Row>, DriverError> {
        self.state.log(format!("fetch {sql}"));
        self.state.params.lock().unwrap().push(params.to_vec());
        if let Some(err) = MockState::failure(&self.state.failures, sql) {
            return Err(err);
        }
        Ok(self.state.rows.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.control("BEGIN")
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.control("COMMIT")
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.control("ROLLBACK")
    }

    fn discard(self: Box<Self>) {}
}
