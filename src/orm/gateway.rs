//! Per-record-type data access.
//!
//! [`RecordGateway`] composes the query builder, the CRUD and soft-delete
//! statement builders, the primary-key strategy and pagination around one
//! lazily created [`QueryExecutor`].
//!
//! # Example
//!
//! ```ignore
//! let mut users = RecordGateway::<User>::new(manager);
//! let page = users
//!     .select(&["id", "email"])
//!     .where_equal("country", "NL")
//!     .page(2, 25)
//!     .run()
//!     .await?;
//! println!("{} of {}", page.len(), users.total_count());
//! ```

use crate::db::executor::QueryExecutor;
use crate::db::manager::ConnectionManager;
use crate::db::types::Row;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use crate::orm::builder::{QueryBuilder, Statement};
use crate::orm::caster::cast_row;
use crate::orm::crud::CrudOperations;
use crate::orm::pagination::PaginationState;
use crate::orm::primary_key::{KeyKind, PrimaryKey, PrimaryKeyStrategy};
use crate::orm::record::{Record, RecordSchema};
use crate::orm::soft_delete::SoftDeleteOperations;
use serde_json::{Map, Value as JsonValue};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

pub struct RecordGateway<R: Record> {
    manager: ConnectionManager,
    schema: Arc<RecordSchema>,
    builder: QueryBuilder,
    crud: CrudOperations,
    soft_delete: SoftDeleteOperations,
    keys: PrimaryKeyStrategy,
    pagination: PaginationState,
    executor: Option<QueryExecutor>,
    last_error: Option<String>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordGateway<R> {
    pub fn new(manager: ConnectionManager) -> Self {
        let schema = RecordSchema::of::<R>();
        Self {
            manager,
            builder: QueryBuilder::new(schema.table()),
            crud: CrudOperations::new(Arc::clone(&schema)),
            soft_delete: SoftDeleteOperations::new(Arc::clone(&schema), R::soft_delete()),
            schema,
            keys: PrimaryKeyStrategy::default(),
            pagination: PaginationState::default(),
            executor: None,
            last_error: None,
            _record: PhantomData,
        }
    }

    // =========================================================================
    // Builder
    // =========================================================================

    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        self.builder.select(columns);
        self
    }

    pub fn join(&mut self, table: &str, left: &str, right: &str) -> &mut Self {
        self.builder.join(table, left, right);
        self
    }

    pub fn left_join(&mut self, table: &str, left: &str, right: &str) -> &mut Self {
        self.builder.left_join(table, left, right);
        self
    }

    pub fn where_equal(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.builder.where_equal(column, value);
        self
    }

    pub fn where_not_equal(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.builder.where_not_equal(column, value);
        self
    }

    pub fn where_greater(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.builder.where_greater(column, value);
        self
    }

    pub fn where_greater_or_equal(
        &mut self,
        column: &str,
        value: impl Into<QueryParam>,
    ) -> &mut Self {
        self.builder.where_greater_or_equal(column, value);
        self
    }

    pub fn where_less(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.builder.where_less(column, value);
        self
    }

    pub fn where_less_or_equal(
        &mut self,
        column: &str,
        value: impl Into<QueryParam>,
    ) -> &mut Self {
        self.builder.where_less_or_equal(column, value);
        self
    }

    pub fn where_like(&mut self, column: &str, pattern: &str) -> &mut Self {
        self.builder.where_like(column, pattern);
        self
    }

    pub fn where_like_prefix(&mut self, column: &str, value: &str) -> &mut Self {
        self.builder.where_like_prefix(column, value);
        self
    }

    pub fn where_like_suffix(&mut self, column: &str, value: &str) -> &mut Self {
        self.builder.where_like_suffix(column, value);
        self
    }

    pub fn where_contains(&mut self, column: &str, value: &str) -> &mut Self {
        self.builder.where_contains(column, value);
        self
    }

    pub fn where_between(
        &mut self,
        column: &str,
        low: impl Into<QueryParam>,
        high: impl Into<QueryParam>,
    ) -> &mut Self {
        self.builder.where_between(column, low, high);
        self
    }

    pub fn where_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        self.builder.where_in(column, values);
        self
    }

    pub fn where_null(&mut self, column: &str) -> &mut Self {
        self.builder.where_null(column);
        self
    }

    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        self.builder.where_not_null(column);
        self
    }

    pub fn where_or(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.builder.where_or(column, value);
        self
    }

    /// Only rows that are not soft-deleted.
    pub fn where_active(&mut self) -> &mut Self {
        let column = self.soft_delete.columns().timestamp;
        self.builder.where_null(column);
        self
    }

    pub fn order_by(&mut self, column: &str, direction: &str) -> &mut Self {
        self.builder.order_by(column, direction);
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.builder.limit(limit);
        self
    }

    pub fn page(&mut self, page: u64, per_page: u64) -> &mut Self {
        self.builder.page(page, per_page);
        self
    }

    pub fn no_limit(&mut self) -> &mut Self {
        self.builder.no_limit();
        self
    }

    pub fn skip_count(&mut self) -> &mut Self {
        self.builder.skip_count();
        self
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Run the built query and hydrate the records.
    ///
    /// Builder state is reset afterwards, whatever the outcome.
    pub async fn run(&mut self) -> DbResult<Vec<R>> {
        let result = self.run_built().await;
        self.builder.reset();
        self.track(result)
    }

    async fn run_built(&mut self) -> DbResult<Vec<R>> {
        let statement = self.builder.build_select()?;
        let rows = self.fetch(&statement).await?;
        let count = rows.len() as u64;
        let records = rows
            .into_iter()
            .map(|row| self.hydrate(row))
            .collect::<DbResult<Vec<R>>>()?;

        if !self.builder.skips_count() {
            self.pagination
                .set_window(self.builder.limit_value(), self.builder.offset_value());
            // Short pages are trusted without a COUNT; see PaginationState::needs_count
            let total = if self.pagination.needs_count(count) {
                let count_statement = self.builder.build_count()?;
                self.count(&count_statement).await?
            } else {
                self.pagination.implied_total(count)
            };
            self.pagination.update(total);
        }

        debug!(table = %self.schema.table(), rows = count, "Query returned records");
        Ok(records)
    }

    /// The record with the given key, or [`DbError::NotFound`].
    pub async fn select_by_id(&mut self, id: impl Into<QueryParam>) -> DbResult<R> {
        let result = self.select_by_id_inner(id.into()).await;
        self.track(result)
    }

    async fn select_by_id_inner(&mut self, id: QueryParam) -> DbResult<R> {
        let key = self.resolved_key().clone();
        let key_value = key.param(&id)?;
        let statement = self.crud.select_by_key(&key, key_value)?;
        let rows = self.fetch(&statement).await?;
        match rows.into_iter().next() {
            Some(row) => self.hydrate(row),
            None => Err(DbError::not_found(format!(
                "No {} record with {} = {}",
                self.schema.table(),
                key.column,
                id.render()
            ))),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert the record and return its key value.
    ///
    /// A generated UUID key or an auto-increment integer key is written back
    /// into the record.
    pub async fn insert_single_query(&mut self, record: &mut R) -> DbResult<JsonValue> {
        let result = self.insert_inner(record).await;
        self.track(result)
    }

    async fn insert_inner(&mut self, record: &mut R) -> DbResult<JsonValue> {
        let key = self.resolved_key().clone();
        let mut values = to_values(record)?;
        let generated = key.ensure_generated(&mut values);

        let db_type = self.database_type()?;
        let statement = self.crud.insert(&values, &key, db_type)?;
        self.execute(&statement).await?;

        let mut changed = generated;
        if key.kind == KeyKind::Int && key.value_in(&values).is_none() {
            if let Some(id) = self.executor_mut().last_insert_id() {
                values.insert(key.column.clone(), JsonValue::from(id));
                changed = true;
            }
        }
        if changed {
            *record = from_values(values.clone(), self.schema.table())?;
        }

        Ok(values.get(&key.column).cloned().unwrap_or(JsonValue::Null))
    }

    /// Update every non-key field of the record by its key.
    pub async fn update_single_query(&mut self, record: &R) -> DbResult<u64> {
        let result = self.update_inner(record, None).await;
        self.track(result)
    }

    /// Update only the named fields of the record by its key.
    pub async fn update_fields(&mut self, record: &R, fields: &[&str]) -> DbResult<u64> {
        let result = self.update_inner(record, Some(fields)).await;
        self.track(result)
    }

    async fn update_inner(&mut self, record: &R, fields: Option<&[&str]>) -> DbResult<u64> {
        let key = self.resolved_key().clone();
        let values = to_values(record)?;
        let key_value = record_key(&key, &values)?;
        let statement = match fields {
            Some(fields) => self.crud.update_fields(&values, fields, &key, key_value)?,
            None => self.crud.update(&values, &key, key_value)?,
        };
        self.execute(&statement).await
    }

    /// Delete by key. Returns the affected row count; 0 is not an error.
    pub async fn delete_by_id_query(&mut self, id: impl Into<QueryParam>) -> DbResult<u64> {
        let result = self.delete_inner(id.into()).await;
        self.track(result)
    }

    /// Delete the row backing `record`.
    pub async fn delete_single_query(&mut self, record: &R) -> DbResult<u64> {
        let key = self.resolved_key().clone();
        let id = to_values(record).and_then(|values| record_key(&key, &values));
        let result = match id {
            Ok(id) => self.delete_inner(id).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    async fn delete_inner(&mut self, id: QueryParam) -> DbResult<u64> {
        let key = self.resolved_key().clone();
        let key_value = key.param(&id)?;
        let statement = self.crud.delete_by_key(&key, key_value)?;
        self.execute(&statement).await
    }

    /// Delete every row matching all `(column, value)` pairs.
    pub async fn remove_conditional_query(
        &mut self,
        conditions: &[(&str, QueryParam)],
    ) -> DbResult<u64> {
        let result = match self.crud.delete_where(conditions) {
            Ok(statement) => self.execute(&statement).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    // =========================================================================
    // Soft delete
    // =========================================================================

    pub async fn safe_delete_query(&mut self, id: impl Into<QueryParam>) -> DbResult<u64> {
        let result = self.soft_update(id.into(), SoftDeleteOperations::safe_delete).await;
        self.track(result)
    }

    pub async fn restore_query(&mut self, id: impl Into<QueryParam>) -> DbResult<u64> {
        let result = self.soft_update(id.into(), SoftDeleteOperations::restore).await;
        self.track(result)
    }

    pub async fn activate_query(&mut self, id: impl Into<QueryParam>) -> DbResult<u64> {
        let result = self.soft_update(id.into(), SoftDeleteOperations::activate).await;
        self.track(result)
    }

    pub async fn deactivate_query(&mut self, id: impl Into<QueryParam>) -> DbResult<u64> {
        let result = self.soft_update(id.into(), SoftDeleteOperations::deactivate).await;
        self.track(result)
    }

    async fn soft_update(
        &mut self,
        id: QueryParam,
        build: fn(&SoftDeleteOperations, &PrimaryKey, QueryParam) -> DbResult<Statement>,
    ) -> DbResult<u64> {
        let key = self.resolved_key().clone();
        let key_value = key.param(&id)?;
        let statement = build(&self.soft_delete, &key, key_value)?;
        self.execute(&statement).await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        let result = self.executor_mut().begin_transaction().await;
        self.track(result)
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        let result = self.executor_mut().commit().await;
        self.track(result)
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        let result = self.executor_mut().rollback().await;
        self.track(result)
    }

    pub fn in_transaction(&self) -> bool {
        self.executor.as_ref().is_some_and(QueryExecutor::in_transaction)
    }

    /// Roll back any open transaction and release the connection.
    pub async fn close(&mut self) {
        if let Some(executor) = self.executor.as_mut() {
            executor.close().await;
        }
        self.builder.reset();
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Message of the last failed operation.
    pub fn error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pagination(&self) -> &PaginationState {
        &self.pagination
    }

    pub fn total_count(&self) -> u64 {
        self.pagination.total_count()
    }

    pub fn page_count(&self) -> u64 {
        self.pagination.page_count()
    }

    pub fn current_page(&self) -> u64 {
        self.pagination.current_page()
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Use `column` of the given kind (`int`, `integer`, `string`, `uuid`) as
    /// the key.
    pub fn set_primary_key(&mut self, column: &str, kind: &str) -> DbResult<()> {
        let key = PrimaryKey::parse(column, kind)?;
        self.keys.configure(key);
        Ok(())
    }

    pub fn primary_key(&mut self) -> &PrimaryKey {
        self.resolved_key()
    }

    /// Key value of `record`, generating a UUID key first when needed.
    ///
    /// A generated value is written into the record, so repeated calls
    /// return the same key.
    pub fn primary_key_value(&mut self, record: &mut R) -> DbResult<JsonValue> {
        let key = self.resolved_key().clone();
        let mut values = to_values(record)?;
        if key.ensure_generated(&mut values) {
            *record = from_values(values.clone(), self.schema.table())?;
        }
        Ok(values.get(&key.column).cloned().unwrap_or(JsonValue::Null))
    }

    pub fn database_type(&self) -> DbResult<DatabaseType> {
        match &self.executor {
            Some(executor) => executor.database_type(),
            None => self.manager.database_type(),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn resolved_key(&mut self) -> &PrimaryKey {
        self.keys.resolve(&self.schema, R::primary_key())
    }

    fn executor_mut(&mut self) -> &mut QueryExecutor {
        self.executor.get_or_insert_with(|| self.manager.executor())
    }

    async fn fetch(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        let executor = self.executor_mut();
        executor.run(&statement.sql, &statement.params).await?;
        executor.fetch_all()
    }

    async fn count(&mut self, statement: &Statement) -> DbResult<u64> {
        let executor = self.executor_mut();
        executor.run(&statement.sql, &statement.params).await?;
        let value = executor.fetch_scalar()?;
        Ok(value
            .as_ref()
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0))
    }

    async fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
        self.executor_mut()
            .run(&statement.sql, &statement.params)
            .await
    }

    fn hydrate(&self, row: Row) -> DbResult<R> {
        let mut values = to_values(&R::default())?;
        values.extend(cast_row(row, &self.schema));
        from_values(values, self.schema.table())
    }

    fn track<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => self.last_error = Some(e.to_string()),
        }
        result
    }
}

impl<R: Record> std::fmt::Debug for RecordGateway<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordGateway")
            .field("table", &self.schema.table())
            .field("manager", &self.manager)
            .field("pagination", &self.pagination)
            .field("last_error", &self.last_error)
            .finish()
    }
}

fn to_values<R: Record>(record: &R) -> DbResult<Map<String, JsonValue>> {
    match serde_json::to_value(record) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(DbError::internal(format!(
            "{} does not serialize to an object",
            R::table_name()
        ))),
        Err(e) => Err(DbError::internal(format!(
            "Failed to serialize {} record: {}",
            R::table_name(),
            e
        ))),
    }
}

fn from_values<R: Record>(values: Map<String, JsonValue>, table: &str) -> DbResult<R> {
    serde_json::from_value(JsonValue::Object(values))
        .map_err(|e| DbError::internal(format!("Failed to map row to {} record: {}", table, e)))
}

/// Key value held by a serialized record, as a bind parameter.
fn record_key(key: &PrimaryKey, values: &Map<String, JsonValue>) -> DbResult<QueryParam> {
    let value = values.get(&key.column).unwrap_or(&JsonValue::Null);
    key.param(&QueryParam::from_json(value))
}
