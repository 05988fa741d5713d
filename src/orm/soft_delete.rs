//! Soft deletion: flag and timestamp updates instead of DELETE.

use crate::error::DbResult;
use crate::models::QueryParam;
use crate::orm::builder::Statement;
use crate::orm::crud::KEY_PARAM;
use crate::orm::primary_key::PrimaryKey;
use crate::orm::record::{RecordSchema, SoftDeleteColumns};
use crate::orm::validator::{validate_column, validate_identifier};
use chrono::{SubsecRound, Utc};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SoftDeleteOperations {
    schema: Arc<RecordSchema>,
    columns: SoftDeleteColumns,
}

impl SoftDeleteOperations {
    pub fn new(schema: Arc<RecordSchema>, columns: SoftDeleteColumns) -> Self {
        Self { schema, columns }
    }

    pub fn columns(&self) -> &SoftDeleteColumns {
        &self.columns
    }

    /// Flag false, timestamp now.
    pub fn safe_delete(&self, key: &PrimaryKey, key_value: QueryParam) -> DbResult<Statement> {
        self.validate()?;
        let now = Utc::now().naive_utc().trunc_subsecs(0);
        self.statement(
            format!(
                "{} = :flag, {} = :deleted_at",
                self.columns.flag, self.columns.timestamp
            ),
            key,
        )
        .map(|s| {
            s.bind("flag", false)
                .bind("deleted_at", now)
                .bind(KEY_PARAM, key_value)
        })
    }

    /// Flag true, timestamp cleared.
    pub fn restore(&self, key: &PrimaryKey, key_value: QueryParam) -> DbResult<Statement> {
        self.validate()?;
        self.statement(
            format!("{} = :flag, {} = NULL", self.columns.flag, self.columns.timestamp),
            key,
        )
        .map(|s| s.bind("flag", true).bind(KEY_PARAM, key_value))
    }

    pub fn activate(&self, key: &PrimaryKey, key_value: QueryParam) -> DbResult<Statement> {
        self.set_flag(true, key, key_value)
    }

    pub fn deactivate(&self, key: &PrimaryKey, key_value: QueryParam) -> DbResult<Statement> {
        self.set_flag(false, key, key_value)
    }

    /// Both configured columns must be declared on the record.
    pub fn validate(&self) -> DbResult<()> {
        validate_column(&self.schema, self.columns.flag)?;
        validate_column(&self.schema, self.columns.timestamp)
    }

    fn set_flag(&self, flag: bool, key: &PrimaryKey, key_value: QueryParam) -> DbResult<Statement> {
        validate_column(&self.schema, self.columns.flag)?;
        self.statement(format!("{} = :flag", self.columns.flag), key)
            .map(|s| s.bind("flag", flag).bind(KEY_PARAM, key_value))
    }

    fn statement(&self, assignments: String, key: &PrimaryKey) -> DbResult<Statement> {
        let table = self.schema.table();
        validate_identifier(table)?;
        validate_identifier(&key.column)?;
        Ok(Statement::new(format!(
            "UPDATE {} SET {} WHERE {} = :{}",
            table, assignments, key.column, KEY_PARAM
        )))
    }
}
