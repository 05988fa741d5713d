//! Write statements for one record type.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use crate::orm::builder::Statement;
use crate::orm::caster::to_param;
use crate::orm::primary_key::{KeyKind, PrimaryKey, is_empty_key};
use crate::orm::record::RecordSchema;
use crate::orm::validator::{validate_field, validate_fields, validate_identifier};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// Named parameter holding the key in WHERE clauses.
pub(crate) const KEY_PARAM: &str = "key";

/// Builds INSERT, UPDATE and DELETE statements from serialized records.
///
/// Field values bind as `:f_<field>` so they can never collide with the key
/// parameter.
#[derive(Debug, Clone)]
pub struct CrudOperations {
    schema: Arc<RecordSchema>,
}

impl CrudOperations {
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// INSERT of every persisted, non-null field.
    ///
    /// An empty integer key is left to auto-increment. PostgreSQL reports the
    /// key back through `RETURNING`.
    pub fn insert(
        &self,
        values: &Map<String, JsonValue>,
        key: &PrimaryKey,
        db_type: DatabaseType,
    ) -> DbResult<Statement> {
        let table = self.table()?;
        let mut columns = Vec::new();
        let mut statement = Statement::new(String::new());

        for field in self.schema.persisted() {
            let Some(value) = values.get(field.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if field.name == key.column && key.kind == KeyKind::Int && is_empty_key(value) {
                continue;
            }
            validate_identifier(field.name)?;
            columns.push(field.name);
            statement = statement.bind(&field_param(field.name), to_param(value, field.field_type));
        }

        let mut sql = if columns.is_empty() {
            match db_type {
                DatabaseType::MySQL => format!("INSERT INTO {} () VALUES ()", table),
                _ => format!("INSERT INTO {} DEFAULT VALUES", table),
            }
        } else {
            let placeholders: Vec<String> = columns
                .iter()
                .map(|c| format!(":{}", field_param(c)))
                .collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        if db_type.uses_returning_for_insert_id() {
            validate_identifier(&key.column)?;
            sql.push_str(&format!(" RETURNING {}", key.column));
        }

        statement.sql = sql;
        Ok(statement)
    }

    /// UPDATE of every persisted field except the key.
    pub fn update(
        &self,
        values: &Map<String, JsonValue>,
        key: &PrimaryKey,
        key_value: QueryParam,
    ) -> DbResult<Statement> {
        let fields: Vec<&str> = self
            .schema
            .persisted()
            .map(|f| f.name)
            .filter(|name| *name != key.column)
            .collect();
        self.update_named(values, &fields, key, key_value)
    }

    /// UPDATE of the named fields only.
    pub fn update_fields(
        &self,
        values: &Map<String, JsonValue>,
        fields: &[&str],
        key: &PrimaryKey,
        key_value: QueryParam,
    ) -> DbResult<Statement> {
        if fields.is_empty() {
            return Err(DbError::usage("No fields given to update"));
        }
        validate_fields(&self.schema, fields.iter().copied())?;
        if fields.contains(&key.column.as_str()) {
            return Err(DbError::usage(format!(
                "Primary key '{}' cannot be updated",
                key.column
            )));
        }
        self.update_named(values, fields, key, key_value)
    }

    pub fn delete_by_key(&self, key: &PrimaryKey, key_value: QueryParam) -> DbResult<Statement> {
        let table = self.table()?;
        validate_identifier(&key.column)?;
        Ok(Statement::new(format!(
            "DELETE FROM {} WHERE {} = :{}",
            table, key.column, KEY_PARAM
        ))
        .bind(KEY_PARAM, key_value))
    }

    /// DELETE matching every `(column, value)` pair. NULL values match
    /// `IS NULL`. At least one condition is required.
    pub fn delete_where(&self, conditions: &[(&str, QueryParam)]) -> DbResult<Statement> {
        let table = self.table()?;
        if conditions.is_empty() {
            return Err(DbError::usage(
                "Refusing to delete without conditions",
            ));
        }

        let mut statement = Statement::new(String::new());
        let mut clauses = Vec::with_capacity(conditions.len());
        for (i, (column, value)) in conditions.iter().enumerate() {
            validate_identifier(column)?;
            validate_field(&self.schema, column)?;
            if value.is_null() {
                clauses.push(format!("{} IS NULL", column));
            } else {
                let name = format!("c{}", i + 1);
                clauses.push(format!("{} = :{}", column, name));
                statement = statement.bind(&name, value.clone());
            }
        }
        statement.sql = format!("DELETE FROM {} WHERE {}", table, clauses.join(" AND "));
        Ok(statement)
    }

    /// One-row SELECT by key.
    pub fn select_by_key(&self, key: &PrimaryKey, key_value: QueryParam) -> DbResult<Statement> {
        let table = self.table()?;
        validate_identifier(&key.column)?;
        Ok(Statement::new(format!(
            "SELECT * FROM {} WHERE {} = :{} LIMIT 1",
            table, key.column, KEY_PARAM
        ))
        .bind(KEY_PARAM, key_value))
    }

    fn update_named(
        &self,
        values: &Map<String, JsonValue>,
        fields: &[&str],
        key: &PrimaryKey,
        key_value: QueryParam,
    ) -> DbResult<Statement> {
        let table = self.table()?;
        validate_identifier(&key.column)?;
        if fields.is_empty() {
            return Err(DbError::usage(format!("{} has no fields to update", table)));
        }

        let mut statement = Statement::new(String::new());
        let mut assignments = Vec::with_capacity(fields.len());
        for name in fields {
            let field_type = self
                .schema
                .field(name)
                .map(|f| f.field_type)
                .ok_or_else(|| DbError::usage(format!("Unknown field '{}' on {}", name, table)))?;
            let value = values.get(*name).unwrap_or(&JsonValue::Null);
            let param = field_param(name);
            assignments.push(format!("{} = :{}", name, param));
            statement = statement.bind(&param, to_param(value, field_type));
        }

        statement.sql = format!(
            "UPDATE {} SET {} WHERE {} = :{}",
            table,
            assignments.join(", "),
            key.column,
            KEY_PARAM
        );
        Ok(statement.bind(KEY_PARAM, key_value))
    }

    fn table(&self) -> DbResult<&'static str> {
        let table = self.schema.table();
        validate_identifier(table)?;
        Ok(table)
    }
}

pub(crate) fn field_param(field: &str) -> String {
    format!("f_{}", field)
}
