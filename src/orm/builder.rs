//! Fluent SELECT construction.
//!
//! The builder never touches a connection. Values go into numbered named
//! parameters (`:p1`, `:p2`, ...), and the window into `:limit` and
//! `:offset`, so nothing caller-supplied is ever spliced into SQL text.
//! Identifiers are checked as they are added; the first invalid one is
//! remembered and reported when the statement is built.

use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use crate::orm::pagination::{DEFAULT_LIMIT, page_offset};
use crate::orm::validator::is_safe_identifier;

/// SQL plus its named bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<(String, QueryParam)>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn bind(mut self, name: &str, value: impl Into<QueryParam>) -> Self {
        self.params.push((name.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    columns: Option<Vec<String>>,
    joins: Vec<String>,
    conditions: Vec<(Connector, String)>,
    order: Vec<String>,
    params: Vec<(String, QueryParam)>,
    next_param: usize,
    limit: Option<u64>,
    offset: u64,
    skip_count: bool,
    error: Option<String>,
}

impl QueryBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            joins: Vec::new(),
            conditions: Vec::new(),
            order: Vec::new(),
            params: Vec::new(),
            next_param: 0,
            limit: Some(DEFAULT_LIMIT),
            offset: 0,
            skip_count: false,
            error: None,
        }
    }

    /// Forget everything but the table.
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.table));
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> u64 {
        self.offset
    }

    pub fn skips_count(&self) -> bool {
        self.skip_count
    }

    pub fn is_selecting(&self) -> bool {
        self.columns.is_some()
    }

    /// Columns to read. An empty list reads `*`.
    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        let mut selected = Vec::with_capacity(columns.len());
        for column in columns {
            if self.check(column) {
                selected.push(column.to_string());
            }
        }
        self.columns = Some(selected);
        self
    }

    pub fn join(&mut self, table: &str, left: &str, right: &str) -> &mut Self {
        self.add_join("JOIN", table, left, right)
    }

    pub fn left_join(&mut self, table: &str, left: &str, right: &str) -> &mut Self {
        self.add_join("LEFT JOIN", table, left, right)
    }

    pub fn where_equal(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.compare(Connector::And, column, "=", value.into())
    }

    pub fn where_not_equal(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.compare(Connector::And, column, "!=", value.into())
    }

    pub fn where_greater(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.compare(Connector::And, column, ">", value.into())
    }

    pub fn where_greater_or_equal(
        &mut self,
        column: &str,
        value: impl Into<QueryParam>,
    ) -> &mut Self {
        self.compare(Connector::And, column, ">=", value.into())
    }

    pub fn where_less(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.compare(Connector::And, column, "<", value.into())
    }

    pub fn where_less_or_equal(
        &mut self,
        column: &str,
        value: impl Into<QueryParam>,
    ) -> &mut Self {
        self.compare(Connector::And, column, "<=", value.into())
    }

    /// `column LIKE value`, the pattern used as given.
    pub fn where_like(&mut self, column: &str, pattern: &str) -> &mut Self {
        self.compare(Connector::And, column, "LIKE", pattern.into())
    }

    /// `column LIKE 'value%'`.
    pub fn where_like_prefix(&mut self, column: &str, value: &str) -> &mut Self {
        self.compare(Connector::And, column, "LIKE", format!("{}%", value).into())
    }

    /// `column LIKE '%value'`.
    pub fn where_like_suffix(&mut self, column: &str, value: &str) -> &mut Self {
        self.compare(Connector::And, column, "LIKE", format!("%{}", value).into())
    }

    /// `column LIKE '%value%'`.
    pub fn where_contains(&mut self, column: &str, value: &str) -> &mut Self {
        self.compare(Connector::And, column, "LIKE", format!("%{}%", value).into())
    }

    pub fn where_between(
        &mut self,
        column: &str,
        low: impl Into<QueryParam>,
        high: impl Into<QueryParam>,
    ) -> &mut Self {
        if !self.check(column) {
            return self;
        }
        let low = self.param(low.into());
        let high = self.param(high.into());
        self.push(
            Connector::And,
            format!("{} BETWEEN :{} AND :{}", column, low, high),
        )
    }

    /// `column IN (...)`. An empty list matches nothing.
    pub fn where_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        if !self.check(column) {
            return self;
        }
        let names: Vec<String> = values
            .into_iter()
            .map(|value| format!(":{}", self.param(value.into())))
            .collect();
        if names.is_empty() {
            return self.push(Connector::And, "1 = 0".to_string());
        }
        self.push(
            Connector::And,
            format!("{} IN ({})", column, names.join(", ")),
        )
    }

    pub fn where_null(&mut self, column: &str) -> &mut Self {
        if !self.check(column) {
            return self;
        }
        self.push(Connector::And, format!("{} IS NULL", column))
    }

    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        if !self.check(column) {
            return self;
        }
        self.push(Connector::And, format!("{} IS NOT NULL", column))
    }

    /// `OR column = value`. As the first condition it opens the WHERE clause.
    pub fn where_or(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        self.compare(Connector::Or, column, "=", value.into())
    }

    pub fn order_by(&mut self, column: &str, direction: &str) -> &mut Self {
        let direction = direction.trim().to_ascii_uppercase();
        if direction != "ASC" && direction != "DESC" {
            self.remember(format!(
                "Invalid sort direction '{}'. Use ASC or DESC",
                direction
            ));
            return self;
        }
        if self.check(column) {
            self.order.push(format!("{} {}", column, direction));
        }
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    /// Read the given 1-based page of `per_page` rows.
    pub fn page(&mut self, page: u64, per_page: u64) -> &mut Self {
        self.limit = Some(per_page);
        self.offset = page_offset(page, per_page);
        self
    }

    /// Read every matching row.
    pub fn no_limit(&mut self) -> &mut Self {
        self.limit = None;
        self.offset = 0;
        self
    }

    /// Do not compute the total count on the next run.
    pub fn skip_count(&mut self) -> &mut Self {
        self.skip_count = true;
        self
    }

    /// The SELECT statement. Fails when `select()` was not called or an
    /// invalid identifier was given.
    pub fn build_select(&self) -> DbResult<Statement> {
        self.check_ready()?;
        let columns = match &self.columns {
            Some(columns) if !columns.is_empty() => columns.join(", "),
            _ => "*".to_string(),
        };

        let mut sql = format!("SELECT {} FROM {}", columns, self.table);
        self.push_body(&mut sql);
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }

        let mut params = self.params.clone();
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT :limit OFFSET :offset");
            params.push(("limit".to_string(), QueryParam::from(limit)));
            params.push(("offset".to_string(), QueryParam::from(self.offset)));
        }
        Ok(Statement { sql, params })
    }

    /// `COUNT(*)` over the same joins and conditions, without the window.
    pub fn build_count(&self) -> DbResult<Statement> {
        self.check_ready()?;
        let mut sql = format!("SELECT COUNT(*) AS total FROM {}", self.table);
        self.push_body(&mut sql);
        Ok(Statement {
            sql,
            params: self.params.clone(),
        })
    }

    fn check_ready(&self) -> DbResult<()> {
        if let Some(message) = &self.error {
            return Err(DbError::usage(message.clone()));
        }
        if self.columns.is_none() {
            return Err(DbError::usage(
                "select() must be called before run()",
            ));
        }
        if !is_safe_identifier(&self.table) {
            return Err(DbError::usage(format!("Invalid identifier '{}'", self.table)));
        }
        Ok(())
    }

    fn push_body(&self, sql: &mut String) {
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        for (i, (connector, condition)) in self.conditions.iter().enumerate() {
            let keyword = match (i, connector) {
                (0, _) => " WHERE ",
                (_, Connector::And) => " AND ",
                (_, Connector::Or) => " OR ",
            };
            sql.push_str(keyword);
            sql.push_str(condition);
        }
    }

    fn add_join(&mut self, kind: &str, table: &str, left: &str, right: &str) -> &mut Self {
        if self.check(table) && self.check(left) && self.check(right) {
            self.joins
                .push(format!("{} {} ON {} = {}", kind, table, left, right));
        }
        self
    }

    fn compare(
        &mut self,
        connector: Connector,
        column: &str,
        operator: &str,
        value: QueryParam,
    ) -> &mut Self {
        if !self.check(column) {
            return self;
        }
        let name = self.param(value);
        self.push(connector, format!("{} {} :{}", column, operator, name))
    }

    fn push(&mut self, connector: Connector, condition: String) -> &mut Self {
        self.conditions.push((connector, condition));
        self
    }

    fn param(&mut self, value: QueryParam) -> String {
        self.next_param += 1;
        let name = format!("p{}", self.next_param);
        self.params.push((name.clone(), value));
        name
    }

    fn check(&mut self, identifier: &str) -> bool {
        if is_safe_identifier(identifier) {
            true
        } else {
            self.remember(format!("Invalid identifier '{}'", identifier));
            false
        }
    }

    fn remember(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> QueryBuilder {
        QueryBuilder::new("users")
    }

    #[test]
    fn test_select_requires_select_call() {
        let err = users().build_select().unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_full_statement_shape() {
        let mut b = users();
        b.select(&["u.id", "u.email"])
            .left_join("orders o", "o.user_id", "u.id");
        let stmt = b.build_select();
        // Join table with alias is not a single identifier
        assert!(stmt.is_err());

        let mut b = QueryBuilder::new("users");
        b.select(&["users.id", "orders.total"])
            .join("orders", "orders.user_id", "users.id")
            .where_equal("users.name", "x")
            .where_greater("orders.total", 10)
            .where_or("users.role", "admin")
            .order_by("users.id", "desc")
            .limit(5);
        let stmt = b.build_select().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT users.id, orders.total FROM users JOIN orders ON orders.user_id = users.id \
             WHERE users.name = :p1 AND orders.total > :p2 OR users.role = :p3 \
             ORDER BY users.id DESC LIMIT :limit OFFSET :offset"
        );
        assert_eq!(stmt.params.len(), 5);
        assert_eq!(stmt.params[3], ("limit".to_string(), QueryParam::Int(5)));
    }

    #[test]
    fn test_values_are_never_interpolated() {
        let hostile = "x' OR '1'='1";
        let mut b = users();
        b.select(&[])
            .where_equal("name", hostile)
            .where_contains("bio", hostile)
            .where_in("role", ["a", hostile])
            .where_between("age", 1, 2);
        let stmt = b.build_select().unwrap();
        assert!(!stmt.sql.contains(hostile));
        assert!(!stmt.sql.contains('\''));
        assert!(stmt.sql.starts_with("SELECT * FROM users WHERE name = :p1"));
        assert!(stmt.sql.contains("role IN (:p3, :p4)"));
        assert!(stmt.sql.contains("age BETWEEN :p5 AND :p6"));
        assert_eq!(stmt.params[1].1, QueryParam::String(format!("%{}%", hostile)));
    }

    #[test]
    fn test_parameter_names_are_unique() {
        let mut b = users();
        b.select(&[])
            .where_equal("a", 1)
            .where_equal("a", 2)
            .where_in("b", [3, 4]);
        let stmt = b.build_select().unwrap();
        let mut names: Vec<&str> = stmt.params.iter().map(|(n, _)| n.as_str()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_invalid_identifiers_are_reported() {
        let mut b = users();
        b.select(&["id"])
            .where_equal("name; DROP TABLE users", 1)
            .where_equal("ok", 2);
        let err = b.build_select().unwrap_err();
        assert!(err.to_string().contains("name; DROP TABLE users"));

        let mut b = users();
        b.select(&[]).order_by("id", "sideways");
        assert!(b.build_select().is_err());
    }

    #[test]
    fn test_window_variants() {
        let mut b = users();
        b.select(&[]).page(3, 20);
        let stmt = b.build_select().unwrap();
        assert!(stmt.params.contains(&("offset".to_string(), QueryParam::Int(40))));

        b.no_limit();
        let stmt = b.build_select().unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM users");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_like_helpers_and_nulls() {
        let mut b = users();
        b.select(&[])
            .where_like_prefix("name", "jo")
            .where_like_suffix("mail", ".org")
            .where_null("deleted_at")
            .where_not_null("email")
            .where_in("id", Vec::<i64>::new());
        let stmt = b.build_select().unwrap();
        assert!(stmt.sql.contains("deleted_at IS NULL AND email IS NOT NULL AND 1 = 0"));
        assert_eq!(stmt.params[0].1, QueryParam::from("jo%"));
        assert_eq!(stmt.params[1].1, QueryParam::from("%.org"));
    }

    #[test]
    fn test_count_drops_window_and_order() {
        let mut b = users();
        b.select(&["id"]).where_equal("active", true).order_by("id", "asc");
        let count = b.build_count().unwrap();
        assert_eq!(count.sql, "SELECT COUNT(*) AS total FROM users WHERE active = :p1");
        assert_eq!(count.params.len(), 1);
    }

    #[test]
    fn test_reset_keeps_table() {
        let mut b = users();
        b.select(&["id"]).where_equal("a", 1).skip_count();
        b.reset();
        assert_eq!(b.table(), "users");
        assert!(!b.is_selecting());
        assert!(!b.skips_count());
        assert_eq!(b.limit_value(), Some(DEFAULT_LIMIT));
    }
}
