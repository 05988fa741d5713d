//! Named placeholder rewriting.
//!
//! Statements are written with `:name` placeholders. Before they reach the
//! driver they are rewritten to the dialect's positional form (`?` or `$n`)
//! and the name of each position is recorded so bindings can be ordered.

use crate::models::DatabaseType;

/// Kind of statement, taken from its first keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Transaction,
    Other,
}

impl StatementKind {
    /// Classify a statement by its first keyword.
    pub fn detect(sql: &str) -> Self {
        match first_keyword(sql).as_str() {
            "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "DESC" | "PRAGMA" | "VALUES" => {
                Self::Select
            }
            "INSERT" | "REPLACE" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" => Self::Ddl,
            "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" => {
                Self::Transaction
            }
            _ => Self::Other,
        }
    }
}

/// Upper-cased first keyword of a statement, skipping leading comments.
pub fn first_keyword(sql: &str) -> String {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix('(') {
            rest = after.trim_start();
        } else {
            break;
        }
    }
    rest.chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// A statement rewritten for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    /// SQL with positional placeholders.
    pub sql: String,
    /// Placeholder name for each position, in order. Names may repeat.
    pub positions: Vec<String>,
    pub kind: StatementKind,
    /// The statement produces a result set (read, or write with RETURNING).
    pub returns_rows: bool,
}

impl ParsedStatement {
    /// Distinct placeholder names in first-seen order.
    pub fn names(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for name in &self.positions {
            if !seen.contains(&name.as_str()) {
                seen.push(name);
            }
        }
        seen
    }

    pub fn has_placeholder(&self, name: &str) -> bool {
        self.positions.iter().any(|p| p == name)
    }
}

/// Rewrite `:name` placeholders into the positional style of `db`.
///
/// Quoted strings, quoted identifiers, comments and `::` casts are left
/// untouched. On PostgreSQL every occurrence gets its own `$n`.
pub fn parse(sql: &str, db: DatabaseType) -> ParsedStatement {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut positions = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                // Copy through to the matching quote; doubled quotes are escapes
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == '\\' && c == '\'' && i + 1 < chars.len() {
                        out.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if chars[i] == c {
                        if i + 1 < chars.len() && chars[i + 1] == c {
                            out.push(c);
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                out.push_str("/*");
                i += 2;
                while i < chars.len() {
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        out.push_str("*/");
                        i += 2;
                        break;
                    }
                    out.push(chars[i]);
                    i += 1;
                }
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                positions.push(name);
                if db.numbered_placeholders() {
                    out.push('$');
                    out.push_str(&positions.len().to_string());
                } else {
                    out.push('?');
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    let kind = StatementKind::detect(sql);
    let returns_rows = kind == StatementKind::Select || contains_keyword(&out, "RETURNING");

    ParsedStatement {
        sql: out,
        positions,
        kind,
        returns_rows,
    }
}

fn contains_keyword(sql: &str, keyword: &str) -> bool {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case(keyword))
}
