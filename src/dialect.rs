//! SQL dialect details.
//!
//! The compiler emits SQL with named parameters (`:c_r0_0`). Only when the
//! statement is about to run are the names rewritten into the backend's
//! positional placeholders, in order of appearance.

use crate::engine::SqlValue;
use crate::error::{QueryError, QueryResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Pick a dialect from a connection URL.
    pub fn from_url(url: &str) -> QueryResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else {
            Err(QueryError::Connection(format!(
                "Unsupported database URL scheme: '{}'",
                url.split(':').next().unwrap_or(url)
            )))
        }
    }

    /// Quote an identifier. Callers validate identifiers up front.
    pub fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Quote a column, qualified by a table alias when one is given.
    pub fn column(&self, prefix: &str, column: &str) -> String {
        if prefix.is_empty() {
            self.quote_identifier(column)
        } else {
            format!(
                "{}.{}",
                self.quote_identifier(prefix),
                self.quote_identifier(column)
            )
        }
    }

    /// Positional placeholder for the n-th (1-based) parameter.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Case-insensitive pattern match keyword.
    ///
    /// SQLite's LIKE is already case-insensitive for ASCII.
    pub fn ilike(&self) -> &'static str {
        match self {
            Dialect::Postgres => "ILIKE",
            Dialect::Sqlite => "LIKE",
        }
    }

    /// Text form a timestamp is bound as.
    ///
    /// SQLite stores timestamps as text, so the format must sort
    /// lexically in the same order as the instants it represents.
    pub fn format_timestamp(&self, ts: &DateTime<Utc>) -> String {
        match self {
            Dialect::Postgres => ts.to_rfc3339(),
            Dialect::Sqlite => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    fn timestamp_placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("CAST({} AS TIMESTAMPTZ)", self.placeholder(index)),
            Dialect::Sqlite => self.placeholder(index),
        }
    }

    /// Rewrite `:name` parameters into positional placeholders.
    ///
    /// Returns the rewritten SQL and the values in binding order, with
    /// timestamps already converted to their bound text form. A name
    /// that appears twice is bound twice. Text inside single quotes and
    /// `::` casts are left alone.
    pub fn render(
        &self,
        sql: &str,
        params: &BTreeMap<String, SqlValue>,
    ) -> QueryResult<(String, Vec<SqlValue>)> {
        let mut out = String::with_capacity(sql.len());
        let mut values = Vec::new();
        let mut in_quote = false;
        let mut prev = '\0';
        let mut chars = sql.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '\'' {
                in_quote = !in_quote;
                out.push(c);
            } else if !in_quote
                && c == ':'
                && prev != ':'
                && chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_')
            {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = params.get(&name).ok_or_else(|| {
                    QueryError::config(format!("Unbound parameter ':{}' in '{}'", name, sql))
                })?;
                let index = values.len() + 1;
                match value {
                    SqlValue::Timestamp(ts) => {
                        out.push_str(&self.timestamp_placeholder(index));
                        values.push(SqlValue::Text(self.format_timestamp(ts)));
                    }
                    v => {
                        out.push_str(&self.placeholder(index));
                        values.push(v.clone());
                    }
                }
                prev = 'x';
                continue;
            } else {
                out.push(c);
            }
            prev = c;
        }

        Ok((out, values))
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// An identifier is safe to splice into SQL: ASCII letters, digits and
/// underscores, not starting with a digit.
pub fn is_valid_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
