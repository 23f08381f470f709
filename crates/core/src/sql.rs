//! SQL gateway contract and helpers for building SQL text from untrusted values.
//!
//! Nothing in the orchestration path binds parameters: every literal is
//! interpolated, so all untrusted text goes through [`SqlDialect::string_literal`],
//! [`SqlDialect::like_contains`] or [`validate_identifier`] first.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::rows::Row;

#[derive(Clone, Debug, PartialEq)]
pub enum SqlOutput {
    Rows(Vec<Row>),
    Affected { rows_affected: u64 },
}

impl SqlOutput {
    pub fn rows(&self) -> &[Row] {
        match self {
            Self::Rows(rows) => rows,
            Self::Affected { .. } => &[],
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::Affected { .. } => Vec::new(),
        }
    }

    /// Row count for queries, affected count for statements.
    pub fn result_count(&self) -> u64 {
        match self {
            Self::Rows(rows) => rows.len() as u64,
            Self::Affected { rows_affected } => *rows_affected,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SqlError {
    #[error("sql connection failed: {0}")]
    Connection(String),
    #[error("sql execution failed: {0}")]
    Execution(String),
    #[error("sql result decode failed: {0}")]
    Decode(String),
    #[error("invalid sql identifier `{0}`")]
    InvalidIdentifier(String),
}

#[async_trait]
pub trait SqlGateway: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<SqlOutput, SqlError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    Tsql,
    #[default]
    Sqlite,
}

impl SqlDialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tsql => "tsql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Quoted string literal. Control characters are dropped and single
    /// quotes doubled. T-SQL literals are prefixed with `N` so non-ASCII
    /// product names survive.
    pub fn string_literal(self, value: &str) -> String {
        let cleaned: String =
            value.chars().filter(|ch| !ch.is_control()).collect::<String>().replace('\'', "''");
        match self {
            Self::Tsql => format!("N'{cleaned}'"),
            Self::Sqlite => format!("'{cleaned}'"),
        }
    }

    /// `'%term%' ESCAPE '\'` with LIKE wildcards in `term` escaped.
    pub fn like_contains(self, term: &str) -> String {
        let mut escaped = String::with_capacity(term.len());
        for ch in term.chars() {
            if matches!(ch, '%' | '_' | '[' | '\\') {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        format!("{} ESCAPE '\\'", self.string_literal(&format!("%{escaped}%")))
    }

    /// Wraps a projection so at most `limit` rows come back.
    pub fn limit_query(self, columns: &str, rest: &str, limit: u32) -> String {
        match self {
            Self::Tsql => format!("SELECT TOP {limit} {columns} {rest}"),
            Self::Sqlite => format!("SELECT {columns} {rest} LIMIT {limit}"),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SqlDialect {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tsql" | "t-sql" | "mssql" => Ok(Self::Tsql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unsupported sql dialect `{other}` (expected tsql|sqlite)")),
        }
    }
}

/// Accepts dotted identifiers whose segments start with a letter or `_` and
/// continue with letters, digits or `_`. Letters may be non-ASCII.
pub fn validate_identifier(name: &str) -> Result<&str, SqlError> {
    let valid = !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) if first.is_alphabetic() || first == '_' => {
                    chars.all(|ch| ch.is_alphanumeric() || ch == '_')
                }
                _ => false,
            }
        });
    if valid {
        Ok(name)
    } else {
        Err(SqlError::InvalidIdentifier(name.to_string()))
    }
}

/// Removes markdown code fences from model-generated SQL.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```sql", "").replace("```SQL", "").replace("```", "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{strip_code_fences, validate_identifier, SqlDialect, SqlError, SqlOutput};

    #[test]
    fn literals_escape_quotes_and_drop_control_characters() {
        assert_eq!(SqlDialect::Sqlite.string_literal("O'Brien\n"), "'O''Brien'");
        assert_eq!(
            SqlDialect::Tsql.string_literal("x'); DROP TABLE t;--"),
            "N'x''); DROP TABLE t;--'"
        );
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(SqlDialect::Sqlite.like_contains("10%_off"), "'%10\\%\\_off%' ESCAPE '\\'");
        assert_eq!(SqlDialect::Tsql.like_contains("a[b"), "N'%a\\[b%' ESCAPE '\\'");
    }

    #[test]
    fn identifiers_reject_injection() {
        assert_eq!(validate_identifier("dbo.product_master"), Ok("dbo.product_master"));
        assert_eq!(validate_identifier("品番"), Ok("品番"));
        assert!(matches!(validate_identifier("name; DROP"), Err(SqlError::InvalidIdentifier(_))));
        assert!(validate_identifier("1col").is_err());
        assert!(validate_identifier("a..b").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn limit_query_uses_dialect_syntax() {
        assert_eq!(
            SqlDialect::Tsql.limit_query("id", "FROM t ORDER BY id", 5),
            "SELECT TOP 5 id FROM t ORDER BY id"
        );
        assert_eq!(
            SqlDialect::Sqlite.limit_query("id", "FROM t ORDER BY id", 5),
            "SELECT id FROM t ORDER BY id LIMIT 5"
        );
        assert_eq!("T-SQL".parse::<SqlDialect>(), Ok(SqlDialect::Tsql));
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("  SELECT 2 "), "SELECT 2");
        assert_eq!(strip_code_fences("```SELECT 3```"), "SELECT 3");
    }

    #[test]
    fn output_counts() {
        let rows = SqlOutput::Rows(vec![json!({"a": 1}).as_object().cloned().unwrap_or_default()]);
        assert_eq!(rows.result_count(), 1);
        assert_eq!(SqlOutput::Affected { rows_affected: 4 }.result_count(), 4);
        assert!(SqlOutput::Affected { rows_affected: 4 }.rows().is_empty());
    }
}
