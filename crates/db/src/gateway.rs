use askwell_core::domain::rows::Row;
use askwell_core::sql::{SqlError, SqlGateway, SqlOutput};
use serde_json::{Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tracing::debug;

use crate::DbPool;

/// SQL gateway over a sqlx pool. Statements that return rows come back as
/// JSON field maps in column order; anything else reports `rows_affected`.
#[derive(Clone)]
pub struct SqlxGateway {
    pool: DbPool,
}

impl SqlxGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl SqlGateway for SqlxGateway {
    async fn execute(&self, sql: &str) -> Result<SqlOutput, SqlError> {
        let statement = sql.trim().trim_end_matches(';').trim();
        if statement.is_empty() {
            return Err(SqlError::Execution("empty statement".to_string()));
        }

        if returns_rows(statement) {
            let rows =
                sqlx::query(statement).fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
            let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
            debug!(
                event_name = "db.gateway.query",
                rows = decoded.len(),
                "query returned rows"
            );
            Ok(SqlOutput::Rows(decoded))
        } else {
            let result =
                sqlx::query(statement).execute(&self.pool).await.map_err(map_sqlx_error)?;
            Ok(SqlOutput::Affected { rows_affected: result.rows_affected() })
        }
    }
}

fn returns_rows(statement: &str) -> bool {
    let keyword = statement
        .split(|ch: char| ch.is_whitespace() || ch == '(')
        .find(|part| !part.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(keyword.as_str(), "SELECT" | "WITH" | "PRAGMA" | "VALUES" | "EXPLAIN")
        || statement.to_ascii_uppercase().contains(" RETURNING ")
}

fn map_sqlx_error(error: sqlx::Error) -> SqlError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            SqlError::Connection(error.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            SqlError::Decode(error.to_string())
        }
        other => SqlError::Execution(other.to_string()),
    }
}

fn decode_row(row: &SqliteRow) -> Result<Row, SqlError> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index).map_err(map_sqlx_error)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => {
                    Value::from(row.try_get::<i64, _>(index).map_err(map_sqlx_error)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
                    let number = row.try_get::<f64, _>(index).map_err(map_sqlx_error)?;
                    Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
                }
                "BLOB" => {
                    let bytes = row.try_get::<Vec<u8>, _>(index).map_err(map_sqlx_error)?;
                    Value::String(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
                }
                _ => Value::String(row.try_get::<String, _>(index).map_err(map_sqlx_error)?),
            }
        };
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::returns_rows;

    #[test]
    fn row_returning_statements_are_detected() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  with t as (select 1) select * from t"));
        assert!(returns_rows("SELECT TOP 5 * FROM t"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(returns_rows("DELETE FROM t WHERE id = 1 RETURNING id"));
    }
}
