use tokio::sync::RwLock;

use askwell_core::domain::rows::Row;
use askwell_core::sql::{SqlError, SqlGateway, SqlOutput};

struct Rule {
    needle: String,
    outcome: Result<SqlOutput, SqlError>,
}

/// Canned SQL gateway. Rules are checked in registration order against a
/// case-insensitive substring of the statement; the first hit wins and
/// unmatched statements return no rows.
#[derive(Default)]
pub struct InMemorySqlGateway {
    rules: Vec<Rule>,
    executed: RwLock<Vec<String>>,
}

impl InMemorySqlGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_when(mut self, needle: impl Into<String>, rows: Vec<Row>) -> Self {
        let needle = needle.into().to_lowercase();
        self.rules.push(Rule { needle, outcome: Ok(SqlOutput::Rows(rows)) });
        self
    }

    pub fn fail_when(mut self, needle: impl Into<String>, error: SqlError) -> Self {
        self.rules.push(Rule { needle: needle.into().to_lowercase(), outcome: Err(error) });
        self
    }

    /// Every statement seen so far, in execution order.
    pub async fn executed(&self) -> Vec<String> {
        self.executed.read().await.clone()
    }
}

#[async_trait::async_trait]
impl SqlGateway for InMemorySqlGateway {
    async fn execute(&self, sql: &str) -> Result<SqlOutput, SqlError> {
        self.executed.write().await.push(sql.to_string());
        let lowered = sql.to_lowercase();
        self.rules
            .iter()
            .find(|rule| lowered.contains(&rule.needle))
            .map(|rule| rule.outcome.clone())
            .unwrap_or_else(|| Ok(SqlOutput::Rows(Vec::new())))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use askwell_core::domain::rows::Row;
    use askwell_core::sql::{SqlError, SqlGateway, SqlOutput};

    use super::InMemorySqlGateway;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn first_matching_rule_wins_and_statements_are_recorded() {
        let gateway = InMemorySqlGateway::new()
            .respond_when("FROM product_master", vec![row(json!({"product_id": "P-1"}))])
            .fail_when("from", SqlError::Execution("boom".to_string()));

        let rows = gateway.execute("select * from PRODUCT_MASTER").await.expect("rows");
        assert_eq!(rows.result_count(), 1);

        let failure = gateway.execute("select * from part_master").await;
        assert_eq!(failure, Err(SqlError::Execution("boom".to_string())));

        assert_eq!(gateway.executed().await.len(), 2);
    }

    #[tokio::test]
    async fn unmatched_statement_returns_no_rows() {
        let gateway = InMemorySqlGateway::new();
        let output = gateway.execute("SELECT 1").await.expect("empty result");
        assert_eq!(output, SqlOutput::Rows(Vec::new()));
    }
}
