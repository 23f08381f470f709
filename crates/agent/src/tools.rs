//! The fixed tool vocabulary: SQL execution, summarization and
//! visualization.

use std::sync::Arc;
use std::time::Instant;

use askwell_core::domain::classification::ToolName;
use askwell_core::domain::results::{
    AxisColumns, ChartType, SqlToolResult, Summary, Visualization, VisualizationConfig,
};
use askwell_core::domain::rows::{column_names, Row};
use askwell_core::sql::{strip_code_fences, SqlDialect, SqlGateway, SqlOutput};
use askwell_core::telemetry::{TelemetrySink, PURPOSE_SQL_GENERATION};
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::prompts;

const SQL_GENERATION_MAX_TOKENS: u32 = 512;
const TABLE_ROW_LIMIT: usize = 20;
const CHART_ROW_LIMIT: usize = 10;

/// Shared collaborators for tool execution within one runtime.
#[derive(Clone)]
pub struct ToolBox {
    llm: Arc<dyn LlmClient>,
    sql: Arc<dyn SqlGateway>,
    telemetry: Arc<dyn TelemetrySink>,
    dialect: SqlDialect,
}

impl ToolBox {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sql: Arc<dyn SqlGateway>,
        telemetry: Arc<dyn TelemetrySink>,
        dialect: SqlDialect,
    ) -> Self {
        Self { llm, sql, telemetry, dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// The LLM writes one query from the natural-language `context`, which
    /// is then executed. Never returns `Err`: failures come back as a result
    /// carrying `error` and, when generation got that far, `sql_attempted`.
    pub async fn run_sql_query(&self, context: &str, request_id: &str) -> SqlToolResult {
        let started = Instant::now();
        let result = self.run_sql_inner(context, request_id).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.telemetry.log_tool_execution(
            request_id,
            ToolName::RunSqlQuery.as_str(),
            duration_ms,
            result.succeeded(),
            result.succeeded().then_some(result.row_count),
        );
        if let Some(error) = &result.error {
            warn!(
                event_name = "agent.tool.sql_failed",
                correlation_id = request_id,
                error = %error,
                "run_sql_query failed"
            );
        }
        result
    }

    async fn run_sql_inner(&self, context: &str, request_id: &str) -> SqlToolResult {
        let sql = match self.generate_sql(context, request_id).await {
            Ok(sql) => sql,
            Err(error) => return SqlToolResult::failed(error, None),
        };
        if sql.is_empty() {
            return SqlToolResult::failed("no SQL statement was produced", Some(sql));
        }

        let started = Instant::now();
        match self.sql.execute(&sql).await {
            Ok(output) => {
                let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                let count = output.result_count();
                self.telemetry.log_sql_query(request_id, &sql, duration_ms, count);
                debug!(
                    event_name = "agent.tool.sql_executed",
                    correlation_id = request_id,
                    result_count = count,
                    "query executed"
                );
                match output {
                    SqlOutput::Rows(rows) => SqlToolResult {
                        sql_executed: Some(sql),
                        results: rows,
                        row_count: count,
                        ..SqlToolResult::default()
                    },
                    SqlOutput::Affected { rows_affected } => SqlToolResult {
                        sql_executed: Some(sql),
                        row_count: rows_affected,
                        rows_affected: Some(rows_affected),
                        ..SqlToolResult::default()
                    },
                }
            }
            Err(error) => SqlToolResult::failed(error.to_string(), Some(sql)),
        }
    }

    async fn generate_sql(&self, context: &str, request_id: &str) -> Result<String, String> {
        let request = CompletionRequest::new(
            vec![ChatMessage::user(prompts::sql_generation_prompt(context, self.dialect))],
            SQL_GENERATION_MAX_TOKENS,
            PURPOSE_SQL_GENERATION,
        );
        let completion = self.llm.complete(&request).await.map_err(|error| error.to_string())?;
        self.telemetry.log_api_call(
            request_id,
            self.llm.model(),
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
            PURPOSE_SQL_GENERATION,
        );
        Ok(strip_code_fences(&completion.content))
    }
}

pub fn summarize_results(rows: &[Row], context: &str) -> Summary {
    if rows.is_empty() {
        return Summary {
            summary: "No data to summarize".to_string(),
            row_count: 0,
            columns: Vec::new(),
            context: context.to_string(),
            sample_record: None,
        };
    }

    let columns = column_names(rows);
    let mut parts = vec![format!("Found {} record(s)", rows.len())];
    if !columns.is_empty() {
        parts.push(format!("Columns: {}", columns.join(", ")));
    }
    let lowered = context.to_lowercase();
    if lowered.contains("product") {
        parts.push("Use this data for product planning and inventory decisions".to_string());
    } else if lowered.contains("sales") {
        parts.push("Review for sales trends and performance analysis".to_string());
    }

    Summary {
        summary: parts.join(". "),
        row_count: rows.len() as u64,
        columns,
        context: context.to_string(),
        sample_record: rows.first().cloned(),
    }
}

fn parse_chart_type(value: &str) -> Option<ChartType> {
    match value.trim().to_ascii_lowercase().as_str() {
        "table" => Some(ChartType::Table),
        "bar" => Some(ChartType::Bar),
        "line" => Some(ChartType::Line),
        "pie" => Some(ChartType::Pie),
        _ => None,
    }
}

pub fn generate_visualization(
    rows: &[Row],
    chart_type: &str,
    title: Option<&str>,
) -> Result<Visualization, String> {
    if rows.is_empty() {
        return Err("No data provided for visualization".to_string());
    }
    let chart = parse_chart_type(chart_type).ok_or_else(|| {
        format!("Unsupported chart type: {chart_type}. Supported types: table, bar, line, pie")
    })?;

    let columns = column_names(rows);
    if chart == ChartType::Table {
        return Ok(Visualization {
            chart_type: chart,
            title: title.unwrap_or("Data Table").to_string(),
            config: VisualizationConfig::Table {
                columns,
                rows: rows.iter().take(TABLE_ROW_LIMIT).cloned().collect(),
                total_rows: rows.len() as u64,
            },
        });
    }

    let mut axis = AxisColumns::default();
    if let Some(first) = rows.first() {
        for (name, value) in first {
            match value {
                Value::Number(_) => axis.numeric.push(name.clone()),
                Value::String(_) => axis.text.push(name.clone()),
                _ => {}
            }
        }
    }
    let x_axis = axis.text.first().or_else(|| columns.first()).cloned().unwrap_or_default();
    let y_axis = axis
        .numeric
        .first()
        .or_else(|| columns.get(1))
        .or_else(|| columns.first())
        .cloned()
        .unwrap_or_default();

    Ok(Visualization {
        chart_type: chart,
        title: title.map(str::to_string).unwrap_or_else(|| format!("{chart_type} chart")),
        config: VisualizationConfig::Chart {
            data: rows.iter().take(CHART_ROW_LIMIT).cloned().collect(),
            x_axis,
            y_axis,
            available_columns: axis,
        },
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use askwell_core::domain::results::{ChartType, VisualizationConfig};
    use askwell_core::domain::rows::Row;
    use askwell_core::sql::{SqlDialect, SqlError};
    use askwell_core::telemetry::InMemoryTelemetry;
    use askwell_db::InMemorySqlGateway;
    use serde_json::json;

    use super::{generate_visualization, summarize_results, ToolBox};
    use crate::llm::ScriptedLlm;

    fn rows(values: serde_json::Value) -> Vec<Row> {
        values
            .as_array()
            .map(|items| items.iter().filter_map(|item| item.as_object().cloned()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn generated_sql_is_unfenced_and_executed() {
        let llm = Arc::new(ScriptedLlm::new("gpt-4o").reply("```sql\nSELECT * FROM parts\n```"));
        let sql = Arc::new(
            InMemorySqlGateway::new().respond_when("from parts", rows(json!([{"id": 1}]))),
        );
        let telemetry = Arc::new(InMemoryTelemetry::default());
        let tools = ToolBox::new(llm.clone(), sql.clone(), telemetry.clone(), SqlDialect::Sqlite);

        let result = tools.run_sql_query("list parts", "req-1").await;

        assert_eq!(result.sql_executed.as_deref(), Some("SELECT * FROM parts"));
        assert_eq!(result.row_count, 1);
        assert_eq!(sql.executed().await, vec!["SELECT * FROM parts".to_string()]);
        assert_eq!(llm.purposes(), vec!["sql_generation"]);
        assert_eq!(telemetry.api_call_purposes(), vec!["sql_generation"]);
    }

    #[tokio::test]
    async fn execution_failure_reports_attempted_sql() {
        let llm = Arc::new(ScriptedLlm::new("gpt-4o").reply("SELECT 1 FROM nowhere"));
        let sql = Arc::new(
            InMemorySqlGateway::new()
                .fail_when("from nowhere", SqlError::Execution("no such table".to_string())),
        );
        let tools =
            ToolBox::new(llm, sql, Arc::new(InMemoryTelemetry::default()), SqlDialect::Sqlite);

        let result = tools.run_sql_query("parts nobody stocks", "req").await;

        assert!(!result.succeeded());
        assert_eq!(result.sql_attempted.as_deref(), Some("SELECT 1 FROM nowhere"));
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn generation_failure_has_no_attempted_sql() {
        let tools = ToolBox::new(
            Arc::new(ScriptedLlm::new("gpt-4o")),
            Arc::new(InMemorySqlGateway::new()),
            Arc::new(InMemoryTelemetry::default()),
            SqlDialect::Sqlite,
        );

        let result = tools.run_sql_query("anything", "req").await;
        assert!(result.error.is_some());
        assert_eq!(result.sql_attempted, None);
    }

    #[test]
    fn summary_mentions_columns_and_context_hint() {
        let data = rows(json!([{"sku": "A", "qty": 2}, {"sku": "B", "qty": 3}]));

        let summary = summarize_results(&data, "product availability");
        assert_eq!(
            summary.summary,
            "Found 2 record(s). Columns: sku, qty. Use this data for product planning and \
             inventory decisions"
        );
        assert_eq!(summary.sample_record, data.first().cloned());

        let sales = summarize_results(&data, "Sales by region");
        assert!(sales.summary.ends_with("Review for sales trends and performance analysis"));
        assert_eq!(summarize_results(&[], "x").summary, "No data to summarize");
    }

    #[test]
    fn table_visualization_caps_rows() {
        let data: Vec<Row> =
            (0..25).filter_map(|id| json!({"id": id}).as_object().cloned()).collect();

        let chart = generate_visualization(&data, "table", None).expect("table renders");
        assert_eq!(chart.title, "Data Table");
        match chart.config {
            VisualizationConfig::Table { rows, total_rows, .. } => {
                assert_eq!(rows.len(), 20);
                assert_eq!(total_rows, 25);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn bar_chart_picks_text_and_numeric_axes() {
        let data = rows(json!([{"qty": 3, "region": "east", "flag": null}]));

        let chart = generate_visualization(&data, "bar", Some("Qty")).expect("bar renders");
        assert_eq!(chart.chart_type, ChartType::Bar);
        match chart.config {
            VisualizationConfig::Chart { x_axis, y_axis, available_columns, .. } => {
                assert_eq!(x_axis, "region");
                assert_eq!(y_axis, "qty");
                assert_eq!(available_columns.numeric, vec!["qty"]);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn invalid_visualization_inputs_are_errors() {
        assert_eq!(
            generate_visualization(&[], "table", None),
            Err("No data provided for visualization".to_string())
        );
        let data = rows(json!([{"a": 1}]));
        assert_eq!(
            generate_visualization(&data, "radar", None),
            Err("Unsupported chart type: radar. Supported types: table, bar, line, pie".to_string())
        );
    }
}
