use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::classification::Classification;
use crate::domain::lenient;
use crate::domain::rows::Row;

/// Output of one `run_sql_query` invocation. Failures are carried as data so
/// later stages can degrade instead of aborting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_executed: Option<String>,
    #[serde(default)]
    pub results: Vec<Row>,
    #[serde(default)]
    pub row_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_attempted: Option<String>,
}

impl SqlToolResult {
    pub fn failed(error: impl Into<String>, sql_attempted: Option<String>) -> Self {
        Self { error: Some(error.into()), sql_attempted, ..Self::default() }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn rows(&self) -> &[Row] {
        &self.results
    }

    pub fn has_rows(&self) -> bool {
        !self.results.is_empty()
    }
}

/// Stage-2 selection produced from discovery rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntermediateSelection {
    #[serde(default)]
    pub summary: String,
    /// A list of identifiers when the model answers, or a compressed digest
    /// string when the heuristic selection is used.
    #[serde(default)]
    pub selected_items: Value,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub stage2_focus: String,
}

impl IntermediateSelection {
    /// Selection text as embedded in the stage-2 prompt.
    pub fn selected_items_text(&self) -> String {
        match &self.selected_items {
            Value::Null => "No items selected".to_string(),
            Value::String(text) if text.trim().is_empty() => "No items selected".to_string(),
            Value::String(text) => text.clone(),
            Value::Array(items) if items.is_empty() => "No items selected".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl From<String> for Confidence {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

/// Any non-string or unrecognised label reads as `Medium`.
impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(label) => Self::from(label),
            _ => Self::Medium,
        })
    }
}

impl From<Confidence> for String {
    fn from(value: Confidence) -> Self {
        match value {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
        .to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportingData {
    #[serde(default)]
    pub primary_values: Value,
    #[serde(default)]
    pub alternatives: Value,
    #[serde(default)]
    pub confidence: Confidence,
}

/// Stage-3 business evaluation. `sql_executed` is always serialized as null.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default, deserialize_with = "lenient::text")]
    pub business_answer: String,
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub key_findings: Vec<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub recommended_action: String,
    #[serde(default, deserialize_with = "lenient_supporting_data")]
    pub supporting_data: SupportingData,
    #[serde(default, deserialize_with = "lenient::text")]
    pub data_quality: String,
    #[serde(default, serialize_with = "always_null", deserialize_with = "discard")]
    pub sql_executed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsing_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn lenient_supporting_data<'de, D>(deserializer: D) -> Result<SupportingData, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
        _ => SupportingData::default(),
    })
}

fn always_null<S>(_: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_none()
}

fn discard<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let _ = <Value as Deserialize>::deserialize(deserializer)?;
    Ok(None)
}

/// Deterministic summary from `summarize_results`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub row_count: u64,
    pub columns: Vec<String>,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_record: Option<Row>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Table,
    Bar,
    Line,
    Pie,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub title: String,
    pub config: VisualizationConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VisualizationConfig {
    Table { columns: Vec<String>, rows: Vec<Row>, total_rows: u64 },
    Chart { data: Vec<Row>, x_axis: String, y_axis: String, available_columns: AxisColumns },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisColumns {
    pub numeric: Vec<String>,
    pub text: Vec<String>,
}

/// Record of the direct-tool fast path for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectToolRun {
    pub tool: String,
    pub persona: String,
    pub results: Vec<Row>,
    pub result_count: u64,
    /// Input values matched by the primary or fuzzy lookup.
    pub succeeded: Vec<String>,
    /// Input values nothing matched.
    pub failed: Vec<String>,
    /// Subset of `succeeded` that needed the fuzzy lookup.
    pub fuzzy_matched: Vec<String>,
    pub sql_executed: Vec<String>,
    pub execution_time_ms: f64,
}

impl DirectToolRun {
    pub fn answered(&self) -> bool {
        !self.results.is_empty()
    }
}

/// Multi-stage artifacts, filled in as each stage completes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage1_query: Option<SqlToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_analysis: Option<IntermediateSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage2_query: Option<SqlToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage3_evaluation: Option<Evaluation>,
}

/// Tool outputs keyed by tool name once serialized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_tool_execution: Option<DirectToolRun>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_sql_query: Option<SqlToolResult>,
    #[serde(flatten)]
    pub stages: StageContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize_results: Option<Summary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_visualization: Option<Visualization>,
    /// Errors from tools whose output type has no error slot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_errors: BTreeMap<String, String>,
}

impl ToolResults {
    /// Rows the response is built from: direct tool, then `run_sql_query`,
    /// then stage 2, then stage 1.
    pub fn final_rows(&self) -> &[Row] {
        if let Some(direct) = self.direct_tool_execution.as_ref().filter(|run| run.answered()) {
            return &direct.results;
        }
        let candidates = [
            self.run_sql_query.as_ref(),
            self.stages.stage2_query.as_ref(),
            self.stages.stage1_query.as_ref(),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|result| result.has_rows())
            .map(SqlToolResult::rows)
            .unwrap_or(&[])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolChainResult {
    pub classification: Classification,
    pub persona_used: String,
    pub tool_results: ToolResults,
    pub final_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Confidence, Evaluation, SqlToolResult, StageContext, ToolResults};
    use crate::domain::rows::Row;

    fn rows(values: &[serde_json::Value]) -> Vec<Row> {
        values.iter().filter_map(|value| value.as_object().cloned()).collect()
    }

    #[test]
    fn evaluation_always_serializes_null_sql() {
        let evaluation: Evaluation = serde_json::from_value(json!({
            "business_answer": "Use part B",
            "key_findings": ["cheaper"],
            "sql_executed": "SELECT 1",
            "supporting_data": {"confidence": "HIGH"}
        }))
        .expect("evaluation should parse");

        assert_eq!(evaluation.sql_executed, None);
        assert_eq!(evaluation.supporting_data.confidence, Confidence::High);
        let serialized = serde_json::to_value(&evaluation).expect("serialize");
        assert_eq!(serialized["sql_executed"], json!(null));
        assert_eq!(serialized["supporting_data"]["confidence"], json!("high"));
    }

    #[test]
    fn loosely_typed_evaluation_still_parses() {
        let evaluation: Evaluation = serde_json::from_value(json!({
            "business_answer": "Kit K-3 can ship today",
            "key_findings": [{"finding": "K-3 in stock", "quantity": 12}, "K-9 backordered"],
            "recommended_action": null,
            "supporting_data": {"primary_values": ["K-3"], "confidence": null},
            "data_quality": null
        }))
        .expect("evaluation should parse");

        assert_eq!(evaluation.key_findings, vec!["K-3 in stock; 12", "K-9 backordered"]);
        assert_eq!(evaluation.recommended_action, "");
        assert_eq!(evaluation.supporting_data.primary_values, json!(["K-3"]));
        assert_eq!(evaluation.supporting_data.confidence, Confidence::Medium);
    }

    #[test]
    fn final_rows_prefer_analysis_over_discovery() {
        let results = ToolResults {
            stages: StageContext {
                stage1_query: Some(SqlToolResult {
                    results: rows(&[json!({"id": 1}), json!({"id": 2})]),
                    row_count: 2,
                    ..SqlToolResult::default()
                }),
                stage2_query: Some(SqlToolResult {
                    results: rows(&[json!({"id": 2, "detail": "x"})]),
                    row_count: 1,
                    ..SqlToolResult::default()
                }),
                ..StageContext::default()
            },
            ..ToolResults::default()
        };

        assert_eq!(results.final_rows().len(), 1);
    }

    #[test]
    fn final_rows_fall_back_to_discovery_when_analysis_is_empty() {
        let results = ToolResults {
            stages: StageContext {
                stage1_query: Some(SqlToolResult {
                    results: rows(&[json!({"id": 1})]),
                    row_count: 1,
                    ..SqlToolResult::default()
                }),
                stage2_query: Some(SqlToolResult::default()),
                ..StageContext::default()
            },
            ..ToolResults::default()
        };

        assert_eq!(results.final_rows()[0]["id"], json!(1));
        assert!(ToolResults::default().final_rows().is_empty());
    }

    #[test]
    fn tool_results_serialize_stage_fields_at_top_level() {
        let results = ToolResults {
            stages: StageContext {
                stage1_query: Some(SqlToolResult::failed("timeout", None)),
                ..StageContext::default()
            },
            ..ToolResults::default()
        };
        let value = serde_json::to_value(&results).expect("serialize");

        assert_eq!(value["stage1_query"]["error"], json!("timeout"));
        assert!(value.get("stage2_query").is_none());
        assert!(value.get("run_sql_query").is_none());
    }
}
