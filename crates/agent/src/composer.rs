//! Merges tool outputs into the single answer string returned to the user.

use askwell_core::domain::results::{Evaluation, ToolResults};
use askwell_core::domain::rows::render_pairs;

pub const NO_DATA_RESPONSE: &str = "I wasn't able to retrieve data to answer your question. \
Please check if the tables are accessible or rephrase your question.";

const DETAIL_ROWS: usize = 3;

/// Stage-3 evaluation wins when it has an answer; otherwise the answer is
/// built from the highest-priority row set. Never returns an empty string.
pub fn compose(question: &str, results: &ToolResults, suggestions: Option<&str>) -> String {
    if let Some(evaluation) = results
        .stages
        .stage3_evaluation
        .as_ref()
        .filter(|evaluation| !evaluation.business_answer.trim().is_empty())
    {
        return compose_evaluation(evaluation);
    }

    let rows = results.final_rows();
    if rows.is_empty() {
        return NO_DATA_RESPONSE.to_string();
    }

    let mut parts = vec![format!("**Answer to: {question}**")];
    if let Some(summary) =
        results.summarize_results.as_ref().filter(|summary| !summary.summary.is_empty())
    {
        parts.push(format!("\n**Summary**: {}", summary.summary));
    }

    parts.push("\n**Key Details**:".to_string());
    for (index, row) in rows.iter().take(DETAIL_ROWS).enumerate() {
        parts.push(format!("• Record {}: {}", index + 1, render_pairs(row)));
    }
    parts.push(format!("\n**Data Summary**: Found {} records", rows.len()));

    if let Some(suggestions) = suggestions.filter(|text| !text.trim().is_empty()) {
        parts.push(format!("\n**Suggestions**: {suggestions}"));
    }
    parts.join("\n")
}

fn compose_evaluation(evaluation: &Evaluation) -> String {
    let mut parts = vec![format!("**{}**", evaluation.business_answer)];
    if !evaluation.key_findings.is_empty() {
        parts.push("\n**Key Findings:**".to_string());
        parts.extend(evaluation.key_findings.iter().map(|finding| format!("• {finding}")));
    }
    if !evaluation.recommended_action.is_empty() {
        parts.push(format!("\n**Recommended Action:** {}", evaluation.recommended_action));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use askwell_core::domain::results::{
        Evaluation, SqlToolResult, StageContext, Summary, ToolResults,
    };
    use askwell_core::domain::rows::Row;
    use serde_json::json;

    use super::{compose, NO_DATA_RESPONSE};

    fn rows(values: serde_json::Value) -> Vec<Row> {
        values
            .as_array()
            .map(|items| items.iter().filter_map(|item| item.as_object().cloned()).collect())
            .unwrap_or_default()
    }

    fn sql(values: serde_json::Value) -> SqlToolResult {
        let results = rows(values);
        SqlToolResult { row_count: results.len() as u64, results, ..SqlToolResult::default() }
    }

    #[test]
    fn evaluation_with_answer_is_the_primary_payload() {
        let results = ToolResults {
            run_sql_query: Some(sql(json!([{"id": 1}]))),
            stages: StageContext {
                stage3_evaluation: Some(Evaluation {
                    business_answer: "Use P-7".to_string(),
                    key_findings: vec!["cheaper".to_string(), "in stock".to_string()],
                    recommended_action: "Order P-7".to_string(),
                    ..Evaluation::default()
                }),
                ..StageContext::default()
            },
            ..ToolResults::default()
        };

        assert_eq!(
            compose("q", &results, None),
            "**Use P-7**\n\n**Key Findings:**\n• cheaper\n• in stock\n\n\
             **Recommended Action:** Order P-7"
        );
    }

    #[test]
    fn blank_evaluation_falls_back_to_rows() {
        let results = ToolResults {
            stages: StageContext {
                stage1_query: Some(sql(json!([{"id": 1, "note": null}]))),
                stage3_evaluation: Some(Evaluation::default()),
                ..StageContext::default()
            },
            ..ToolResults::default()
        };

        let response = compose("Which kits?", &results, None);
        assert!(response.starts_with("**Answer to: Which kits?**"));
        assert!(response.contains("• Record 1: id: 1\n"));
        assert!(response.ends_with("**Data Summary**: Found 1 records"));
    }

    #[test]
    fn row_answer_shows_summary_three_records_and_suggestions() {
        let results = ToolResults {
            run_sql_query: Some(sql(json!([
                {"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}
            ]))),
            summarize_results: Some(Summary {
                summary: "Found 4 record(s). Columns: id".to_string(),
                row_count: 4,
                columns: vec!["id".to_string()],
                context: "general".to_string(),
                sample_record: None,
            }),
            ..ToolResults::default()
        };

        let response = compose("q", &results, Some("Ask about parts."));
        assert!(response.contains("\n**Summary**: Found 4 record(s). Columns: id"));
        assert!(response.contains("• Record 3: id: 3"));
        assert!(!response.contains("Record 4"));
        assert!(response.contains("Found 4 records"));
        assert!(response.ends_with("\n**Suggestions**: Ask about parts."));
    }

    #[test]
    fn no_rows_anywhere_gives_fixed_message() {
        assert_eq!(compose("q", &ToolResults::default(), Some("tips")), NO_DATA_RESPONSE);
    }
}
