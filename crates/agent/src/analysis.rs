//! Pure-analysis LLM calls of the multi-stage workflow: intermediate
//! selection between discovery and analysis, and the final evaluation.

use std::sync::{Arc, LazyLock};

use askwell_core::compression::{compress, digest};
use askwell_core::domain::results::{Confidence, Evaluation, IntermediateSelection, SupportingData};
use askwell_core::domain::rows::Row;
use askwell_core::errors::OrchestrationError;
use askwell_core::resolution::Resolution;
use askwell_core::telemetry::{TelemetrySink, PURPOSE_EVALUATION, PURPOSE_INTERMEDIATE};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::classifier::extract_json_block;
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::prompts::{self, EvaluationInputs, ANALYST_SYSTEM};

const INTERMEDIATE_MAX_TOKENS: u32 = 300;
const EVALUATION_MAX_TOKENS: u32 = 500;
const FALLBACK_SAMPLE_ROWS: usize = 3;
const MAX_RECOVERED_FINDINGS: usize = 5;
const RAW_RESPONSE_CHARS: usize = 500;

pub const STAGE1_COMPRESSION: &str = "stage1_intermediate";
pub const STAGE3_COMPRESSION: &str = "stage3_evaluation";

static BUSINESS_ANSWER: LazyLock<Regex> =
    LazyLock::new(|| compile(r#""business_answer":\s*"([^"\\]*(?:\\.[^"\\]*)*)""#));
static RECOMMENDED_ACTION: LazyLock<Regex> =
    LazyLock::new(|| compile(r#""recommended_action":\s*"([^"\\]*(?:\\.[^"\\]*)*)""#));
static KEY_FINDINGS: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"(?s)"key_findings":\s*\[(.*?)\]"#));
static QUOTED: LazyLock<Regex> = LazyLock::new(|| compile(r#""([^"\\]*(?:\\.[^"\\]*)*)""#));

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => panic!("evaluation recovery regex is invalid: {err}"),
    }
}

/// Inputs to the stage-3 evaluation gathered from the earlier stages.
pub struct EvaluationRequest<'a> {
    pub question: &'a str,
    pub persona_content: &'a str,
    pub stage1_count: usize,
    pub selection: &'a IntermediateSelection,
    pub stage2_rows: &'a [Row],
}

pub struct StageAnalyst {
    llm: Arc<dyn LlmClient>,
    telemetry: Arc<dyn TelemetrySink>,
    max_records: usize,
}

impl StageAnalyst {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        telemetry: Arc<dyn TelemetrySink>,
        max_records: usize,
    ) -> Self {
        Self { llm, telemetry, max_records: max_records.max(1) }
    }

    /// Picks the discovery rows worth a detailed follow-up query. Falls back
    /// to a compressed sample of the first rows when the reply is unusable.
    pub async fn select_intermediate(
        &self,
        question: &str,
        persona_content: &str,
        stage1_rows: &[Row],
        request_id: &str,
    ) -> Resolution<IntermediateSelection> {
        let compressed = digest(stage1_rows, self.max_records);
        self.telemetry.log_compression(request_id, STAGE1_COMPRESSION, &compressed.stats);

        let request = CompletionRequest::new(
            vec![ChatMessage::user(prompts::intermediate_prompt(
                question,
                persona_content,
                &compressed.text,
            ))],
            INTERMEDIATE_MAX_TOKENS,
            PURPOSE_INTERMEDIATE,
        );

        let outcome = match self.llm.complete(&request).await {
            Ok(completion) => {
                self.telemetry.log_api_call(
                    request_id,
                    self.llm.model(),
                    completion.usage.prompt_tokens,
                    completion.usage.completion_tokens,
                    PURPOSE_INTERMEDIATE,
                );
                serde_json::from_str::<IntermediateSelection>(extract_json_block(
                    &completion.content,
                ))
                .map_err(|error| error.to_string())
            }
            Err(error) => Err(error.to_string()),
        };

        match outcome {
            Ok(selection) => Resolution::Parsed(selection),
            Err(detail) => {
                warn!(
                    event_name = "agent.analysis.intermediate_fallback",
                    correlation_id = request_id,
                    error = %detail,
                    "intermediate selection fell back to automatic sample"
                );
                self.telemetry.log_error(request_id, &detail, STAGE1_COMPRESSION);
                Resolution::fallback(
                    fallback_selection(stage1_rows),
                    OrchestrationError::IntermediateSelection(detail),
                )
            }
        }
    }

    /// Asks for a business answer over the analysis rows. The result always
    /// carries `sql_executed: null`.
    pub async fn evaluate(
        &self,
        inputs: EvaluationRequest<'_>,
        request_id: &str,
    ) -> Resolution<Evaluation> {
        let compressed = digest(inputs.stage2_rows, self.max_records);
        self.telemetry.log_compression(request_id, STAGE3_COMPRESSION, &compressed.stats);

        let context = prompts::stage3_context(&EvaluationInputs {
            persona_content: inputs.persona_content,
            question: inputs.question,
            stage1_count: inputs.stage1_count,
            reasoning: &inputs.selection.reasoning,
            stage2_count: inputs.stage2_rows.len(),
            digest: &compressed.text,
        });
        let request = CompletionRequest::new(
            vec![
                ChatMessage::system(ANALYST_SYSTEM),
                ChatMessage::user(prompts::evaluation_prompt(&context)),
            ],
            EVALUATION_MAX_TOKENS,
            PURPOSE_EVALUATION,
        );

        let completion = match self.llm.complete(&request).await {
            Ok(completion) => completion,
            Err(error) => {
                let detail = error.to_string();
                warn!(
                    event_name = "agent.analysis.evaluation_failed",
                    correlation_id = request_id,
                    error = %detail,
                    "evaluation call failed"
                );
                self.telemetry.log_error(request_id, &detail, STAGE3_COMPRESSION);
                return Resolution::fallback(
                    failed_evaluation(&detail),
                    OrchestrationError::ToolExecution {
                        tool: STAGE3_COMPRESSION.to_string(),
                        message: detail,
                    },
                );
            }
        };
        self.telemetry.log_api_call(
            request_id,
            self.llm.model(),
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
            PURPOSE_EVALUATION,
        );

        let resolution = parse_evaluation(&completion.content);
        if let Some(reason) = resolution.fallback_reason() {
            warn!(
                event_name = "agent.analysis.evaluation_recovered",
                correlation_id = request_id,
                reason = %reason,
                "evaluation reply recovered from raw text"
            );
        }
        resolution
    }
}

pub fn fallback_selection(stage1_rows: &[Row]) -> IntermediateSelection {
    let sample = &stage1_rows[..stage1_rows.len().min(FALLBACK_SAMPLE_ROWS)];
    IntermediateSelection {
        summary: format!("Found {} potential matches", stage1_rows.len()),
        selected_items: Value::String(compress(sample, FALLBACK_SAMPLE_ROWS)),
        reasoning: "Automatic selection due to processing error".to_string(),
        stage2_focus: "detailed analysis of selected items".to_string(),
    }
}

/// Parses an evaluation reply. Mistyped fields take their defaults; raw-text
/// recovery only runs when the reply is not a JSON object at all.
pub fn parse_evaluation(content: &str) -> Resolution<Evaluation> {
    let raw = extract_json_block(content);
    let parsed = serde_json::from_str::<Value>(raw).and_then(|value| match value {
        Value::Object(_) => serde_json::from_value::<Evaluation>(value),
        _ => Err(serde::de::Error::custom("evaluation is not a JSON object")),
    });
    match parsed {
        Ok(mut evaluation) => {
            evaluation.sql_executed = None;
            Resolution::Parsed(evaluation)
        }
        Err(error) => Resolution::fallback(
            recover_evaluation(raw),
            OrchestrationError::EvaluationParse(error.to_string()),
        ),
    }
}

fn recover_evaluation(raw: &str) -> Evaluation {
    let capture = |pattern: &Regex| {
        pattern.captures(raw).and_then(|captures| captures.get(1)).map(|m| unescape(m.as_str()))
    };

    let mut key_findings: Vec<String> = KEY_FINDINGS
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|block| {
            QUOTED
                .captures_iter(block.as_str())
                .filter_map(|captures| captures.get(1))
                .map(|m| unescape(m.as_str()))
                .take(MAX_RECOVERED_FINDINGS)
                .collect()
        })
        .unwrap_or_default();
    if key_findings.is_empty() {
        key_findings = vec![
            "Analysis completed successfully".to_string(),
            "Data analysis performed on available records".to_string(),
        ];
    }

    let raw_response = if raw.chars().count() > RAW_RESPONSE_CHARS {
        format!("{}...", raw.chars().take(RAW_RESPONSE_CHARS).collect::<String>())
    } else {
        raw.to_string()
    };

    Evaluation {
        business_answer: capture(&BUSINESS_ANSWER)
            .unwrap_or_else(|| "Analysis completed (JSON parsing issue)".to_string()),
        key_findings,
        recommended_action: capture(&RECOMMENDED_ACTION)
            .unwrap_or_else(|| "Review the analysis results for insights".to_string()),
        supporting_data: SupportingData {
            primary_values: Value::String("Analysis extracted from LLM response".to_string()),
            alternatives: Value::String("See raw response for additional details".to_string()),
            confidence: Confidence::Medium,
        },
        data_quality: "good - LLM analysis completed".to_string(),
        sql_executed: None,
        raw_response: Some(raw_response),
        parsing_note: Some("JSON parsing failed, extracted from raw text".to_string()),
        error: None,
    }
}

fn failed_evaluation(detail: &str) -> Evaluation {
    Evaluation {
        business_answer: "Error during evaluation stage".to_string(),
        key_findings: vec![format!("Evaluation error: {detail}")],
        recommended_action: "Review previous stage results manually".to_string(),
        supporting_data: SupportingData {
            primary_values: Value::String("N/A".to_string()),
            alternatives: Value::String("N/A".to_string()),
            confidence: Confidence::Low,
        },
        data_quality: "poor - evaluation failed".to_string(),
        sql_executed: None,
        raw_response: None,
        parsing_note: None,
        error: Some(detail.to_string()),
    }
}

fn unescape(text: &str) -> String {
    text.replace("\\\"", "\"").replace("\\n", " ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use askwell_core::domain::results::{Confidence, IntermediateSelection};
    use askwell_core::domain::rows::Row;
    use askwell_core::errors::OrchestrationError;
    use askwell_core::telemetry::InMemoryTelemetry;
    use serde_json::json;

    use super::{parse_evaluation, EvaluationRequest, StageAnalyst};
    use crate::llm::{LlmError, ScriptedLlm};

    fn rows(values: serde_json::Value) -> Vec<Row> {
        values
            .as_array()
            .map(|items| items.iter().filter_map(|item| item.as_object().cloned()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn valid_evaluation_forces_null_sql() {
        let resolution = parse_evaluation(
            r#"Here you go: {"business_answer": "Use P-2", "key_findings": ["cheaper"],
                "recommended_action": "Order P-2", "sql_executed": "SELECT 1",
                "supporting_data": {"confidence": "high"}}"#,
        );

        assert!(!resolution.is_fallback());
        let evaluation = resolution.into_value();
        assert_eq!(evaluation.business_answer, "Use P-2");
        assert_eq!(evaluation.sql_executed, None);
        assert_eq!(evaluation.supporting_data.confidence, Confidence::High);
    }

    #[test]
    fn mistyped_fields_do_not_trigger_text_recovery() {
        let raw = r#"{"business_answer": "Ship K-3 first",
            "key_findings": [{"kit": "K-3", "status": "in stock"}, 4],
            "recommended_action": "Release order 118",
            "supporting_data": {"primary_values": {"K-3": 12}, "confidence": 0.9}}"#;

        let resolution = parse_evaluation(raw);

        assert!(!resolution.is_fallback());
        let evaluation = resolution.into_value();
        assert_eq!(evaluation.business_answer, "Ship K-3 first");
        assert_eq!(evaluation.key_findings, vec!["K-3; in stock", "4"]);
        assert_eq!(evaluation.recommended_action, "Release order 118");
        assert_eq!(evaluation.supporting_data.primary_values, json!({"K-3": 12}));
        assert_eq!(evaluation.supporting_data.confidence, Confidence::Medium);
        assert_eq!(evaluation.parsing_note, None);
    }

    #[test]
    fn non_object_reply_is_recovered_from_text() {
        let resolution = parse_evaluation(r#"["Ship K-3 first"]"#);

        assert!(resolution.is_fallback());
        assert_eq!(
            resolution.into_value().business_answer,
            "Analysis completed (JSON parsing issue)"
        );
    }

    #[test]
    fn malformed_evaluation_is_recovered_by_field() {
        let raw = r#"{"business_answer": "Switch to \"Model B\"\nnow",
            "key_findings": ["Lower cost", "Same \"gauge\"", ],
            "recommended_action": "Place order", "supporting_data": {oops}}"#;

        let resolution = parse_evaluation(raw);
        assert!(matches!(
            resolution.fallback_reason(),
            Some(OrchestrationError::EvaluationParse(_))
        ));
        let evaluation = resolution.into_value();
        assert_eq!(evaluation.business_answer, "Switch to \"Model B\" now");
        assert_eq!(evaluation.key_findings, vec!["Lower cost", "Same \"gauge\""]);
        assert_eq!(evaluation.recommended_action, "Place order");
        assert_eq!(evaluation.sql_executed, None);
        assert_eq!(
            evaluation.parsing_note.as_deref(),
            Some("JSON parsing failed, extracted from raw text")
        );
    }

    #[test]
    fn unrecoverable_text_uses_placeholders() {
        let evaluation = parse_evaluation("the model rambled").into_value();

        assert_eq!(evaluation.business_answer, "Analysis completed (JSON parsing issue)");
        assert_eq!(evaluation.key_findings.len(), 2);
        assert_eq!(evaluation.recommended_action, "Review the analysis results for insights");
        assert_eq!(evaluation.supporting_data.confidence, Confidence::Medium);
        assert_eq!(evaluation.raw_response.as_deref(), Some("the model rambled"));
    }

    #[test]
    fn long_raw_response_is_truncated() {
        let raw = format!("{{\"business_answer\": {}", "x".repeat(600));
        let evaluation = parse_evaluation(&raw).into_value();
        let stored = evaluation.raw_response.unwrap_or_default();
        assert_eq!(stored.chars().count(), 503);
        assert!(stored.ends_with("..."));
    }

    #[tokio::test]
    async fn intermediate_failure_uses_compressed_sample() {
        let telemetry = Arc::new(InMemoryTelemetry::default());
        let llm = Arc::new(ScriptedLlm::new("gpt-4o").reply("nope"));
        let analyst = StageAnalyst::new(llm, telemetry.clone(), 10);
        let discovery = rows(json!([
            {"id": 1, "kind": "kit"}, {"id": 2, "kind": "kit"},
            {"id": 3, "kind": "kit"}, {"id": 4, "kind": "kit"}
        ]));

        let resolution = analyst.select_intermediate("q", "ctx", &discovery, "req").await;

        assert!(resolution.is_fallback());
        let selection = resolution.into_value();
        assert_eq!(selection.summary, "Found 4 potential matches");
        assert_eq!(
            selection.selected_items,
            json!("Common: kind: kit | Variants: id: 1 | id: 2 | id: 3")
        );
        assert_eq!(selection.reasoning, "Automatic selection due to processing error");
        assert_eq!(telemetry.compression_stages(), vec!["stage1_intermediate"]);
        assert_eq!(telemetry.api_call_purposes(), vec!["stage2_intermediate"]);
    }

    #[tokio::test]
    async fn evaluation_call_failure_yields_error_evaluation() {
        let telemetry = Arc::new(InMemoryTelemetry::default());
        let analyst = StageAnalyst::new(
            Arc::new(ScriptedLlm::new("gpt-4o").fail(LlmError::Transport("reset".to_string()))),
            telemetry.clone(),
            10,
        );
        let selection = IntermediateSelection {
            summary: "s".to_string(),
            selected_items: json!(["P-1"]),
            reasoning: "r".to_string(),
            stage2_focus: "f".to_string(),
        };
        let detail = rows(json!([{"id": 1, "price": 3}]));

        let resolution = analyst
            .evaluate(
                EvaluationRequest {
                    question: "q",
                    persona_content: "ctx",
                    stage1_count: 2,
                    selection: &selection,
                    stage2_rows: &detail,
                },
                "req",
            )
            .await;

        assert!(resolution.is_fallback());
        let evaluation = resolution.into_value();
        assert_eq!(evaluation.business_answer, "Error during evaluation stage");
        assert_eq!(evaluation.supporting_data.confidence, Confidence::Low);
        assert!(evaluation.error.is_some());
        assert_eq!(evaluation.sql_executed, None);
        assert_eq!(telemetry.compression_stages(), vec!["stage3_evaluation"]);
    }
}
