use std::sync::Arc;

use askwell_core::domain::classification::{
    Classification, ExecutionStrategy, MetadataStrategy, FALLBACK_TOOL_CHAIN, GENERAL_QUERY_INTENT,
};
use askwell_core::errors::OrchestrationError;
use askwell_core::persona::PersonaProvider;
use askwell_core::resolution::Resolution;
use askwell_core::telemetry::{TelemetrySink, PURPOSE_CLASSIFICATION};
use serde_json::Map;
use tracing::{info, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::prompts::{self, CLASSIFIER_SYSTEM};

const CLASSIFIER_MAX_TOKENS: u32 = 500;
const FALLBACK_DETAIL_CHARS: usize = 50;

/// Turns a question into a [`Classification`]. Never fails: malformed or
/// missing model output resolves to the fixed fallback classification.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    personas: Arc<dyn PersonaProvider>,
    telemetry: Arc<dyn TelemetrySink>,
    default_persona: String,
}

impl IntentClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        personas: Arc<dyn PersonaProvider>,
        telemetry: Arc<dyn TelemetrySink>,
        default_persona: impl Into<String>,
    ) -> Self {
        Self { llm, personas, telemetry, default_persona: default_persona.into() }
    }

    pub async fn classify(
        &self,
        question: &str,
        request_id: Option<&str>,
    ) -> Resolution<Classification> {
        let catalogue = self.personas.list_personas();
        let summaries = prompts::persona_summaries(&catalogue, |name| self.personas.tables(name));
        let request = CompletionRequest::new(
            vec![
                ChatMessage::system(CLASSIFIER_SYSTEM),
                ChatMessage::user(prompts::classification_prompt(question, &summaries)),
            ],
            CLASSIFIER_MAX_TOKENS,
            PURPOSE_CLASSIFICATION,
        );

        let resolution = match self.llm.complete(&request).await {
            Ok(completion) => {
                if let Some(request_id) = request_id {
                    self.telemetry.log_api_call(
                        request_id,
                        self.llm.model(),
                        completion.usage.prompt_tokens,
                        completion.usage.completion_tokens,
                        PURPOSE_CLASSIFICATION,
                    );
                }
                match parse_classification(&completion.content) {
                    Ok(classification) => Resolution::Parsed(classification),
                    Err(detail) => self.fallback(detail),
                }
            }
            Err(error) => self.fallback(error.to_string()),
        };

        let correlation_id = request_id.unwrap_or("none");
        if let Some(reason) = resolution.fallback_reason() {
            warn!(
                event_name = "agent.classifier.fallback",
                correlation_id,
                model = self.llm.model(),
                reason = %reason,
                "classification fell back to default persona"
            );
        } else {
            let classification = resolution.value();
            info!(
                event_name = "agent.classifier.classified",
                correlation_id,
                persona = %classification.persona,
                strategy = classification.execution_strategy.as_str(),
                confidence = classification.confidence,
                "question classified"
            );
        }
        if let Some(request_id) = request_id {
            self.telemetry.log_classification(request_id, resolution.value());
        }

        resolution
    }

    pub fn default_persona(&self) -> &str {
        &self.default_persona
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    pub fn fallback_classification(&self, detail: &str) -> Classification {
        let detail: String = detail.chars().take(FALLBACK_DETAIL_CHARS).collect();
        Classification {
            intent: GENERAL_QUERY_INTENT.to_string(),
            persona: self.default_persona.clone(),
            confidence: 0.5,
            execution_strategy: ExecutionStrategy::SingleStage,
            metadata_strategy: MetadataStrategy::Skip,
            tool_chain: FALLBACK_TOOL_CHAIN.iter().map(|tool| tool.as_str().to_string()).collect(),
            reasoning: format!("Fallback due to {} response issue: {detail}", self.llm.model()),
            extracted_entities: Map::new(),
            actual_tables: self.personas.tables(&self.default_persona),
            requires_intermediate_processing: false,
        }
    }

    fn fallback(&self, detail: String) -> Resolution<Classification> {
        let value = self.fallback_classification(&detail);
        Resolution::fallback(value, OrchestrationError::ClassificationParse(detail))
    }
}

/// Slices the JSON object out of a model reply. Blank replies become `{}`;
/// a ```json fence wins over brace scanning.
pub fn extract_json_block(content: &str) -> &str {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return "{}";
    }
    if let Some(start) = trimmed.find("```json") {
        let body = &trimmed[start + "```json".len()..];
        let end = body.find("```").unwrap_or(body.len());
        return body[..end].trim();
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Parses a classifier reply. The error string feeds the fallback reasoning.
pub fn parse_classification(content: &str) -> Result<Classification, String> {
    let value: serde_json::Value =
        serde_json::from_str(extract_json_block(content)).map_err(|error| error.to_string())?;
    let object = value.as_object().ok_or_else(|| "response is not a JSON object".to_string())?;
    if object.is_empty() {
        return Err("empty classification response".to_string());
    }
    match object.get("persona").and_then(serde_json::Value::as_str) {
        Some(persona) if !persona.trim().is_empty() => {}
        _ => return Err("Missing required fields in classification response".to_string()),
    }
    serde_json::from_value::<Classification>(value)
        .map(Classification::normalize)
        .map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use askwell_core::domain::classification::{ExecutionStrategy, MetadataStrategy, ToolName};
    use askwell_core::persona::PersonaRegistry;
    use askwell_core::telemetry::{InMemoryTelemetry, TelemetryEvent};

    use super::{extract_json_block, parse_classification, IntentClassifier};
    use crate::llm::{LlmError, ScriptedLlm};

    fn classifier(llm: ScriptedLlm, telemetry: Arc<InMemoryTelemetry>) -> IntentClassifier {
        IntentClassifier::new(
            Arc::new(llm),
            Arc::new(PersonaRegistry::builtin()),
            telemetry,
            "product_planning",
        )
    }

    #[test]
    fn json_block_extraction_handles_fences_and_prose() {
        assert_eq!(extract_json_block("   "), "{}");
        assert_eq!(extract_json_block("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(
            extract_json_block("Sure! {\"a\": {\"b\": 2}} hope that helps"),
            "{\"a\": {\"b\": 2}}"
        );
        assert_eq!(extract_json_block("no json here"), "no json here");
    }

    #[test]
    fn parsed_classification_keeps_model_choices() {
        let classification = parse_classification(
            r#"{"intent": "parts_lookup", "persona": "product_planning", "confidence": 0.9,
                "execution_strategy": "multi_stage", "metadata_strategy": "skip",
                "tool_chain": ["run_sql_query", "generate_visualization"],
                "extracted_entities": {"product_codes": "P-1, P-2"}}"#,
        )
        .expect("valid classification");

        assert_eq!(classification.execution_strategy, ExecutionStrategy::MultiStage);
        assert!(classification.has_tool(ToolName::GenerateVisualization));
        assert_eq!(classification.entity_values("product_codes"), vec!["P-1", "P-2"]);
    }

    #[tokio::test]
    async fn loosely_typed_reply_keeps_model_persona() {
        let telemetry = Arc::new(InMemoryTelemetry::default());
        let llm = ScriptedLlm::new("gpt-4o").reply(
            r#"{"intent": "pricing", "persona": "sales_rep", "confidence": "high",
                "execution_strategy": "parallel", "tool_chain": null,
                "extracted_entities": null, "reasoning": null}"#,
        );
        let resolution = classifier(llm, telemetry).classify("q", Some("req-2")).await;

        assert!(!resolution.is_fallback());
        let classification = resolution.into_value();
        assert_eq!(classification.persona, "sales_rep");
        assert_eq!(classification.intent, "pricing");
        assert_eq!(classification.confidence, 0.5);
        assert_eq!(classification.execution_strategy, ExecutionStrategy::SingleStage);
        assert!(classification.has_tool(ToolName::RunSqlQuery));
    }

    #[test]
    fn missing_persona_is_rejected() {
        assert!(parse_classification(r#"{"intent": "x"}"#).is_err());
        assert!(parse_classification("").is_err());
        assert!(parse_classification("not json").is_err());
    }

    #[tokio::test]
    async fn missing_persona_yields_documented_fallback() {
        let telemetry = Arc::new(InMemoryTelemetry::default());
        let llm = ScriptedLlm::new("gpt-4o").reply(r#"{"intent": "sales"}"#);
        let resolution = classifier(llm, telemetry.clone()).classify("q", Some("req-1")).await;

        assert!(resolution.is_fallback());
        let classification = resolution.into_value();
        assert_eq!(classification.intent, "general_query");
        assert_eq!(classification.persona, "product_planning");
        assert_eq!(classification.confidence, 0.5);
        assert_eq!(classification.execution_strategy, ExecutionStrategy::SingleStage);
        assert_eq!(classification.metadata_strategy, MetadataStrategy::Skip);
        assert_eq!(classification.tool_chain, vec!["run_sql_query", "summarize_results"]);
        assert!(!classification.requires_intermediate_processing);
        assert_eq!(classification.actual_tables, vec!["product_master", "part_master"]);
        assert_eq!(
            classification.reasoning,
            "Fallback due to gpt-4o response issue: Missing required fields in \
             classification response"
        );
        assert_eq!(telemetry.api_call_purposes(), vec!["intent_classification"]);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_without_logging_api_call() {
        let telemetry = Arc::new(InMemoryTelemetry::default());
        let llm = ScriptedLlm::new("gpt-5").fail(LlmError::EmptyChoices);
        let resolution = classifier(llm, telemetry.clone()).classify("q", Some("req-2")).await;

        assert!(resolution.is_fallback());
        assert!(telemetry.api_call_purposes().is_empty());
        assert!(telemetry
            .events()
            .iter()
            .any(|event| matches!(event, TelemetryEvent::Classified { .. })));
    }

    #[tokio::test]
    async fn empty_reply_is_treated_as_empty_object() {
        let telemetry = Arc::new(InMemoryTelemetry::default());
        let llm = ScriptedLlm::new("gpt-5").reply("");
        let resolution = classifier(llm, telemetry).classify("q", None).await;

        assert!(resolution.is_fallback());
        assert_eq!(resolution.value().persona, "product_planning");
    }

    #[tokio::test]
    async fn fenced_reply_is_parsed() {
        let telemetry = Arc::new(InMemoryTelemetry::default());
        let llm = ScriptedLlm::new("gpt-4o").reply(
            "```json\n{\"persona\": \"sales_rep\", \"tool_chain\": []}\n```",
        );
        let resolution = classifier(llm, telemetry).classify("q", None).await;

        assert!(!resolution.is_fallback());
        let classification = resolution.into_value();
        assert_eq!(classification.persona, "sales_rep");
        assert_eq!(classification.tool_chain, vec!["run_sql_query", "summarize_results"]);
    }
}
