use std::collections::BTreeMap;
use std::sync::Arc;

use askwell_core::config::AgentConfig;
use askwell_core::domain::classification::Classification;
use askwell_core::domain::results::ToolChainResult;
use askwell_core::persona::PersonaProvider;
use askwell_core::resolution::Resolution;
use askwell_core::sql::SqlGateway;
use askwell_core::telemetry::TelemetrySink;
use tracing::info;

use crate::analysis::StageAnalyst;
use crate::classifier::IntentClassifier;
use crate::direct_tools::{DirectToolRegistry, DirectToolRouter};
use crate::llm::LlmClient;
use crate::tools::ToolBox;
use crate::workflow::{WorkflowExecutor, WorkflowRun};

pub const ASK_ENDPOINT: &str = "ask";

/// Entry points consumed by transports: `classify`, `execute`, and `ask`
/// which wraps both in a telemetry session.
pub struct AgentRuntime {
    classifier: IntentClassifier,
    executor: WorkflowExecutor,
    personas: Arc<dyn PersonaProvider>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sql: Arc<dyn SqlGateway>,
        personas: Arc<dyn PersonaProvider>,
        telemetry: Arc<dyn TelemetrySink>,
        config: &AgentConfig,
    ) -> Self {
        Self::with_direct_tools(
            llm,
            sql,
            personas,
            telemetry,
            DirectToolRegistry::builtin(),
            config,
        )
    }

    pub fn with_direct_tools(
        llm: Arc<dyn LlmClient>,
        sql: Arc<dyn SqlGateway>,
        personas: Arc<dyn PersonaProvider>,
        telemetry: Arc<dyn TelemetrySink>,
        registry: DirectToolRegistry,
        config: &AgentConfig,
    ) -> Self {
        let classifier = IntentClassifier::new(
            llm.clone(),
            personas.clone(),
            telemetry.clone(),
            config.default_persona.clone(),
        );
        let executor = WorkflowExecutor::new(
            ToolBox::new(llm.clone(), sql.clone(), telemetry.clone(), config.sql_dialect),
            StageAnalyst::new(llm, telemetry.clone(), config.max_compressed_records),
            DirectToolRouter::new(Arc::new(registry), sql, telemetry.clone(), config.sql_dialect),
            personas.clone(),
            telemetry.clone(),
        );
        Self { classifier, executor, personas, telemetry }
    }

    pub async fn classify(
        &self,
        question: &str,
        request_id: Option<&str>,
    ) -> Resolution<Classification> {
        self.classifier.classify(question, request_id).await
    }

    pub async fn execute(
        &self,
        question: &str,
        classification: Classification,
        request_id: &str,
    ) -> ToolChainResult {
        self.executor.execute(question, classification, request_id).await
    }

    /// Classify then execute inside one telemetry session.
    pub async fn ask(&self, question: &str, request_id: &str) -> ToolChainResult {
        self.ask_traced(question, request_id).await.result
    }

    pub async fn ask_traced(&self, question: &str, request_id: &str) -> WorkflowRun {
        self.telemetry.start_request(request_id, ASK_ENDPOINT, question);
        info!(
            event_name = "agent.runtime.ask_started",
            correlation_id = request_id,
            "question received"
        );

        let classification = self.classify(question, Some(request_id)).await.into_value();
        let run = self.executor.execute_traced(question, classification, request_id).await;

        self.telemetry.end_request(request_id, run.result.error.is_none());
        run
    }

    pub fn personas(&self) -> BTreeMap<String, String> {
        self.personas.list_personas()
    }

    pub fn direct_tools(&self) -> &DirectToolRegistry {
        self.executor.router().registry()
    }

    /// Persona used when classification falls back.
    pub fn default_persona(&self) -> &str {
        self.classifier.default_persona()
    }

    pub fn model(&self) -> &str {
        self.classifier.model()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use askwell_core::config::AgentConfig;
    use askwell_core::persona::PersonaRegistry;
    use askwell_core::sql::SqlDialect;
    use askwell_core::telemetry::{InMemoryTelemetry, TelemetryEvent};
    use askwell_db::InMemorySqlGateway;

    use super::AgentRuntime;
    use crate::llm::ScriptedLlm;

    fn config() -> AgentConfig {
        AgentConfig {
            default_persona: "product_planning".to_string(),
            personas_path: None,
            max_compressed_records: 10,
            sql_dialect: SqlDialect::Sqlite,
        }
    }

    #[tokio::test]
    async fn ask_wraps_classification_and_execution_in_one_session() {
        let telemetry = Arc::new(InMemoryTelemetry::default());
        let llm = ScriptedLlm::new("gpt-4o")
            .reply(r#"{"persona": "product_planning", "tool_chain": ["run_sql_query"]}"#)
            .reply("SELECT 1");
        let runtime = AgentRuntime::new(
            Arc::new(llm),
            Arc::new(InMemorySqlGateway::new()),
            Arc::new(PersonaRegistry::builtin()),
            telemetry.clone(),
            &config(),
        );

        let result = runtime.ask("anything?", "req-9").await;

        assert_eq!(result.error, None);
        assert_eq!(telemetry.api_call_purposes(), vec!["intent_classification", "sql_generation"]);
        let events = telemetry.events();
        assert!(matches!(events.first(), Some(TelemetryEvent::Started { .. })));
        assert!(matches!(events.last(), Some(TelemetryEvent::Ended { success: true, .. })));
    }

    #[test]
    fn exposes_personas_and_direct_tools() {
        let runtime = AgentRuntime::new(
            Arc::new(ScriptedLlm::new("gpt-4o")),
            Arc::new(InMemorySqlGateway::new()),
            Arc::new(PersonaRegistry::builtin()),
            Arc::new(InMemoryTelemetry::default()),
            &config(),
        );

        assert!(runtime.personas().contains_key("sales_rep"));
        assert_eq!(runtime.direct_tools().stats().total_tools, 2);
    }
}
