//! Drives one classified question through the direct-tool fast path or the
//! single/multi-stage tool workflow, then composes the answer.

use std::sync::Arc;
use std::time::Instant;

use askwell_core::domain::classification::{Classification, ExecutionStrategy, ToolName};
use askwell_core::domain::results::{ToolChainResult, ToolResults};
use askwell_core::domain::rows::Row;
use askwell_core::errors::OrchestrationError;
use askwell_core::flows::{WorkflowEvent, WorkflowState, WorkflowTrace};
use askwell_core::persona::PersonaProvider;
use askwell_core::telemetry::TelemetrySink;
use tracing::{debug, error, info, warn};

use crate::analysis::{EvaluationRequest, StageAnalyst};
use crate::composer::compose;
use crate::direct_tools::{DirectToolOutcome, DirectToolRouter};
use crate::prompts;
use crate::tools::{generate_visualization, summarize_results, ToolBox};

const DIRECT_TOOL_ERROR_KEY: &str = "direct_tool_execution";
const VISUALIZATION_CHART: &str = "table";

/// A finished request together with the states it passed through.
#[derive(Debug)]
pub struct WorkflowRun {
    pub result: ToolChainResult,
    pub trace: WorkflowTrace,
}

pub struct WorkflowExecutor {
    tools: ToolBox,
    analyst: StageAnalyst,
    router: DirectToolRouter,
    personas: Arc<dyn PersonaProvider>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl WorkflowExecutor {
    pub fn new(
        tools: ToolBox,
        analyst: StageAnalyst,
        router: DirectToolRouter,
        personas: Arc<dyn PersonaProvider>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self { tools, analyst, router, personas, telemetry }
    }

    pub fn router(&self) -> &DirectToolRouter {
        &self.router
    }

    pub async fn execute(
        &self,
        question: &str,
        classification: Classification,
        request_id: &str,
    ) -> ToolChainResult {
        self.execute_traced(question, classification, request_id).await.result
    }

    /// Always produces a response. A fatal failure sets `error` and an
    /// apology as the final response; every other failure degrades in place.
    pub async fn execute_traced(
        &self,
        question: &str,
        classification: Classification,
        request_id: &str,
    ) -> WorkflowRun {
        let persona = classification.persona.clone();
        let persona_content = match self.personas.load(&persona) {
            Ok(content) => content,
            Err(err) => {
                warn!(
                    event_name = "agent.workflow.persona_missing",
                    correlation_id = request_id,
                    persona = %persona,
                    error = %err,
                    "persona content unavailable; continuing without it"
                );
                String::new()
            }
        };

        let mut trace = WorkflowTrace::default();
        let mut tool_results = ToolResults::default();
        let outcome = self
            .run(
                question,
                &classification,
                &persona_content,
                request_id,
                &mut tool_results,
                &mut trace,
            )
            .await;

        let (final_response, failure) = match outcome {
            Ok(()) => {
                let suggestions = classification
                    .intent
                    .contains(persona.as_str())
                    .then(|| self.personas.suggestions(&persona))
                    .flatten();
                (compose(question, &tool_results, suggestions.as_deref()), None)
            }
            Err(err) => {
                self.telemetry.log_error(request_id, &err.to_string(), err.kind());
                error!(
                    event_name = "agent.workflow.failed",
                    correlation_id = request_id,
                    kind = err.kind(),
                    error = %err,
                    "workflow could not complete"
                );
                (err.apology(), Some(err.to_string()))
            }
        };

        if trace.state() == WorkflowState::ResponseSynthesis {
            if let Err(err) = trace.advance(WorkflowEvent::ResponseComposed) {
                warn!(
                    event_name = "agent.workflow.transition_rejected",
                    correlation_id = request_id,
                    error = %err,
                    "response composed outside synthesis"
                );
            }
        }
        info!(
            event_name = "agent.workflow.completed",
            correlation_id = request_id,
            persona = %persona,
            final_state = ?trace.state(),
            failed = failure.is_some(),
            "workflow completed"
        );

        WorkflowRun {
            result: ToolChainResult {
                persona_used: persona,
                classification,
                tool_results,
                final_response,
                error: failure,
            },
            trace,
        }
    }

    async fn run(
        &self,
        question: &str,
        classification: &Classification,
        persona_content: &str,
        request_id: &str,
        results: &mut ToolResults,
        trace: &mut WorkflowTrace,
    ) -> Result<(), OrchestrationError> {
        match self.router.route(question, classification, request_id).await {
            DirectToolOutcome::Answered(run) => {
                trace.advance(WorkflowEvent::DirectToolAnswered)?;
                let rows = run.results.clone();
                results.direct_tool_execution = Some(run);
                self.run_follow_up_tools(question, classification, &rows, results, request_id);
                trace.advance(WorkflowEvent::StagesCompleted)?;
                return Ok(());
            }
            DirectToolOutcome::NoMatch(run) => {
                debug!(
                    event_name = "agent.workflow.direct_tool_no_match",
                    correlation_id = request_id,
                    tool = %run.tool,
                    "direct tool matched nothing; running general workflow"
                );
                results.direct_tool_execution = Some(run);
            }
            DirectToolOutcome::Failed { error, .. } => {
                results.tool_errors.insert(DIRECT_TOOL_ERROR_KEY.to_string(), error.to_string());
            }
            DirectToolOutcome::NotApplicable => {}
        }

        let strategy = classification.execution_strategy;
        trace.advance(WorkflowEvent::StrategySelected(strategy))?;

        let failed_tool = match strategy {
            ExecutionStrategy::SingleStage => {
                let outcome = self
                    .single_stage(question, classification, persona_content, results, request_id)
                    .await;
                if let Err(err) = outcome {
                    trace.advance(WorkflowEvent::ToolFailed {
                        tool: ToolName::RunSqlQuery.as_str().to_string(),
                    })?;
                    return Err(err);
                }
                None
            }
            // Iterative refinement has no loop of its own yet.
            ExecutionStrategy::MultiStage | ExecutionStrategy::Iterative => {
                self.multi_stage(question, classification, persona_content, results, request_id)
                    .await
            }
        };

        let event = match failed_tool {
            Some(tool) => WorkflowEvent::ToolFailed { tool: tool.to_string() },
            None => WorkflowEvent::StagesCompleted,
        };
        trace.advance(event)?;
        Ok(())
    }

    async fn single_stage(
        &self,
        question: &str,
        classification: &Classification,
        persona_content: &str,
        results: &mut ToolResults,
        request_id: &str,
    ) -> Result<(), OrchestrationError> {
        let context =
            prompts::single_stage_context(&classification.persona, persona_content, question);

        for tool in classification.tools() {
            match tool {
                ToolName::GetMetadata => {
                    debug!(
                        event_name = "agent.workflow.metadata_skipped",
                        correlation_id = request_id,
                        strategy = classification.metadata_strategy.as_str(),
                        "metadata discovery uses static persona schemas"
                    );
                }
                ToolName::RunSqlQuery => {
                    let outcome = self.tools.run_sql_query(&context, request_id).await;
                    let failure = outcome.error.clone();
                    results.run_sql_query = Some(outcome);
                    if let Some(message) = failure {
                        return Err(OrchestrationError::Fatal(format!(
                            "the SQL tool could not run: {message}"
                        )));
                    }
                }
                ToolName::SummarizeResults | ToolName::GenerateVisualization => {
                    let rows = results
                        .run_sql_query
                        .as_ref()
                        .map(|outcome| outcome.results.clone())
                        .unwrap_or_default();
                    if !rows.is_empty() {
                        self.run_tool(tool, question, classification, &rows, results, request_id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Discovery, intermediate selection, analysis and evaluation. Returns
    /// the stage whose SQL failed, if any; the run continues on what exists.
    async fn multi_stage(
        &self,
        question: &str,
        classification: &Classification,
        persona_content: &str,
        results: &mut ToolResults,
        request_id: &str,
    ) -> Option<&'static str> {
        let stage1_context = prompts::stage1_context(persona_content, question);
        let stage1 = self.tools.run_sql_query(&stage1_context, request_id).await;
        let mut failed_stage = stage1.error.as_ref().map(|_| "stage1_query");
        let stage1_rows = stage1.results.clone();
        results.stages.stage1_query = Some(stage1);

        let mut final_rows = stage1_rows.clone();
        if stage1_rows.is_empty() {
            info!(
                event_name = "agent.workflow.discovery_empty",
                correlation_id = request_id,
                "discovery returned no rows; skipping analysis and evaluation"
            );
        } else {
            let selection = self
                .analyst
                .select_intermediate(question, persona_content, &stage1_rows, request_id)
                .await
                .into_value();

            let stage2_context = prompts::stage2_context(
                persona_content,
                question,
                &selection.summary,
                &selection.selected_items_text(),
            );
            let stage2 = self.tools.run_sql_query(&stage2_context, request_id).await;
            if stage2.error.is_some() {
                failed_stage = Some("stage2_query");
            }

            if stage2.has_rows() {
                let evaluation = self
                    .analyst
                    .evaluate(
                        EvaluationRequest {
                            question,
                            persona_content,
                            stage1_count: stage1_rows.len(),
                            selection: &selection,
                            stage2_rows: stage2.rows(),
                        },
                        request_id,
                    )
                    .await
                    .into_value();
                results.stages.stage3_evaluation = Some(evaluation);
                final_rows = stage2.results.clone();
            }
            results.stages.intermediate_analysis = Some(selection);
            results.stages.stage2_query = Some(stage2);
        }

        self.run_follow_up_tools(question, classification, &final_rows, results, request_id);
        failed_stage
    }

    /// Summarization and visualization over the final rows, in chain order.
    fn run_follow_up_tools(
        &self,
        question: &str,
        classification: &Classification,
        rows: &[Row],
        results: &mut ToolResults,
        request_id: &str,
    ) {
        if rows.is_empty() {
            return;
        }
        for tool in classification.tools() {
            if matches!(tool, ToolName::SummarizeResults | ToolName::GenerateVisualization) {
                self.run_tool(tool, question, classification, rows, results, request_id);
            }
        }
    }

    fn run_tool(
        &self,
        tool: ToolName,
        question: &str,
        classification: &Classification,
        rows: &[Row],
        results: &mut ToolResults,
        request_id: &str,
    ) {
        let started = Instant::now();
        let succeeded = match tool {
            ToolName::SummarizeResults => {
                results.summarize_results = Some(summarize_results(rows, &classification.intent));
                true
            }
            ToolName::GenerateVisualization => {
                let title = format!("Results for: {question}");
                match generate_visualization(rows, VISUALIZATION_CHART, Some(&title)) {
                    Ok(visualization) => {
                        results.generate_visualization = Some(visualization);
                        true
                    }
                    Err(message) => {
                        results.tool_errors.insert(tool.as_str().to_string(), message);
                        false
                    }
                }
            }
            ToolName::GetMetadata | ToolName::RunSqlQuery => return,
        };
        self.telemetry.log_tool_execution(
            request_id,
            tool.as_str(),
            started.elapsed().as_secs_f64() * 1000.0,
            succeeded,
            succeeded.then_some(rows.len() as u64),
        );
    }
}
