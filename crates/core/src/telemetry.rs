//! Per-request telemetry contracts.
//!
//! Every sink method is fire-and-forget: implementations swallow their own
//! failures (including lock poisoning) so telemetry can never break a request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compression::CompressionStats;
use crate::domain::classification::Classification;

/// Call purposes that also count toward a timed phase.
pub const PURPOSE_CLASSIFICATION: &str = "intent_classification";
pub const PURPOSE_SQL_GENERATION: &str = "sql_generation";
pub const PURPOSE_INTERMEDIATE: &str = "stage2_intermediate";
pub const PURPOSE_EVALUATION: &str = "stage3_evaluation";

pub trait TelemetrySink: Send + Sync {
    fn start_request(&self, request_id: &str, endpoint: &str, question: &str);
    fn log_api_call(
        &self,
        request_id: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        purpose: &str,
    );
    fn log_tool_execution(
        &self,
        request_id: &str,
        tool: &str,
        duration_ms: f64,
        success: bool,
        result_count: Option<u64>,
    );
    fn log_sql_query(&self, request_id: &str, sql: &str, duration_ms: f64, result_count: u64);
    fn log_classification(&self, request_id: &str, classification: &Classification);
    fn log_compression(&self, request_id: &str, stage: &str, stats: &CompressionStats);
    fn log_error(&self, request_id: &str, error: &str, context: &str);
    fn end_request(&self, request_id: &str, success: bool);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    IntentClassification,
    SqlGeneration,
    SqlExecution,
}

impl Phase {
    pub const ALL: [Phase; 3] =
        [Self::IntentClassification, Self::SqlGeneration, Self::SqlExecution];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IntentClassification => "intent_classification",
            Self::SqlGeneration => "sql_generation",
            Self::SqlExecution => "sql_execution",
        }
    }

    fn for_purpose(purpose: &str) -> Option<Self> {
        match purpose {
            PURPOSE_CLASSIFICATION => Some(Self::IntentClassification),
            PURPOSE_SQL_GENERATION => Some(Self::SqlGeneration),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub duration_ms: f64,
    pub calls: u32,
    pub tokens: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub tool: String,
    pub duration_ms: f64,
    pub success: bool,
    pub result_count: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SqlQueryRecord {
    pub sql: String,
    pub duration_ms: f64,
    pub result_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error: String,
    pub context: String,
    pub occurred_at: DateTime<Utc>,
}

/// Accumulated metrics for one in-flight request.
#[derive(Clone, Debug)]
pub struct SessionMetrics {
    pub request_id: String,
    pub endpoint: String,
    pub question: String,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub last_mark: Instant,
    pub api_calls: u32,
    pub tokens_used: u64,
    pub tools_executed: Vec<ToolExecutionRecord>,
    pub sql_queries: Vec<SqlQueryRecord>,
    pub errors: Vec<ErrorRecord>,
    pub intent: Option<String>,
    pub persona: Option<String>,
    pub compression_savings: i64,
    pub phases: HashMap<Phase, PhaseTiming>,
}

impl SessionMetrics {
    pub fn new(request_id: &str, endpoint: &str, question: &str) -> Self {
        let now = Instant::now();
        Self {
            request_id: request_id.to_string(),
            endpoint: endpoint.to_string(),
            question: question.to_string(),
            started_at: Utc::now(),
            started: now,
            last_mark: now,
            api_calls: 0,
            tokens_used: 0,
            tools_executed: Vec::new(),
            sql_queries: Vec::new(),
            errors: Vec::new(),
            intent: None,
            persona: None,
            compression_savings: 0,
            phases: HashMap::new(),
        }
    }

    /// Attributes the time since the previous mark to `phase`.
    fn mark_phase(&mut self, phase: Phase, tokens: u64) {
        let now = Instant::now();
        let timing = self.phases.entry(phase).or_default();
        timing.duration_ms += now.duration_since(self.last_mark).as_secs_f64() * 1000.0;
        timing.calls += 1;
        timing.tokens += tokens;
        self.last_mark = now;
    }

    fn record_api_call(&mut self, tokens: u64, purpose: &str) {
        self.api_calls += 1;
        self.tokens_used += tokens;
        match Phase::for_purpose(purpose) {
            Some(phase) => self.mark_phase(phase, tokens),
            None => self.last_mark = Instant::now(),
        }
    }

    fn record_sql(&mut self, sql: &str, duration_ms: f64, result_count: u64) {
        self.sql_queries.push(SqlQueryRecord { sql: sql.to_string(), duration_ms, result_count });
        let timing = self.phases.entry(Phase::SqlExecution).or_default();
        timing.duration_ms += duration_ms;
        timing.calls += 1;
        self.last_mark = Instant::now();
    }

    pub fn summary(&self, success: bool) -> SessionSummary {
        SessionSummary {
            request_id: self.request_id.clone(),
            endpoint: self.endpoint.clone(),
            success,
            duration_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            api_calls: self.api_calls,
            tokens_used: self.tokens_used,
            tools_executed: self.tools_executed.len(),
            sql_queries: self.sql_queries.len(),
            errors: self.errors.len(),
            total_results: self.sql_queries.iter().map(|query| query.result_count).sum(),
            compression_savings: self.compression_savings,
            phase_durations_ms: Phase::ALL
                .into_iter()
                .map(|phase| {
                    let duration = self.phases.get(&phase).map(|timing| timing.duration_ms);
                    (phase.as_str().to_string(), duration.unwrap_or(0.0))
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub request_id: String,
    pub endpoint: String,
    pub success: bool,
    pub duration_ms: f64,
    pub api_calls: u32,
    pub tokens_used: u64,
    pub tools_executed: usize,
    pub sql_queries: usize,
    pub errors: usize,
    pub total_results: u64,
    pub compression_savings: i64,
    pub phase_durations_ms: Vec<(String, f64)>,
}

/// Request-id keyed metrics. Each request owns its key from
/// `start` until `finish`.
#[derive(Clone, Default)]
pub struct SessionMetricsStore {
    sessions: Arc<Mutex<HashMap<String, SessionMetrics>>>,
}

impl SessionMetricsStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionMetrics>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn start(&self, request_id: &str, endpoint: &str, question: &str) {
        self.lock()
            .insert(request_id.to_string(), SessionMetrics::new(request_id, endpoint, question));
    }

    /// Applies `update` to the session if it exists. Returns whether it did.
    pub fn update(&self, request_id: &str, update: impl FnOnce(&mut SessionMetrics)) -> bool {
        match self.lock().get_mut(request_id) {
            Some(session) => {
                update(session);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, request_id: &str) -> Option<SessionMetrics> {
        self.lock().get(request_id).cloned()
    }

    pub fn finish(&self, request_id: &str) -> Option<SessionMetrics> {
        self.lock().remove(request_id)
    }

    pub fn active(&self) -> usize {
        self.lock().len()
    }
}

/// Sink that keeps session metrics and emits `tracing` events.
#[derive(Clone, Default)]
pub struct TracingTelemetry {
    store: SessionMetricsStore,
}

impl TracingTelemetry {
    pub fn new(store: SessionMetricsStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SessionMetricsStore {
        &self.store
    }
}

impl TelemetrySink for TracingTelemetry {
    fn start_request(&self, request_id: &str, endpoint: &str, question: &str) {
        self.store.start(request_id, endpoint, question);
        info!(
            event_name = "telemetry.request.started",
            correlation_id = %request_id,
            endpoint = %endpoint,
            question_chars = question.chars().count(),
            "request started"
        );
    }

    fn log_api_call(
        &self,
        request_id: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        purpose: &str,
    ) {
        let tokens = prompt_tokens + completion_tokens;
        self.store.update(request_id, |session| session.record_api_call(tokens, purpose));
        info!(
            event_name = "telemetry.llm.call",
            correlation_id = %request_id,
            model = %model,
            prompt_tokens,
            completion_tokens,
            purpose = %purpose,
            "llm call completed"
        );
    }

    fn log_tool_execution(
        &self,
        request_id: &str,
        tool: &str,
        duration_ms: f64,
        success: bool,
        result_count: Option<u64>,
    ) {
        self.store.update(request_id, |session| {
            session.tools_executed.push(ToolExecutionRecord {
                tool: tool.to_string(),
                duration_ms,
                success,
                result_count,
            })
        });
        info!(
            event_name = "telemetry.tool.executed",
            correlation_id = %request_id,
            tool = %tool,
            duration_ms,
            success,
            result_count = result_count.unwrap_or(0),
            "tool executed"
        );
    }

    fn log_sql_query(&self, request_id: &str, sql: &str, duration_ms: f64, result_count: u64) {
        self.store.update(request_id, |session| session.record_sql(sql, duration_ms, result_count));
        info!(
            event_name = "telemetry.sql.executed",
            correlation_id = %request_id,
            duration_ms,
            result_count,
            sql_chars = sql.chars().count(),
            "sql query executed"
        );
    }

    fn log_classification(&self, request_id: &str, classification: &Classification) {
        self.store.update(request_id, |session| {
            session.intent = Some(classification.intent.clone());
            session.persona = Some(classification.persona.clone());
        });
        info!(
            event_name = "telemetry.classification",
            correlation_id = %request_id,
            intent = %classification.intent,
            persona = %classification.persona,
            confidence = classification.confidence,
            strategy = classification.execution_strategy.as_str(),
            tool_chain = %classification.tool_chain.join(","),
            "question classified"
        );
    }

    fn log_compression(&self, request_id: &str, stage: &str, stats: &CompressionStats) {
        self.store.update(request_id, |session| session.compression_savings += stats.token_savings);
        info!(
            event_name = "telemetry.compression",
            correlation_id = %request_id,
            stage = %stage,
            original_size = stats.original_size,
            compressed_size = stats.compressed_size,
            compression_ratio = stats.compression_ratio,
            "row set compressed for prompt"
        );
    }

    fn log_error(&self, request_id: &str, error: &str, context: &str) {
        self.store.update(request_id, |session| {
            session.errors.push(ErrorRecord {
                error: error.to_string(),
                context: context.to_string(),
                occurred_at: Utc::now(),
            })
        });
        warn!(
            event_name = "telemetry.error",
            correlation_id = %request_id,
            context = %context,
            error = %error,
            "request error recorded"
        );
    }

    fn end_request(&self, request_id: &str, success: bool) {
        let Some(session) = self.store.finish(request_id) else {
            warn!(
                event_name = "telemetry.request.unknown",
                correlation_id = %request_id,
                "end_request for unknown request id"
            );
            return;
        };
        let summary = session.summary(success);
        let phases = summary
            .phase_durations_ms
            .iter()
            .map(|(phase, duration)| format!("{phase}={duration:.1}ms"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            event_name = "telemetry.request.completed",
            correlation_id = %request_id,
            endpoint = %summary.endpoint,
            success,
            duration_ms = summary.duration_ms,
            api_calls = summary.api_calls,
            tokens_used = summary.tokens_used,
            tools_executed = summary.tools_executed,
            sql_queries = summary.sql_queries,
            errors = summary.errors,
            total_results = summary.total_results,
            compression_savings = summary.compression_savings,
            phases = %phases,
            "request completed"
        );
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryEvent {
    Started { request_id: String, endpoint: String, question: String },
    ApiCall {
        request_id: String,
        model: String,
        prompt_tokens: u64,
        completion_tokens: u64,
        purpose: String,
    },
    ToolExecution { request_id: String, tool: String, success: bool, result_count: Option<u64> },
    SqlQuery { request_id: String, sql: String, result_count: u64 },
    Classified { request_id: String, intent: String, persona: String },
    Compression { request_id: String, stage: String, stats: CompressionStats },
    Error { request_id: String, error: String, context: String },
    Ended { request_id: String, success: bool },
}

/// Recording sink for tests.
#[derive(Clone, Default)]
pub struct InMemoryTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl InMemoryTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn api_call_purposes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::ApiCall { purpose, .. } => Some(purpose),
                _ => None,
            })
            .collect()
    }

    pub fn compression_stages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::Compression { stage, .. } => Some(stage),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: TelemetryEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl TelemetrySink for InMemoryTelemetry {
    fn start_request(&self, request_id: &str, endpoint: &str, question: &str) {
        self.push(TelemetryEvent::Started {
            request_id: request_id.to_string(),
            endpoint: endpoint.to_string(),
            question: question.to_string(),
        });
    }

    fn log_api_call(
        &self,
        request_id: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        purpose: &str,
    ) {
        self.push(TelemetryEvent::ApiCall {
            request_id: request_id.to_string(),
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            purpose: purpose.to_string(),
        });
    }

    fn log_tool_execution(
        &self,
        request_id: &str,
        tool: &str,
        _duration_ms: f64,
        success: bool,
        result_count: Option<u64>,
    ) {
        self.push(TelemetryEvent::ToolExecution {
            request_id: request_id.to_string(),
            tool: tool.to_string(),
            success,
            result_count,
        });
    }

    fn log_sql_query(&self, request_id: &str, sql: &str, _duration_ms: f64, result_count: u64) {
        self.push(TelemetryEvent::SqlQuery {
            request_id: request_id.to_string(),
            sql: sql.to_string(),
            result_count,
        });
    }

    fn log_classification(&self, request_id: &str, classification: &Classification) {
        self.push(TelemetryEvent::Classified {
            request_id: request_id.to_string(),
            intent: classification.intent.clone(),
            persona: classification.persona.clone(),
        });
    }

    fn log_compression(&self, request_id: &str, stage: &str, stats: &CompressionStats) {
        self.push(TelemetryEvent::Compression {
            request_id: request_id.to_string(),
            stage: stage.to_string(),
            stats: stats.clone(),
        });
    }

    fn log_error(&self, request_id: &str, error: &str, context: &str) {
        self.push(TelemetryEvent::Error {
            request_id: request_id.to_string(),
            error: error.to_string(),
            context: context.to_string(),
        });
    }

    fn end_request(&self, request_id: &str, success: bool) {
        self.push(TelemetryEvent::Ended { request_id: request_id.to_string(), success });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        InMemoryTelemetry, Phase, SessionMetricsStore, TelemetryEvent, TelemetrySink,
        TracingTelemetry, PURPOSE_CLASSIFICATION, PURPOSE_EVALUATION, PURPOSE_SQL_GENERATION,
    };
    use crate::compression::CompressionStats;

    #[test]
    fn tracing_sink_accumulates_and_deletes_session() {
        let telemetry = TracingTelemetry::default();
        telemetry.start_request("req-1", "/ask", "top products?");
        telemetry.log_api_call("req-1", "gpt-4o", 100, 20, PURPOSE_CLASSIFICATION);
        telemetry.log_api_call("req-1", "gpt-4o", 300, 40, PURPOSE_SQL_GENERATION);
        telemetry.log_api_call("req-1", "gpt-4o", 50, 10, PURPOSE_EVALUATION);
        telemetry.log_sql_query("req-1", "SELECT 1", 12.0, 3);
        telemetry.log_tool_execution("req-1", "run_sql_query", 15.0, true, Some(3));
        telemetry.log_error("req-1", "boom", "stage2");
        telemetry.log_compression(
            "req-1",
            "stage3_evaluation",
            &CompressionStats { token_savings: 42, ..CompressionStats::default() },
        );

        let snapshot = telemetry.store().snapshot("req-1").expect("session should be active");
        assert_eq!(snapshot.api_calls, 3);
        assert_eq!(snapshot.tokens_used, 520);
        assert_eq!(snapshot.compression_savings, 42);
        assert_eq!(snapshot.phases.get(&Phase::IntentClassification).map(|p| p.tokens), Some(120));
        assert_eq!(snapshot.phases.get(&Phase::SqlExecution).map(|p| p.calls), Some(1));

        let summary = snapshot.summary(true);
        assert_eq!(summary.sql_queries, 1);
        assert_eq!(summary.total_results, 3);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.phase_durations_ms.len(), 3);

        telemetry.end_request("req-1", true);
        assert!(telemetry.store().snapshot("req-1").is_none());
        assert_eq!(telemetry.store().active(), 0);
    }

    #[test]
    fn unknown_request_ids_are_ignored() {
        let telemetry = TracingTelemetry::default();
        telemetry.log_api_call("missing", "gpt-4o", 1, 1, PURPOSE_CLASSIFICATION);
        telemetry.end_request("missing", false);
        assert_eq!(telemetry.store().active(), 0);
    }

    #[test]
    fn concurrent_sessions_do_not_share_state() {
        let store = SessionMetricsStore::default();
        let telemetry = Arc::new(TracingTelemetry::new(store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|index| {
                let telemetry = Arc::clone(&telemetry);
                std::thread::spawn(move || {
                    let id = format!("req-{index}");
                    telemetry.start_request(&id, "/ask", "q");
                    for _ in 0..=index {
                        telemetry.log_sql_query(&id, "SELECT 1", 1.0, 1);
                    }
                    telemetry.store().snapshot(&id).map(|session| session.sql_queries.len())
                })
            })
            .collect();

        for (index, handle) in handles.into_iter().enumerate() {
            let count = handle.join().expect("thread should not panic");
            assert_eq!(count, Some(index + 1));
        }
        assert_eq!(store.active(), 8);
    }

    #[test]
    fn in_memory_sink_records_events_in_order() {
        let sink = InMemoryTelemetry::default();
        sink.start_request("req-9", "/classify", "q");
        sink.log_api_call("req-9", "o1-mini", 5, 6, PURPOSE_CLASSIFICATION);
        sink.end_request("req-9", true);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            TelemetryEvent::Started { ref endpoint, .. } if endpoint == "/classify"
        ));
        assert_eq!(sink.api_call_purposes(), vec![PURPOSE_CLASSIFICATION.to_string()]);
        assert!(matches!(events[2], TelemetryEvent::Ended { success: true, .. }));
    }
}
