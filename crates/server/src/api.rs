//! Question-answering routes.
//!
//! - `POST /ask`          classify and execute one question
//! - `POST /classify`     classification only
//! - `GET  /personas`     persona name to description
//! - `GET  /direct-tools` direct tool catalogue and registry stats

use std::collections::BTreeMap;
use std::sync::Arc;

use askwell_agent::direct_tools::{DirectToolInfo, RegistryStats};
use askwell_agent::AgentRuntime;
use askwell_core::domain::classification::Classification;
use askwell_core::domain::results::ToolChainResult;
use askwell_core::errors::{ApplicationError, InterfaceError};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub result: ToolChainResult,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub request_id: String,
    pub classification: Classification,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DirectToolsResponse {
    pub tools: BTreeMap<String, Vec<DirectToolInfo>>,
    pub stats: RegistryStats,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub request_id: String,
}

type Rejection = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, Rejection>;

pub fn status_of(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn reject(error: InterfaceError) -> Rejection {
    let status = status_of(&error);
    let body = ApiError {
        error: error.message().to_string(),
        request_id: error.correlation_id().to_string(),
    };
    (status, Json(body))
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/ask", post(ask))
        .route("/classify", post(classify))
        .route("/personas", get(personas))
        .route("/direct-tools", get(direct_tools))
        .with_state(ApiState { runtime })
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn validated_question(request: &QuestionRequest, request_id: &str) -> Result<String, Rejection> {
    let question = request.question.trim();
    if question.is_empty() {
        warn!(
            event_name = "api.request.rejected",
            correlation_id = request_id,
            "empty question rejected"
        );
        let error = ApplicationError::InvalidRequest("question must not be empty".to_string());
        return Err(reject(error.into_interface(request_id)));
    }
    Ok(question.to_string())
}

pub async fn ask(
    State(state): State<ApiState>,
    Json(request): Json<QuestionRequest>,
) -> ApiResult<AskResponse> {
    let request_id = new_request_id();
    let question = validated_question(&request, &request_id)?;
    info!(event_name = "api.ask.received", correlation_id = %request_id, "ask request received");

    let result = state.runtime.ask(&question, &request_id).await;
    Ok(Json(AskResponse { request_id, result }))
}

pub async fn classify(
    State(state): State<ApiState>,
    Json(request): Json<QuestionRequest>,
) -> ApiResult<ClassifyResponse> {
    let request_id = new_request_id();
    let question = validated_question(&request, &request_id)?;

    let resolution = state.runtime.classify(&question, Some(&request_id)).await;
    let fallback_reason = resolution.fallback_reason().map(ToString::to_string);
    Ok(Json(ClassifyResponse {
        request_id,
        fallback_used: fallback_reason.is_some(),
        fallback_reason,
        classification: resolution.into_value(),
    }))
}

pub async fn personas(State(state): State<ApiState>) -> Json<BTreeMap<String, String>> {
    Json(state.runtime.personas())
}

pub async fn direct_tools(State(state): State<ApiState>) -> Json<DirectToolsResponse> {
    let registry = state.runtime.direct_tools();
    Json(DirectToolsResponse { tools: registry.describe(), stats: registry.stats() })
}
