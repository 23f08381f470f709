//! `GET /health`: readiness of the three things an answer depends on, the
//! warehouse connection, the persona catalogue and the configured model.

use std::sync::Arc;

use askwell_agent::AgentRuntime;
use askwell_core::errors::ApplicationError;
use askwell_db::{ping, DbPool};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::api::status_of;

const HEALTH_CORRELATION_ID: &str = "health";

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    runtime: Arc<AgentRuntime>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub status: Readiness,
    pub detail: String,
}

impl ComponentHealth {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: Readiness::Ready, detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: Readiness::Degraded, detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: Readiness,
    pub database: ComponentHealth,
    pub personas: ComponentHealth,
    pub llm: ComponentHealth,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, runtime: Arc<AgentRuntime>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, runtime })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, database_error) = match ping(&state.db_pool).await {
        Ok(()) => (ComponentHealth::ready("warehouse answered a ping"), None),
        Err(error) => {
            let error = ApplicationError::Persistence(format!("warehouse ping failed: {error}"))
                .into_interface(HEALTH_CORRELATION_ID);
            (ComponentHealth::degraded(error.message()), Some(error))
        }
    };
    let personas = persona_check(&state.runtime);
    let llm = llm_check(&state.runtime);

    let components = [&database, &personas, &llm];
    let ready = components.iter().all(|component| component.status == Readiness::Ready);
    if !ready {
        warn!(
            event_name = "system.health.degraded",
            correlation_id = HEALTH_CORRELATION_ID,
            database = %database.detail,
            personas = %personas.detail,
            llm = %llm.detail,
            "readiness check failed"
        );
    }

    let status_code = match (&database_error, ready) {
        (Some(error), _) => status_of(error),
        (None, true) => StatusCode::OK,
        (None, false) => StatusCode::SERVICE_UNAVAILABLE,
    };
    let payload = HealthResponse {
        status: if ready { Readiness::Ready } else { Readiness::Degraded },
        database,
        personas,
        llm,
        checked_at: Utc::now().to_rfc3339(),
    };
    (status_code, Json(payload))
}

fn persona_check(runtime: &AgentRuntime) -> ComponentHealth {
    let catalogue = runtime.personas();
    let default_persona = runtime.default_persona();
    if catalogue.is_empty() {
        return ComponentHealth::degraded("persona catalogue is empty");
    }
    if !catalogue.contains_key(default_persona) {
        return ComponentHealth::degraded(format!(
            "default persona `{default_persona}` is not in the catalogue"
        ));
    }
    ComponentHealth::ready(format!(
        "{} personas loaded, default `{default_persona}`",
        catalogue.len()
    ))
}

fn llm_check(runtime: &AgentRuntime) -> ComponentHealth {
    let model = runtime.model().trim();
    if model.is_empty() {
        return ComponentHealth::degraded("no model configured");
    }
    ComponentHealth::ready(format!("model `{model}` configured"))
}
