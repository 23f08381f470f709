use std::path::PathBuf;

use askwell_agent::AgentRuntime;
use askwell_core::domain::classification::Classification;
use serde::Serialize;
use uuid::Uuid;

use super::CommandResult;
use crate::runtime::{self, SetupError};

const COMMAND: &str = "classify";

#[derive(Debug, Serialize)]
struct ClassifyPayload {
    command: &'static str,
    status: &'static str,
    request_id: String,
    fallback_used: bool,
    fallback_reason: Option<String>,
    classification: Classification,
}

pub fn run(config_path: Option<PathBuf>, question: &str) -> CommandResult {
    let question = question.trim();
    if question.is_empty() {
        return CommandResult::failure(COMMAND, "invalid_input", "question must not be empty", 1);
    }

    let config = match runtime::load_config(config_path) {
        Ok(config) => config,
        Err(error) => return CommandResult::setup_failure(COMMAND, &SetupError::from(error)),
    };
    runtime::init_logging(&config);

    let outcome = runtime::block_on(async {
        let local = runtime::connect(&config).await?;
        let result = classify(&local.runtime, question).await;
        local.db_pool.close().await;
        Ok::<_, SetupError>(result)
    });

    match outcome.and_then(|result| result) {
        Ok(result) => result,
        Err(error) => CommandResult::setup_failure(COMMAND, &error),
    }
}

pub async fn classify(runtime: &AgentRuntime, question: &str) -> CommandResult {
    let request_id = Uuid::new_v4().to_string();
    let resolution = runtime.classify(question, Some(&request_id)).await;
    let fallback_reason = resolution.fallback_reason().map(ToString::to_string);

    CommandResult::json(
        0,
        &ClassifyPayload {
            command: COMMAND,
            status: "ok",
            request_id,
            fallback_used: fallback_reason.is_some(),
            fallback_reason,
            classification: resolution.into_value(),
        },
    )
}
