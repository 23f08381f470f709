use std::path::PathBuf;

use askwell_agent::AgentRuntime;
use askwell_core::domain::results::ToolChainResult;
use serde::Serialize;
use uuid::Uuid;

use super::CommandResult;
use crate::runtime::{self, SetupError};

const COMMAND: &str = "ask";

#[derive(Debug, Serialize)]
struct AskPayload<'a> {
    command: &'static str,
    status: &'static str,
    request_id: &'a str,
    #[serde(flatten)]
    result: &'a ToolChainResult,
}

pub fn run(config_path: Option<PathBuf>, question: &str, json_output: bool) -> CommandResult {
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
        let result = answer(&local.runtime, question, json_output).await;
        local.db_pool.close().await;
        Ok::<_, SetupError>(result)
    });

    match outcome.and_then(|result| result) {
        Ok(result) => result,
        Err(error) => CommandResult::setup_failure(COMMAND, &error),
    }
}

/// Runs one question through an already wired runtime.
///
/// Exit code 4 means the workflow ended with an error; the output still
/// carries the apology text so callers can show it.
pub async fn answer(runtime: &AgentRuntime, question: &str, json_output: bool) -> CommandResult {
    let request_id = Uuid::new_v4().to_string();
    let result = runtime.ask(question, &request_id).await;
    let exit_code = if result.error.is_some() { 4 } else { 0 };

    if !json_output {
        return CommandResult { exit_code, output: result.final_response };
    }

    let status = if exit_code == 0 { "ok" } else { "error" };
    CommandResult::json(
        exit_code,
        &AskPayload { command: COMMAND, status, request_id: &request_id, result: &result },
    )
}
