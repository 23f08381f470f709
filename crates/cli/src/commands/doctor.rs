use std::path::PathBuf;

use askwell_agent::OpenAiCompatibleClient;
use askwell_core::config::AppConfig;
use askwell_db::{connect_with_settings, ping};
use serde::Serialize;

use crate::runtime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 3] = ["database_connectivity", "persona_catalogue", "llm_client"];

pub fn run(config_path: Option<PathBuf>, json_output: bool) -> String {
    let report = build_report(config_path);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"{}\",\"error\":\"{}\"}}",
                "doctor serialization failed",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(config_path: Option<PathBuf>) -> DoctorReport {
    let mut checks = Vec::new();

    match runtime::load_config(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_database_connectivity(&config));
            checks.push(check_persona_catalogue(&config));
            checks.push(check_llm_client(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(DEPENDENT_CHECKS.into_iter().map(DoctorCheck::skipped));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let result = runtime::block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let pinged = ping(&pool).await.map_err(|error| format!("database ping failed: {error}"));
        pool.close().await;
        pinged
    });

    match result {
        Ok(Ok(())) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Ok(Err(error)) => DoctorCheck::fail("database_connectivity", error),
        Err(error) => DoctorCheck::fail("database_connectivity", error.to_string()),
    }
}

fn check_persona_catalogue(config: &AppConfig) -> DoctorCheck {
    let registry = match runtime::load_personas(config) {
        Ok(registry) => registry,
        Err(error) => return DoctorCheck::fail("persona_catalogue", error.to_string()),
    };

    let default_persona = &config.agent.default_persona;
    if !registry.contains(default_persona) {
        return DoctorCheck::fail(
            "persona_catalogue",
            format!("default persona `{default_persona}` is not in the catalogue"),
        );
    }

    let source = match &config.agent.personas_path {
        Some(path) => path.display().to_string(),
        None => "builtin".to_string(),
    };
    DoctorCheck::pass(
        "persona_catalogue",
        format!("{} personas loaded from {source}", registry.len()),
    )
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            "llm_client",
            format!(
                "{:?} model `{}` at {}",
                config.llm.provider,
                config.llm.model,
                client.endpoint()
            ),
        ),
        Err(error) => DoctorCheck::fail("llm_client", error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
