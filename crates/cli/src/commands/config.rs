use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use askwell_core::config::AppConfig;
use secrecy::ExposeSecret;
use toml::Value;

use crate::runtime;

pub fn run(config_path: Option<&Path>) -> String {
    let config = match runtime::load_config(config_path.map(Path::to_path_buf)) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = config_path.map(Path::to_path_buf).or_else(detect_config_path);
    let file_doc = load_config_file_doc(file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in effective_values(&config) {
        let source = field_source(key, env_key, file_doc.as_ref(), file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    let api_key = match &config.llm.api_key {
        Some(secret) => redact_key(secret.expose_secret()),
        None => "<unset>".to_string(),
    };
    let personas_path = config
        .agent
        .personas_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<builtin>".to_string());

    vec![
        ("database.url", config.database.url.clone(), "ASKWELL_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "ASKWELL_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "ASKWELL_DATABASE_TIMEOUT_SECS",
        ),
        ("llm.provider", format!("{:?}", config.llm.provider), "ASKWELL_LLM_PROVIDER"),
        ("llm.model", config.llm.model.clone(), "ASKWELL_LLM_MODEL"),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "ASKWELL_LLM_BASE_URL",
        ),
        ("llm.api_key", api_key, "ASKWELL_LLM_API_KEY"),
        ("llm.api_version", config.llm.api_version.clone(), "ASKWELL_LLM_API_VERSION"),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), "ASKWELL_LLM_TIMEOUT_SECS"),
        ("server.bind_address", config.server.bind_address.clone(), "ASKWELL_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "ASKWELL_SERVER_PORT"),
        ("logging.level", config.logging.level.clone(), "ASKWELL_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "ASKWELL_LOGGING_FORMAT"),
        (
            "agent.default_persona",
            config.agent.default_persona.clone(),
            "ASKWELL_AGENT_DEFAULT_PERSONA",
        ),
        ("agent.personas_path", personas_path, "ASKWELL_AGENT_PERSONAS_PATH"),
        (
            "agent.max_compressed_records",
            config.agent.max_compressed_records.to_string(),
            "ASKWELL_AGENT_MAX_COMPRESSED_RECORDS",
        ),
        (
            "agent.sql_dialect",
            config.agent.sql_dialect.as_str().to_string(),
            "ASKWELL_AGENT_SQL_DIALECT",
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("askwell.toml"), PathBuf::from("config/askwell.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognisable `sk-` style prefix and hides the rest.
fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
