use std::sync::Arc;

use askwell_agent::{AgentRuntime, LlmError, OpenAiCompatibleClient};
use askwell_core::config::{AppConfig, ConfigError, LoadOptions};
use askwell_core::persona::{PersonaError, PersonaRegistry};
use askwell_core::telemetry::{SessionMetricsStore, TracingTelemetry};
use askwell_db::{connect_with_settings, DbPool, SqlxGateway};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("persona catalogue could not be loaded: {0}")]
    Personas(#[from] PersonaError),
    #[error("llm client could not be built: {0}")]
    Llm(#[from] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    let personas = match &config.agent.personas_path {
        Some(path) => PersonaRegistry::load_file(path)?,
        None => PersonaRegistry::builtin(),
    };
    info!(
        event_name = "system.bootstrap.personas_loaded",
        correlation_id = "bootstrap",
        persona_count = personas.len(),
        "persona registry loaded"
    );

    let llm = OpenAiCompatibleClient::from_config(&config.llm)?;
    info!(
        event_name = "system.bootstrap.llm_ready",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        endpoint = %llm.endpoint(),
        "llm client configured"
    );

    let runtime = AgentRuntime::new(
        Arc::new(llm),
        Arc::new(SqlxGateway::new(db_pool.clone())),
        Arc::new(personas),
        Arc::new(TracingTelemetry::new(SessionMetricsStore::default())),
        &config.agent,
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use askwell_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_without_openai_key() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_provider: Some(LlmProvider::OpenAi),
                llm_api_key: Some("  ".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_wires_runtime_with_builtin_personas() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with defaults");

        assert!(app.runtime.personas().contains_key("product_planning"));
        assert_eq!(app.runtime.direct_tools().stats().total_personas, 2);
        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_reports_unreadable_persona_catalogue() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "[[persona]]\nname = 42\n").expect("write catalogue");

        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                personas_path: Some(file.path().to_path_buf()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("persona catalogue"));
    }
}
