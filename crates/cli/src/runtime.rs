use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use askwell_agent::{AgentRuntime, LlmError, OpenAiCompatibleClient};
use askwell_core::config::{AppConfig, ConfigError, LoadOptions};
use askwell_core::persona::{PersonaError, PersonaRegistry};
use askwell_core::telemetry::{SessionMetricsStore, TracingTelemetry};
use askwell_db::{connect_with_settings, DbPool, SqlxGateway};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// A runtime wired against the configured warehouse for one CLI invocation.
pub struct LocalRuntime {
    pub runtime: AgentRuntime,
    pub db_pool: DbPool,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to initialize async runtime: {0}")]
    AsyncRuntime(#[source] std::io::Error),
    #[error("failed to connect to database: {0}")]
    Database(#[source] sqlx::Error),
    #[error("persona catalogue could not be loaded: {0}")]
    Personas(#[from] PersonaError),
    #[error("llm client could not be built: {0}")]
    Llm(#[from] LlmError),
}

impl SetupError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_validation",
            Self::AsyncRuntime(_) => "async_runtime",
            Self::Database(_) => "database_connectivity",
            Self::Personas(_) => "persona_catalogue",
            Self::Llm(_) => "llm_client",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            _ => 3,
        }
    }
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let require_file = config_path.is_some();
    AppConfig::load(LoadOptions { config_path, require_file, ..LoadOptions::default() })
}

pub fn block_on<F: Future>(future: F) -> Result<F::Output, SetupError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(SetupError::AsyncRuntime)?;
    Ok(runtime.block_on(future))
}

/// Logs go to stderr so stdout stays a clean command payload.
pub fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_ascii_lowercase()));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .compact()
        .try_init();
}

pub fn load_personas(config: &AppConfig) -> Result<PersonaRegistry, PersonaError> {
    match &config.agent.personas_path {
        Some(path) => PersonaRegistry::load_file(path),
        None => Ok(PersonaRegistry::builtin()),
    }
}

pub async fn connect(config: &AppConfig) -> Result<LocalRuntime, SetupError> {
    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(SetupError::Database)?;
    let personas = load_personas(config)?;
    let llm = OpenAiCompatibleClient::from_config(&config.llm)?;

    let runtime = AgentRuntime::new(
        Arc::new(llm),
        Arc::new(SqlxGateway::new(db_pool.clone())),
        Arc::new(personas),
        Arc::new(TracingTelemetry::new(SessionMetricsStore::default())),
        &config.agent,
    );
    Ok(LocalRuntime { runtime, db_pool })
}
