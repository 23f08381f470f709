//! LLM gateway: the chat-completion contract, the per-family parameter
//! policy, an OpenAI/Azure-compatible HTTP client and a scripted double.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use askwell_core::config::{LlmConfig, LlmProvider};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Telemetry purpose tag, e.g. `sql_generation`.
    pub purpose: &'static str,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, max_tokens: u32, purpose: &'static str) -> Self {
        Self { messages, max_tokens, temperature: 0.0, purpose }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    /// Empty when the provider returned no content.
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm transport failed: {0}")]
    Transport(String),
    #[error("llm returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("llm response contained no choices")]
    EmptyChoices,
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model or deployment identifier, used for parameter policy and logs.
    fn model(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenLimitParam {
    MaxTokens,
    MaxCompletionTokens,
}

impl TokenLimitParam {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxTokens => "max_tokens",
            Self::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

/// Generation parameters after applying the model-family policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelParams {
    pub token_limit: TokenLimitParam,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ModelParams {
    /// Reasoning families (`gpt-5*`, `o1*`) only accept the default temperature
    /// of 1 and name the token limit `max_completion_tokens`.
    pub fn for_model(model: &str, max_tokens: u32, temperature: f32) -> Self {
        let family = model.to_ascii_lowercase();
        if family.contains("gpt-5") || family.contains("o1") {
            Self { token_limit: TokenLimitParam::MaxCompletionTokens, max_tokens, temperature: 1.0 }
        } else {
            Self { token_limit: TokenLimitParam::MaxTokens, max_tokens, temperature }
        }
    }

    fn apply(&self, body: &mut serde_json::Map<String, Value>) {
        body.insert(self.token_limit.as_str().to_string(), json!(self.max_tokens));
        body.insert("temperature".to_string(), json!(self.temperature));
    }
}

/// Chat-completions client for OpenAI, Azure OpenAI and Ollama's
/// OpenAI-compatible endpoint.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    provider: LlmProvider,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::Transport(format!("failed to build HTTP client: {error}")))?;

        let base = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let endpoint = match config.provider {
            LlmProvider::Azure => format!(
                "{base}/openai/deployments/{}/chat/completions?api-version={}",
                config.model, config.api_version
            ),
            LlmProvider::OpenAi | LlmProvider::Ollama => format!("{base}/chat/completions"),
        };

        Ok(Self {
            http,
            provider: config.provider,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), json!(self.model));
        body.insert("messages".to_string(), json!(request.messages));
        ModelParams::for_model(&self.model, request.max_tokens, request.temperature)
            .apply(&mut body);
        Value::Object(body)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let mut builder = self.http.post(&self.endpoint).json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            builder = match self.provider {
                LlmProvider::Azure => builder.header("api-key", key.expose_secret()),
                LlmProvider::OpenAi | LlmProvider::Ollama => {
                    builder.bearer_auth(key.expose_secret())
                }
            };
        }

        let response = builder
            .send()
            .await
            .map_err(|error| LlmError::Transport(format!("{}: {error}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http { status: status.as_u16(), body });
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        let choice = parsed.choices.into_iter().next().ok_or(LlmError::EmptyChoices)?;
        let usage = parsed
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            })
            .unwrap_or_default();

        debug!(
            event_name = "agent.llm.completed",
            purpose = request.purpose,
            model = %self.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "llm completion received"
        );

        Ok(Completion { content: choice.message.content.unwrap_or_default(), usage })
    }
}

/// Replays queued completions in order and records every request. Once the
/// queue is drained each call fails with [`LlmError::EmptyChoices`].
#[derive(Default)]
pub struct ScriptedLlm {
    model: String,
    replies: Mutex<VecDeque<Result<Completion, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Self::default() }
    }

    pub fn reply(self, content: impl Into<String>) -> Self {
        let completion = Completion {
            content: content.into(),
            usage: TokenUsage { prompt_tokens: 100, completion_tokens: 20 },
        };
        lock(&self.replies).push_back(Ok(completion));
        self
    }

    pub fn fail(self, error: LlmError) -> Self {
        lock(&self.replies).push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn purposes(&self) -> Vec<&'static str> {
        lock(&self.requests).iter().map(|request| request.purpose).collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        lock(&self.requests).push(request.clone());
        lock(&self.replies).pop_front().unwrap_or(Err(LlmError::EmptyChoices))
    }
}
