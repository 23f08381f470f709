//! Agent Runtime - LLM-driven question answering over a SQL warehouse
//!
//! This crate holds the decision logic of askwell:
//! - Classifies a question into a persona, strategy and tool chain
//! - Answers from extracted entities through deterministic direct tools
//! - Runs single-stage or three-stage SQL workflows with LLM analysis
//! - Composes one user-facing answer from whatever the tools produced
//!
//! # Architecture
//!
//! 1. **Classification** (`classifier`) - question to `Classification`, with a
//!    fixed fallback when the model reply is unusable
//! 2. **Direct tools** (`direct_tools`) - registry-driven batched lookups that
//!    may skip SQL generation entirely
//! 3. **Workflow** (`workflow`) - state machine over `tools` and `analysis`
//! 4. **Composition** (`composer`) - evaluation or rows to markdown text
//!
//! # Key Types
//!
//! - `AgentRuntime` - entry points used by transports (see `runtime`)
//! - `LlmClient` - chat completion seam with an OpenAI/Azure-compatible client
//! - `DirectToolRegistry` - per-persona fast-path descriptors
//!
//! The LLM never executes anything itself: it writes SQL text or analyses
//! rows, and every failure it causes degrades to a deterministic fallback.

pub mod analysis;
pub mod classifier;
pub mod composer;
pub mod direct_tools;
pub mod llm;
pub mod prompts;
pub mod runtime;
pub mod tools;
pub mod workflow;

pub use classifier::IntentClassifier;
pub use direct_tools::{DirectToolOutcome, DirectToolRegistry, DirectToolRouter, RegistryStats};
pub use llm::{LlmClient, LlmError, OpenAiCompatibleClient, ScriptedLlm};
pub use runtime::AgentRuntime;
pub use workflow::{WorkflowExecutor, WorkflowRun};
