use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::lenient;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[default]
    SingleStage,
    MultiStage,
    Iterative,
}

impl ExecutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleStage => "single_stage",
            Self::MultiStage => "multi_stage",
            Self::Iterative => "iterative",
        }
    }
}

/// Whether live schema discovery should run. Recorded on the classification;
/// personas already carry their schemas so nothing consumes it yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStrategy {
    #[default]
    Skip,
    Minimal,
    Full,
}

impl MetadataStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Minimal => "minimal",
            Self::Full => "full",
        }
    }
}

/// The fixed tool vocabulary offered to the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    GetMetadata,
    RunSqlQuery,
    SummarizeResults,
    GenerateVisualization,
}

impl ToolName {
    pub const ALL: [ToolName; 4] =
        [Self::GetMetadata, Self::RunSqlQuery, Self::SummarizeResults, Self::GenerateVisualization];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetMetadata => "get_metadata",
            Self::RunSqlQuery => "run_sql_query",
            Self::SummarizeResults => "summarize_results",
            Self::GenerateVisualization => "generate_visualization",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::GetMetadata => "Schema discovery and table analysis",
            Self::RunSqlQuery => "Generate and execute SQL queries from questions",
            Self::SummarizeResults => "Create business summaries",
            Self::GenerateVisualization => "Create charts and tables",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownTool(pub String);

impl FromStr for ToolName {
    type Err = UnknownTool;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == normalized)
            .ok_or_else(|| UnknownTool(normalized.to_string()))
    }
}

/// Chain used whenever the classifier cannot supply one.
pub const FALLBACK_TOOL_CHAIN: [ToolName; 2] = [ToolName::RunSqlQuery, ToolName::SummarizeResults];

pub const GENERAL_QUERY_INTENT: &str = "general_query";

/// Structured routing decision for one question.
///
/// A value of this type always has a persona and a non-empty tool chain; use
/// [`Classification::normalize`] after deserializing model output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default = "default_intent", deserialize_with = "lenient::text")]
    pub intent: String,
    pub persona: String,
    #[serde(default = "default_confidence", deserialize_with = "lenient_confidence")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "lenient_execution_strategy")]
    pub execution_strategy: ExecutionStrategy,
    #[serde(default, deserialize_with = "lenient_metadata_strategy")]
    pub metadata_strategy: MetadataStrategy,
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub tool_chain: Vec<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub reasoning: String,
    #[serde(default, deserialize_with = "lenient::object")]
    pub extracted_entities: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub actual_tables: Vec<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub requires_intermediate_processing: bool,
}

fn default_intent() -> String {
    GENERAL_QUERY_INTENT.to_string()
}

fn default_confidence() -> f64 {
    0.5
}

fn lenient_confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(lenient::number(&Value::deserialize(deserializer)?).unwrap_or_else(default_confidence))
}

/// Unrecognised labels run single-stage.
fn lenient_execution_strategy<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<ExecutionStrategy, D::Error> {
    let label = lenient::label(&Value::deserialize(deserializer)?);
    Ok(match label.as_deref() {
        Some("multi_stage") => ExecutionStrategy::MultiStage,
        Some("iterative") => ExecutionStrategy::Iterative,
        _ => ExecutionStrategy::SingleStage,
    })
}

fn lenient_metadata_strategy<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<MetadataStrategy, D::Error> {
    let label = lenient::label(&Value::deserialize(deserializer)?);
    Ok(match label.as_deref() {
        Some("minimal") => MetadataStrategy::Minimal,
        Some("full") => MetadataStrategy::Full,
        _ => MetadataStrategy::Skip,
    })
}

impl Classification {
    /// Clamps confidence and restores the fallback chain when the tool chain is empty.
    pub fn normalize(mut self) -> Self {
        self.confidence =
            if self.confidence.is_finite() { self.confidence.clamp(0.0, 1.0) } else { 0.5 };
        self.tool_chain.retain(|tool| !tool.trim().is_empty());
        if self.tool_chain.is_empty() {
            self.tool_chain =
                FALLBACK_TOOL_CHAIN.iter().map(|tool| tool.as_str().to_string()).collect();
        }
        if self.intent.trim().is_empty() {
            self.intent = default_intent();
        }
        self
    }

    /// Known tools from the chain, in order. Unknown names are skipped.
    pub fn tools(&self) -> impl Iterator<Item = ToolName> + '_ {
        self.tool_chain.iter().filter_map(|name| name.parse().ok())
    }

    pub fn has_tool(&self, tool: ToolName) -> bool {
        self.tools().any(|candidate| candidate == tool)
    }

    /// Entity values as a flat list. Accepts a string (comma separated), an
    /// array of strings or numbers, or a single number.
    pub fn entity_values(&self, key: &str) -> Vec<String> {
        match self.extracted_entities.get(key) {
            Some(Value::String(text)) => text
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(text) => Some(text.trim().to_string()),
                    Value::Number(number) => Some(number.to_string()),
                    _ => None,
                })
                .filter(|value| !value.is_empty())
                .collect(),
            Some(Value::Number(number)) => vec![number.to_string()],
            _ => Vec::new(),
        }
    }

    pub fn has_entity(&self, key: &str) -> bool {
        !self.entity_values(key).is_empty()
    }

    /// Optional sub-type the classifier may emit under `intent_type`.
    pub fn intent_subtype(&self) -> Option<&str> {
        self.extracted_entities
            .get("intent_type")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}
