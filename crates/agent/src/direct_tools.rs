//! Deterministic lookups that can answer a question from entities the
//! classifier already extracted, skipping SQL generation.
//!
//! The registry maps a persona to an ordered list of descriptors. Each
//! descriptor pairs a [`Predicate`] (pure, no I/O) with a [`LookupSpec`]
//! that the router turns into one batched query plus optional per-value
//! fuzzy fallbacks.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use askwell_core::domain::classification::Classification;
use askwell_core::domain::results::DirectToolRun;
use askwell_core::domain::rows::{render_value, Row};
use askwell_core::errors::OrchestrationError;
use askwell_core::sql::{validate_identifier, SqlDialect, SqlError, SqlGateway};
use askwell_core::telemetry::TelemetrySink;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

const FUZZY_RESULT_LIMIT: u32 = 5;
const FUZZY_KEYWORDS: usize = 5;
const FUZZY_SEARCH_TERMS: usize = 3;
const STOPWORDS: [&str; 8] = ["the", "a", "an", "with", "for", "and", "or", "of"];
const UNIT_MARKERS: [&str; 6] = ["ml", "mm", "cm", "gauge", "fr", "ch"];

static KEYWORD_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"[\s\-\.]+") {
    Ok(regex) => regex,
    Err(err) => panic!("keyword separator regex is invalid: {err}"),
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// The classifier extracted at least one value for `entity`.
    EntityPresent { entity: String },
    /// Passes when the classifier emitted no sub-type, or one of `accepted`.
    IntentSubtype { accepted: Vec<String> },
    All(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, question: &str, classification: &Classification) -> bool {
        match self {
            Self::EntityPresent { entity } => classification.has_entity(entity),
            Self::IntentSubtype { accepted } => match classification.intent_subtype() {
                Some(subtype) => accepted.iter().any(|name| name.eq_ignore_ascii_case(subtype)),
                None => true,
            },
            Self::All(predicates) => {
                predicates.iter().all(|predicate| predicate.matches(question, classification))
            }
        }
    }

    /// Entity the executor reads values from, if the predicate names one.
    pub fn entity(&self) -> Option<&str> {
        match self {
            Self::EntityPresent { entity } => Some(entity),
            Self::IntentSubtype { .. } => None,
            Self::All(predicates) => predicates.iter().find_map(Predicate::entity),
        }
    }
}

/// Secondary keyword search against a product-style table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuzzySpec {
    pub table: String,
    pub id_column: String,
    /// Primary and secondary name columns; matches on the first rank higher.
    pub name_columns: [String; 2],
    pub extra_columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupSpec {
    pub entity: String,
    pub table: String,
    pub key_column: String,
    pub columns: Vec<String>,
    pub fuzzy: Option<FuzzySpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpectedPerformance {
    pub avg_execution_time_ms: u64,
    pub success_rate_target: f64,
    pub fallback_acceptable: bool,
}

impl Default for ExpectedPerformance {
    fn default() -> Self {
        Self { avg_execution_time_ms: 200, success_rate_target: 0.85, fallback_acceptable: true }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirectToolDescriptor {
    pub name: String,
    pub description: String,
    pub example_triggers: Vec<String>,
    pub predicate: Predicate,
    pub lookup: LookupSpec,
    pub expected_performance: ExpectedPerformance,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DirectToolInfo {
    pub name: String,
    pub description: String,
    pub example_triggers: Vec<String>,
    pub expected_performance: ExpectedPerformance,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PersonaToolStats {
    pub tool_count: usize,
    pub tool_names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_personas: usize,
    pub total_tools: usize,
    pub personas: BTreeMap<String, PersonaToolStats>,
}

#[derive(Debug, Error)]
pub enum DirectToolError {
    #[error("no values extracted for entity `{0}`")]
    MissingEntity(String),
    #[error("invalid identifier in lookup definition: `{0}`")]
    InvalidIdentifier(String),
    #[error(transparent)]
    Sql(#[from] SqlError),
}

/// Persona to ordered descriptors. Built once at startup, read-only after.
#[derive(Clone, Debug, Default)]
pub struct DirectToolRegistry {
    tools: BTreeMap<String, Vec<DirectToolDescriptor>>,
}

impl DirectToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a persona with no tools so it shows up in stats.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.tools.entry(persona.into()).or_default();
        self
    }

    pub fn register(
        mut self,
        persona: impl Into<String>,
        descriptor: DirectToolDescriptor,
    ) -> Result<Self, DirectToolError> {
        let lookup = &descriptor.lookup;
        let mut identifiers = vec![&lookup.table, &lookup.key_column];
        identifiers.extend(lookup.columns.iter());
        if let Some(fuzzy) = &lookup.fuzzy {
            identifiers.extend([&fuzzy.table, &fuzzy.id_column]);
            identifiers.extend(fuzzy.name_columns.iter());
            identifiers.extend(fuzzy.extra_columns.iter());
        }
        for identifier in identifiers {
            validate_identifier(identifier)
                .map_err(|_| DirectToolError::InvalidIdentifier(identifier.clone()))?;
        }

        self.tools.entry(persona.into()).or_default().push(descriptor);
        Ok(self)
    }

    /// Competitor-equivalent and product-code lookups for `sales_rep`;
    /// `product_planning` is registered without tools.
    pub fn builtin() -> Self {
        let product_columns = vec![
            "product_id".to_string(),
            "product_name_en".to_string(),
            "product_name_jp".to_string(),
            "specifications".to_string(),
        ];
        let competitor_mapping = DirectToolDescriptor {
            name: "competitor_mapping".to_string(),
            description: "Direct competitor product mapping for competitor products".to_string(),
            example_triggers: vec![
                "Replace the competitor Luer-Lock Syringe 2.5mL with our equivalent".to_string(),
                "What is our equivalent of competitor catheter 5FR?".to_string(),
            ],
            predicate: Predicate::All(vec![
                Predicate::EntityPresent { entity: "competitor_product".to_string() },
                Predicate::IntentSubtype {
                    accepted: vec!["competitor_mapping".to_string(), "equivalent".to_string()],
                },
            ]),
            lookup: LookupSpec {
                entity: "competitor_product".to_string(),
                table: "competitor_mapping".to_string(),
                key_column: "competitor_product_code".to_string(),
                columns: vec!["product_id".to_string(), "competitor_product_code".to_string()],
                fuzzy: Some(FuzzySpec {
                    table: "product_master".to_string(),
                    id_column: "product_id".to_string(),
                    name_columns: ["product_name_en".to_string(), "product_name_jp".to_string()],
                    extra_columns: vec!["specifications".to_string()],
                }),
            },
            expected_performance: ExpectedPerformance::default(),
        };
        let product_code_lookup = DirectToolDescriptor {
            name: "product_code_lookup".to_string(),
            description: "Direct product master lookup for internal product codes".to_string(),
            example_triggers: vec!["Show details for P-100 and P-200".to_string()],
            predicate: Predicate::All(vec![
                Predicate::EntityPresent { entity: "product_codes".to_string() },
                Predicate::IntentSubtype {
                    accepted: vec!["product_lookup".to_string(), "product_details".to_string()],
                },
            ]),
            lookup: LookupSpec {
                entity: "product_codes".to_string(),
                table: "product_master".to_string(),
                key_column: "product_id".to_string(),
                columns: product_columns,
                fuzzy: None,
            },
            expected_performance: ExpectedPerformance {
                avg_execution_time_ms: 100,
                ..ExpectedPerformance::default()
            },
        };

        let registry = Self::new().with_persona("product_planning");
        registry
            .clone()
            .register("sales_rep", competitor_mapping)
            .and_then(|registry| registry.register("sales_rep", product_code_lookup))
            .unwrap_or(registry)
    }

    pub fn for_persona(&self, persona: &str) -> &[DirectToolDescriptor] {
        self.tools.get(persona).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn describe(&self) -> BTreeMap<String, Vec<DirectToolInfo>> {
        self.tools
            .iter()
            .map(|(persona, tools)| {
                let infos = tools
                    .iter()
                    .map(|tool| DirectToolInfo {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        example_triggers: tool.example_triggers.clone(),
                        expected_performance: tool.expected_performance.clone(),
                    })
                    .collect();
                (persona.clone(), infos)
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_personas: self.tools.len(),
            total_tools: self.tools.values().map(Vec::len).sum(),
            personas: self
                .tools
                .iter()
                .map(|(persona, tools)| {
                    let stats = PersonaToolStats {
                        tool_count: tools.len(),
                        tool_names: tools.iter().map(|tool| tool.name.clone()).collect(),
                    };
                    (persona.clone(), stats)
                })
                .collect(),
        }
    }
}

/// What the router did for one request.
#[derive(Debug)]
pub enum DirectToolOutcome {
    NotApplicable,
    /// A tool ran and returned rows; the general workflow can be skipped.
    Answered(DirectToolRun),
    /// A tool ran but matched nothing.
    NoMatch(DirectToolRun),
    /// The tool raised; the general workflow must run.
    Failed { tool: String, error: OrchestrationError },
}

pub struct DirectToolRouter {
    registry: Arc<DirectToolRegistry>,
    sql: Arc<dyn SqlGateway>,
    telemetry: Arc<dyn TelemetrySink>,
    dialect: SqlDialect,
}

impl DirectToolRouter {
    pub fn new(
        registry: Arc<DirectToolRegistry>,
        sql: Arc<dyn SqlGateway>,
        telemetry: Arc<dyn TelemetrySink>,
        dialect: SqlDialect,
    ) -> Self {
        Self { registry, sql, telemetry, dialect }
    }

    pub fn registry(&self) -> &DirectToolRegistry {
        &self.registry
    }

    /// Runs the first applicable tool for the classified persona. Errors are
    /// contained here and reported as [`DirectToolOutcome::Failed`].
    pub async fn route(
        &self,
        question: &str,
        classification: &Classification,
        request_id: &str,
    ) -> DirectToolOutcome {
        let Some(descriptor) = self
            .registry
            .for_persona(&classification.persona)
            .iter()
            .find(|descriptor| descriptor.predicate.matches(question, classification))
        else {
            return DirectToolOutcome::NotApplicable;
        };

        let started = Instant::now();
        let result = self.execute(descriptor, classification, request_id).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(mut run) => {
                run.persona = classification.persona.clone();
                run.execution_time_ms = (duration_ms * 100.0).round() / 100.0;
                self.telemetry.log_tool_execution(
                    request_id,
                    &descriptor.name,
                    duration_ms,
                    true,
                    Some(run.result_count),
                );
                info!(
                    event_name = "agent.direct_tool.executed",
                    correlation_id = request_id,
                    tool = %descriptor.name,
                    result_count = run.result_count,
                    unmatched = run.failed.len(),
                    "direct tool executed"
                );
                if run.answered() {
                    DirectToolOutcome::Answered(run)
                } else {
                    DirectToolOutcome::NoMatch(run)
                }
            }
            Err(error) => {
                let error = OrchestrationError::DirectTool {
                    tool: descriptor.name.clone(),
                    message: error.to_string(),
                };
                self.telemetry.log_tool_execution(
                    request_id,
                    &descriptor.name,
                    duration_ms,
                    false,
                    None,
                );
                self.telemetry.log_error(request_id, &error.to_string(), "direct_tool");
                warn!(
                    event_name = "agent.direct_tool.failed",
                    correlation_id = request_id,
                    tool = %descriptor.name,
                    error = %error,
                    "direct tool failed; continuing with general workflow"
                );
                DirectToolOutcome::Failed { tool: descriptor.name.clone(), error }
            }
        }
    }

    async fn execute(
        &self,
        descriptor: &DirectToolDescriptor,
        classification: &Classification,
        request_id: &str,
    ) -> Result<DirectToolRun, DirectToolError> {
        let lookup = &descriptor.lookup;
        let values = classification.entity_values(&lookup.entity);
        if values.is_empty() {
            return Err(DirectToolError::MissingEntity(lookup.entity.clone()));
        }

        let primary_sql = batched_lookup_sql(lookup, &values, self.dialect);
        let primary_rows = self.query(&primary_sql, request_id).await?;
        let mut sql_executed = vec![primary_sql];

        let mut results = Vec::new();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut fuzzy_matched = Vec::new();

        for value in &values {
            let matched: Vec<Row> = primary_rows
                .iter()
                .filter(|row| key_matches(row, &lookup.key_column, value))
                .cloned()
                .collect();
            if !matched.is_empty() {
                results.extend(tag_rows(matched, value, Some("direct_lookup")));
                succeeded.push(value.clone());
                continue;
            }

            let fuzzy_rows = match &lookup.fuzzy {
                Some(fuzzy) => match fuzzy_lookup_sql(fuzzy, value, self.dialect) {
                    Some(sql) => {
                        let rows = match self.query(&sql, request_id).await {
                            Ok(rows) => rows,
                            Err(error) => {
                                warn!(
                                    event_name = "agent.direct_tool.fuzzy_failed",
                                    correlation_id = request_id,
                                    tool = %descriptor.name,
                                    error = %error,
                                    "fuzzy lookup failed"
                                );
                                Vec::new()
                            }
                        };
                        sql_executed.push(sql);
                        rows
                    }
                    None => Vec::new(),
                },
                None => Vec::new(),
            };

            if fuzzy_rows.is_empty() {
                failed.push(value.clone());
            } else {
                results.extend(tag_rows(fuzzy_rows, value, None));
                succeeded.push(value.clone());
                fuzzy_matched.push(value.clone());
            }
        }

        Ok(DirectToolRun {
            tool: descriptor.name.clone(),
            persona: String::new(),
            result_count: results.len() as u64,
            results,
            succeeded,
            failed,
            fuzzy_matched,
            sql_executed,
            execution_time_ms: 0.0,
        })
    }

    /// Runs one lookup statement and records it in the request's SQL log.
    async fn query(&self, sql: &str, request_id: &str) -> Result<Vec<Row>, SqlError> {
        let started = Instant::now();
        let output = self.sql.execute(sql).await?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.telemetry.log_sql_query(request_id, sql, duration_ms, output.result_count());
        Ok(output.into_rows())
    }
}

fn batched_lookup_sql(lookup: &LookupSpec, values: &[String], dialect: SqlDialect) -> String {
    let mut columns = lookup.columns.clone();
    if !columns.contains(&lookup.key_column) {
        columns.push(lookup.key_column.clone());
    }
    let literals = values
        .iter()
        .map(|value| dialect.string_literal(value))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {} FROM {} WHERE {} IN ({literals})",
        columns.join(", "),
        lookup.table,
        lookup.key_column
    )
}

fn key_matches(row: &Row, key_column: &str, value: &str) -> bool {
    row.get(key_column)
        .and_then(render_value)
        .is_some_and(|key| key.trim().eq_ignore_ascii_case(value.trim()))
}

fn tag_rows(rows: Vec<Row>, input: &str, mapping_type: Option<&str>) -> Vec<Row> {
    rows.into_iter()
        .map(|mut row| {
            row.insert("input_value".to_string(), Value::String(input.to_string()));
            if let Some(mapping_type) = mapping_type {
                row.entry("mapping_type".to_string())
                    .or_insert_with(|| Value::String(mapping_type.to_string()));
            }
            row
        })
        .collect()
}

/// Search keywords for a free-text product name. Tokens carrying a
/// measurement marker jump to the front, each ahead of the previous one.
pub fn fuzzy_keywords(name: &str) -> Vec<String> {
    let lowered = name.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();
    for word in KEYWORD_SEPARATORS.split(&lowered).map(str::trim) {
        if word.is_empty() || STOPWORDS.contains(&word) || word.chars().count() <= 2 {
            continue;
        }
        if UNIT_MARKERS.iter().any(|marker| word.contains(marker)) {
            keywords.insert(0, word.to_string());
        } else {
            keywords.push(word.to_string());
        }
    }
    keywords.truncate(FUZZY_KEYWORDS);
    keywords
}

/// `None` when the value yields no usable keywords.
pub fn fuzzy_lookup_sql(fuzzy: &FuzzySpec, value: &str, dialect: SqlDialect) -> Option<String> {
    let keywords = fuzzy_keywords(value);
    let first = keywords.first()?;
    let [primary, secondary] = &fuzzy.name_columns;

    // Keywords are already lowercase, so only the columns need folding.
    let conditions = keywords
        .iter()
        .take(FUZZY_SEARCH_TERMS)
        .map(|term| {
            let pattern = dialect.like_contains(term);
            format!("LOWER({primary}) LIKE {pattern} OR LOWER({secondary}) LIKE {pattern}")
        })
        .collect::<Vec<_>>()
        .join(" OR ");
    let first_pattern = dialect.like_contains(first);

    let mut columns = vec![fuzzy.id_column.clone(), primary.clone(), secondary.clone()];
    columns.extend(fuzzy.extra_columns.iter().cloned());
    columns.push("'fuzzy_match' AS mapping_type".to_string());
    columns.push("0.7 AS estimated_confidence".to_string());

    let rest = format!(
        "FROM {table} WHERE {conditions} ORDER BY CASE \
         WHEN LOWER({primary}) LIKE {first_pattern} THEN 1 \
         WHEN LOWER({secondary}) LIKE {first_pattern} THEN 2 ELSE 3 END, {id}",
        table = fuzzy.table,
        id = fuzzy.id_column,
    );
    Some(dialect.limit_query(&columns.join(", "), &rest, FUZZY_RESULT_LIMIT))
}
