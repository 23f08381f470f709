//! Prompt text for every LLM call the orchestrator makes.

use std::collections::BTreeMap;

use askwell_core::domain::classification::ToolName;
use askwell_core::sql::SqlDialect;

pub const CLASSIFIER_SYSTEM: &str =
    "You are a JSON classifier. Return ONLY valid JSON, no other text.";
pub const ANALYST_SYSTEM: &str =
    "You are a business analyst. Analyze data and provide insights. DO NOT generate SQL queries.";

const STAGE1_DISCOVERY: &str = "You are running stage 1 (discovery) of a three stage analysis. \
Write a broad query that finds candidate records relevant to the question. Prefer identifying \
columns (ids, codes, names) and keep the result set small.";
const STAGE2_ANALYSIS: &str = "You are running stage 2 (analysis) of a three stage analysis. \
Write a focused query that retrieves detailed attributes for the items selected from stage 1. \
Filter on the selected identifiers.";
const STAGE3_EVALUATION: &str = "You are running stage 3 (evaluation) of a three stage analysis. \
Interpret the retrieved records and answer the business question directly.";

/// One persona line group as shown to the classifier.
pub struct PersonaSummary<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub tables: Vec<String>,
}

pub fn classification_prompt(question: &str, personas: &[PersonaSummary<'_>]) -> String {
    let persona_list = personas
        .iter()
        .map(|persona| {
            let tables = if persona.tables.is_empty() {
                "No specific tables".to_string()
            } else {
                persona.tables.join(", ")
            };
            format!("- {}: {}\n  Tables: {tables}", persona.name, persona.description)
        })
        .collect::<Vec<_>>()
        .join("\n");
    let tool_list = ToolName::ALL
        .iter()
        .map(|tool| format!("- {}: {}", tool.as_str(), tool.description()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a domain-agnostic intent classifier for a data warehouse assistant.

Available personas (business domain experts):
{persona_list}

Available tools:
{tool_list}

Analyze this question: "{question}"

Determine:
1. Best matching persona based on question content and domain
2. Execution strategy
3. Required metadata discovery approach
4. Appropriate tool chain
5. Entities a direct lookup could use (competitor_product, product_codes, intent_type)

Execution Strategies:
- "single_stage": Standard one-pass execution
- "multi_stage": Requires intermediate reasoning between queries (discovery, analysis, evaluation)
- "iterative": Multiple rounds of refinement

Metadata Strategies:
- "skip": Use static schemas from personas (PREFERRED for known personas)
- "minimal": Basic table validation only
- "full": Comprehensive schema discovery

Respond with JSON:
{{
    "intent": "descriptive intent name",
    "persona": "best_matching_persona_name",
    "confidence": 0.0,
    "execution_strategy": "single_stage|multi_stage|iterative",
    "metadata_strategy": "skip|minimal|full",
    "tool_chain": ["tool1", "tool2"],
    "reasoning": "why this classification and strategy were selected",
    "extracted_entities": {{}},
    "requires_intermediate_processing": false,
    "actual_tables": ["tables", "from", "selected", "persona"]
}}
"#
    )
}

pub fn sql_generation_prompt(context: &str, dialect: SqlDialect) -> String {
    let dialect_name = match dialect {
        SqlDialect::Tsql => "T-SQL",
        SqlDialect::Sqlite => "SQLite",
    };
    format!(
        "You are an expert SQL assistant for a business data warehouse.\n\
         Given the schema and context:\n{context}\n\n\
         Write a correct, safe {dialect_name} query that answers the question. \
         Only read data. Return ONLY the SQL query, no explanation."
    )
}

pub fn single_stage_context(persona: &str, persona_content: &str, question: &str) -> String {
    format!("Context from {persona} module:\n{persona_content}\n\nUser question: {question}\n")
}

pub fn stage1_context(persona_content: &str, question: &str) -> String {
    format!(
        "{STAGE1_DISCOVERY}\n\nPERSONA CONTEXT:\n{persona_content}\n\nUSER QUESTION: {question}\n\n\
         STAGE 1 TASK: Execute discovery query to find relevant candidates based on user \
         criteria using persona domain knowledge.\n"
    )
}

pub fn stage2_context(
    persona_content: &str,
    question: &str,
    summary: &str,
    selected_items: &str,
) -> String {
    let summary = if summary.trim().is_empty() { "No summary available" } else { summary };
    format!(
        "{STAGE2_ANALYSIS}\n\nPERSONA CONTEXT:\n{persona_content}\n\n\
         STAGE 1 RESULTS SUMMARY:\n{summary}\n\nSELECTED ITEMS FROM STAGE 1:\n{selected_items}\n\n\
         USER QUESTION: {question}\n\n\
         STAGE 2 TASK: Execute detailed analysis query using selected items from Stage 1 to \
         gather comprehensive information.\n"
    )
}

pub struct EvaluationInputs<'a> {
    pub persona_content: &'a str,
    pub question: &'a str,
    pub stage1_count: usize,
    pub reasoning: &'a str,
    pub stage2_count: usize,
    pub digest: &'a str,
}

pub fn stage3_context(inputs: &EvaluationInputs<'_>) -> String {
    let reasoning = match inputs.reasoning.trim() {
        "" => "No reasoning available",
        _ => inputs.reasoning,
    };
    format!(
        "{STAGE3_EVALUATION}\n\nPERSONA CONTEXT:\n{}\n\n\
         STAGE 1 RESULTS: {} candidates found\n\
         INTERMEDIATE ANALYSIS: {reasoning}\n\
         STAGE 2 RESULTS: {} detailed records retrieved\n\n\
         USER QUESTION: {}\n\n\
         STAGE 3 TASK: Evaluate final results to extract clear business answer using persona \
         domain expertise.\n\nFinal Data Sample (compressed):\n{}\n",
        inputs.persona_content,
        inputs.stage1_count,
        inputs.stage2_count,
        inputs.question,
        inputs.digest
    )
}

pub fn evaluation_prompt(context: &str) -> String {
    format!(
        r#"{context}
IMPORTANT: DO NOT generate any SQL queries. Your task is to analyze the data provided above and create a business answer.

Based on the data gathered from Stages 1 and 2, provide a comprehensive business evaluation in JSON format.

CRITICAL: Escape all special characters in JSON strings.

{{
    "business_answer": "Direct answer to user question",
    "key_findings": ["finding1", "finding2", "finding3"],
    "recommended_action": "What user should do next",
    "supporting_data": {{
        "primary_values": "key metrics or values",
        "alternatives": "other options if applicable",
        "confidence": "high|medium|low"
    }},
    "data_quality": "assessment of result reliability",
    "sql_executed": null
}}
"#
    )
}

pub fn intermediate_prompt(question: &str, persona_content: &str, digest: &str) -> String {
    let context: String = persona_content.chars().take(500).collect();
    format!(
        r#"Analyze these Stage 1 results and select the most relevant items for Stage 2 detailed analysis.

Original question: {question}
Context: {context}...

Stage 1 Results:
{digest}

Provide:
1. Brief summary of findings
2. Select the most relevant 1-3 items for detailed Stage 2 analysis
3. Key identifiers (IDs, part numbers, etc.) to use in Stage 2

Return JSON format:
{{
    "summary": "brief summary of Stage 1 findings",
    "selected_items": ["item1_id", "item2_id"],
    "reasoning": "why these items were selected",
    "stage2_focus": "what Stage 2 should analyze"
}}
"#
    )
}

/// Persona name to description, with tables, in catalogue order.
pub fn persona_summaries<'a>(
    personas: &'a BTreeMap<String, String>,
    tables: impl Fn(&str) -> Vec<String>,
) -> Vec<PersonaSummary<'a>> {
    personas
        .iter()
        .map(|(name, description)| PersonaSummary {
            name,
            description,
            tables: tables(name),
        })
        .collect()
}
