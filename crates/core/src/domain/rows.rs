use serde_json::{Map, Value};

/// One result row keyed by column name, in column order.
pub type Row = Map<String, Value>;

/// Renders a scalar for prompts and responses. Null renders as `None`.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// `field: value` pairs joined by `, `, skipping nulls.
pub fn render_pairs(row: &Row) -> String {
    row.iter()
        .filter_map(|(key, value)| render_value(value).map(|value| format!("{key}: {value}")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compact JSON rendering of a row set, used for size accounting.
pub fn compact_json(rows: &[Row]) -> String {
    serde_json::to_string(rows).unwrap_or_default()
}

pub fn column_names(rows: &[Row]) -> Vec<String> {
    rows.first().map(|row| row.keys().cloned().collect()).unwrap_or_default()
}
