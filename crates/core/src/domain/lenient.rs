//! Field deserializers for model-authored JSON. A field of the wrong shape
//! becomes its default instead of failing the whole document.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Strings pass through, scalars are rendered, `null` becomes empty and
/// anything else becomes compact JSON.
pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_text(Value::deserialize(deserializer)?))
}

/// Arrays keep their non-null items as text; a single string is split on
/// commas. Anything else is an empty list.
pub fn text_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().map(item_text).collect(),
        Value::String(text) => text.split(',').map(|part| part.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    Ok(items.into_iter().filter(|item| !item.trim().is_empty()).collect())
}

/// Numbers and numeric strings; everything else is `None`.
pub fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

pub fn object<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

/// Lower-cased label with spaces and hyphens folded to underscores.
pub fn label(value: &Value) -> Option<String> {
    value.as_str().map(|text| text.trim().to_ascii_lowercase().replace(['-', ' '], "_"))
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

/// List items: objects read as their values joined with `; `.
fn item_text(value: Value) -> String {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(_, value)| value_text(value))
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        other => value_text(other),
    }
}
