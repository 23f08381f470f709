//! Bounded textual digests of row sets for LLM prompts.
//!
//! Fields whose non-null values agree across the sampled rows are hoisted
//! once into a `Common:` segment; only distinguishing values are repeated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::rows::{compact_json, render_pairs, render_value, Row};

pub const NO_DATA: &str = "No data available";
pub const DEFAULT_MAX_RECORDS: usize = 10;
const MAX_VARIANT_ROWS: usize = 5;
const MAX_PLAIN_ROWS: usize = 3;

/// Size accounting for one digest. Reported to telemetry only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression_ratio: f64,
    pub token_savings: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompressionDigest {
    pub text: String,
    pub stats: CompressionStats,
}

/// Compresses `records` and measures the result in one step.
pub fn digest(records: &[Row], max_records: usize) -> CompressionDigest {
    let text = compress(records, max_records);
    let stats = compression_stats(records, &text);
    CompressionDigest { text, stats }
}

pub fn compress(records: &[Row], max_records: usize) -> String {
    let limited = &records[..records.len().min(max_records)];
    let Some(first) = limited.first() else {
        return NO_DATA.to_string();
    };
    if limited.len() == 1 {
        return render_pairs(first);
    }

    let mut common: Vec<(&str, Option<&Value>)> = Vec::new();
    for key in first.keys() {
        let mut distinct: Vec<&Value> = Vec::new();
        for value in limited.iter().filter_map(|record| record.get(key)) {
            if !value.is_null() && !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        if distinct.len() <= 1 {
            common.push((key.as_str(), distinct.first().copied()));
        }
    }

    if common.is_empty() {
        return limited
            .iter()
            .take(MAX_PLAIN_ROWS)
            .map(render_pairs)
            .collect::<Vec<_>>()
            .join(" | ");
    }

    let is_common = |key: &str| common.iter().any(|(name, _)| *name == key);
    let variants: Vec<String> = limited
        .iter()
        .map(|record| {
            record
                .iter()
                .filter(|(key, _)| !is_common(key))
                .filter_map(|(key, value)| labelled(key, Some(value)))
                .collect::<Vec<_>>()
        })
        .filter(|pairs| !pairs.is_empty())
        .take(MAX_VARIANT_ROWS)
        .map(|pairs| pairs.join(", "))
        .collect();

    let common_text = common
        .iter()
        .filter_map(|(key, value)| labelled(key, *value))
        .collect::<Vec<_>>()
        .join(", ");

    format!("Common: {common_text} | Variants: {}", variants.join(" | "))
}

fn labelled(key: &str, value: Option<&Value>) -> Option<String> {
    value.and_then(render_value).map(|value| format!("{key}: {value}"))
}

/// `original_size` counts characters of the compact JSON rendering of the
/// untruncated rows. An empty input reports zero for everything.
pub fn compression_stats(records: &[Row], compressed: &str) -> CompressionStats {
    if records.is_empty() {
        return CompressionStats::default();
    }

    let original_size = compact_json(records).chars().count();
    let compressed_size = compressed.chars().count();
    let savings = original_size as i64 - compressed_size as i64;
    let ratio = if original_size > 0 { savings as f64 / original_size as f64 } else { 0.0 };

    CompressionStats {
        original_size,
        compressed_size,
        compression_ratio: (ratio * 1000.0).round() / 1000.0,
        token_savings: savings,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{compress, compression_stats, digest, DEFAULT_MAX_RECORDS, NO_DATA};
    use crate::domain::rows::Row;

    fn rows(values: serde_json::Value) -> Vec<Row> {
        values
            .as_array()
            .map(|items| items.iter().filter_map(|item| item.as_object().cloned()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn empty_input_yields_sentinel() {
        assert_eq!(compress(&[], DEFAULT_MAX_RECORDS), NO_DATA);
        assert_eq!(compress(&[], DEFAULT_MAX_RECORDS), "No data available");
    }

    #[test]
    fn single_row_renders_pairs_without_nulls() {
        assert_eq!(compress(&rows(json!([{"a": 1}])), DEFAULT_MAX_RECORDS), "a: 1");
        assert_eq!(
            compress(&rows(json!([{"a": 1, "b": null, "c": "x"}])), DEFAULT_MAX_RECORDS),
            "a: 1, c: x"
        );
    }

    #[test]
    fn shared_status_is_hoisted_and_ids_are_listed() {
        let records = rows(json!([
            {"id": 1, "status": "active"},
            {"id": 2, "status": "active"},
            {"id": 3, "status": "active"},
            {"id": 4, "status": "active"},
            {"id": 5, "status": "active"}
        ]));

        let digest = compress(&records, DEFAULT_MAX_RECORDS);
        assert_eq!(
            digest,
            "Common: status: active | Variants: id: 1 | id: 2 | id: 3 | id: 4 | id: 5"
        );
    }

    #[test]
    fn two_row_example_hoists_a() {
        let records = rows(json!([{"a": 1, "b": "x"}, {"a": 1, "b": "y"}]));
        assert_eq!(compress(&records, DEFAULT_MAX_RECORDS), "Common: a: 1 | Variants: b: x | b: y");
    }

    #[test]
    fn variants_are_capped_at_five() {
        let records: Vec<Row> = (1..=8)
            .filter_map(|id| json!({"id": id, "kind": "kit"}).as_object().cloned())
            .collect();

        let digest = compress(&records, DEFAULT_MAX_RECORDS);
        assert!(digest.ends_with("id: 5"));
        assert!(!digest.contains("id: 6"));
    }

    #[test]
    fn all_null_field_counts_as_common_but_is_not_rendered() {
        let records = rows(json!([{"a": null, "b": 1}, {"a": null, "b": 2}]));
        assert_eq!(compress(&records, DEFAULT_MAX_RECORDS), "Common:  | Variants: b: 1 | b: 2");
    }

    #[test]
    fn without_common_fields_three_rows_are_shown() {
        let records = rows(json!([{"a": 1}, {"a": 2}, {"a": 3}, {"a": 4}]));
        assert_eq!(compress(&records, DEFAULT_MAX_RECORDS), "a: 1 | a: 2 | a: 3");
    }

    #[test]
    fn truncation_happens_before_common_detection() {
        let records = rows(json!([{"a": 1, "b": 1}, {"a": 1, "b": 2}, {"a": 9, "b": 3}]));
        assert_eq!(compress(&records, 2), "Common: a: 1 | Variants: b: 1 | b: 2");
    }

    #[test]
    fn stats_for_empty_input_are_zero() {
        let stats = compression_stats(&[], NO_DATA);
        assert_eq!(stats.compression_ratio, 0.0);
        assert_eq!(stats.token_savings, 0);
    }

    #[test]
    fn stats_measure_savings_against_json_rendering() {
        let records = rows(json!([{"a": 1, "b": "x"}, {"a": 1, "b": "y"}]));
        let result = digest(&records, DEFAULT_MAX_RECORDS);

        let original = r#"[{"a":1,"b":"x"},{"a":1,"b":"y"}]"#.len();
        assert_eq!(result.stats.original_size, original);
        assert_eq!(result.stats.compressed_size, result.text.len());
        assert_eq!(result.stats.token_savings, original as i64 - result.text.len() as i64);
        let expected = ((original as f64 - result.text.len() as f64) / original as f64 * 1000.0)
            .round()
            / 1000.0;
        assert_eq!(result.stats.compression_ratio, expected);
    }
}
