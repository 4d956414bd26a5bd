//! Observation counts for key listings

use super::payload::KeyCount;
use crate::stats::packer::pack;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Sum the `keys` counters of system-key buckets, one entry per metric key.
pub fn summarize_system_keys(values: &[Map<String, Value>]) -> Vec<KeyCount> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for row in values {
        if let Some(Value::Object(keys)) = row.get("keys") {
            for (key, value) in keys {
                *counts.entry(key.clone()).or_insert(0) += to_i64(value);
            }
        }
    }
    entries(counts)
}

/// Count the buckets carrying each value path.
pub fn summarize_value_paths(values: &[Map<String, Value>]) -> Vec<KeyCount> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for row in values.iter().filter(|row| !row.is_empty()) {
        for path in pack(row).into_keys() {
            *counts.entry(path).or_insert(0) += 1;
        }
    }
    entries(counts)
}

/// Same as [`summarize_system_keys`] for a remote `values` array.
pub fn summarize_remote_values(values: Option<&Value>) -> Vec<KeyCount> {
    let rows: Vec<Map<String, Value>> = match values {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    };
    summarize_system_keys(&rows)
}

/// Numbers truncate toward zero; anything else counts as zero.
fn to_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

fn entries(counts: BTreeMap<String, i64>) -> Vec<KeyCount> {
    counts
        .into_iter()
        .map(|(metric_key, observations)| KeyCount {
            metric_key,
            observations,
        })
        .collect()
}
