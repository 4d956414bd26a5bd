//! Value-map packing
//!
//! Nested value maps are addressed by dot-joined paths (`events.signup`).
//! Packing flattens a map into `path -> leaf`; unpacking rebuilds it.

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Separator between path segments
pub const PATH_SEPARATOR: char = '.';

/// Flatten a value map into non-null leaves keyed by path.
pub fn pack(values: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in values {
        pack_into(key, value, &mut out);
    }
    out
}

/// Flatten `value` with every leaf path prefixed by `prefix`.
pub fn pack_value(prefix: &str, value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    pack_into(prefix, value, &mut out);
    out
}

fn pack_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}{}{}", prefix, PATH_SEPARATOR, key)
                };
                pack_into(&path, nested, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}

/// Rebuild a nested map from packed leaves.
pub fn unpack(packed: &BTreeMap<String, Value>) -> Map<String, Value> {
    let mut root = Map::new();
    for (path, value) in packed {
        insert_path(&mut root, path, value.clone());
    }
    root
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split(PATH_SEPARATOR).peekable();
    let mut current = root;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(next) => current = next,
            _ => return,
        }
    }
}

/// Look up a dot-joined path; null leaves count as absent.
pub fn fetch_path<'a>(values: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split(PATH_SEPARATOR);
    let first = segments.next()?;
    let mut current = values.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Numeric view of a leaf; numeric strings are accepted.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Render a float as an integer when it has no fractional part.
pub fn normalize_number(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Normalize a numeric leaf; non-numeric leaves are returned unchanged.
pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => n.as_f64().map(normalize_number).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// Parse a stored scalar (key-value stores return text) back into JSON.
pub fn parse_scalar(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(Number::from(int));
    }
    if let Ok(float) = raw.parse::<f64>() {
        return normalize_number(float);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn add_numbers(a: &Value, b: &Value) -> Option<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Some(Value::Number(Number::from(sum)));
        }
    }
    let x = a.as_f64()?;
    let y = b.as_f64()?;
    Some(normalize_number(x + y))
}

/// Add every numeric leaf of `source` into `target`; other leaves overwrite.
pub fn deep_inc(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, incoming) in source {
        match incoming {
            Value::Null => {}
            Value::Object(nested) => {
                let entry = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                if let Value::Object(existing) = entry {
                    deep_inc(existing, nested);
                }
            }
            Value::Number(_) => {
                let merged = target
                    .get(key)
                    .and_then(|current| add_numbers(current, incoming))
                    .unwrap_or_else(|| incoming.clone());
                target.insert(key.clone(), merged);
            }
            leaf => {
                target.insert(key.clone(), leaf.clone());
            }
        }
    }
}

/// Overwrite every leaf of `source` into `target`, keeping other leaves.
pub fn deep_set(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, incoming) in source {
        match incoming {
            Value::Object(nested) => {
                let entry = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                if let Value::Object(existing) = entry {
                    deep_set(existing, nested);
                }
            }
            leaf => {
                target.insert(key.clone(), leaf.clone());
            }
        }
    }
}
