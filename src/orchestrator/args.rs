//! Typed requests and loose argument access
//!
//! Agent tool calls carry arguments as a JSON object; the CLI builds the
//! same requests from flags. [`Args`] reads the object leniently (numbers
//! as strings, numeric strings as integers) and each request type pulls
//! what it needs from it.

use super::payload::QueryMode;
use crate::backend::WriteMode;
use crate::error::{MetricsError, MetricsResult};
use serde_json::{Map, Value};
use std::path::Path;

/// Lenient view over a JSON argument object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Map<String, Value>);

impl Args {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builder used by the CLI and resource reader
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// String form of an argument; missing or null is empty.
    pub fn string(&self, key: &str) -> String {
        match self.get(key) {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Trimmed string, `None` when blank
    pub fn opt_string(&self, key: &str) -> Option<String> {
        let value = self.string(key);
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Integer argument; numbers are truncated, numeric strings parsed.
    pub fn int(&self, key: &str, fallback: i64) -> i64 {
        match self.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(fallback),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(fallback),
            _ => fallback,
        }
    }

    /// Boolean argument; `"true"`/`"1"` strings count as set.
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1"),
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        }
    }
}

impl From<Map<String, Value>> for Args {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// `from`, `to` and `granularity` as supplied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeArgs {
    pub from: Option<String>,
    pub to: Option<String>,
    pub granularity: Option<String>,
}

impl RangeArgs {
    pub fn from_args(args: &Args) -> Self {
        Self {
            from: args.opt_string("from"),
            to: args.opt_string("to"),
            granularity: args.opt_string("granularity"),
        }
    }
}

/// Listing or raw fetch of one key (the system key when absent)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesRequest {
    pub key: Option<String>,
    pub range: RangeArgs,
    /// Drop buckets with no data from raw fetches
    pub skip_blanks: bool,
}

impl SeriesRequest {
    pub fn from_args(args: &Args) -> Self {
        Self {
            key: args.opt_string("key"),
            range: RangeArgs::from_args(args),
            skip_blanks: args.flag("skip_blanks"),
        }
    }
}

/// Aggregate, timeline or category query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub mode: QueryMode,
    pub key: String,
    pub value_path: String,
    pub aggregator: Option<String>,
    /// Requested slice count; values below one mean one
    pub slices: i64,
    pub range: RangeArgs,
}

impl QueryRequest {
    pub fn from_args(mode: QueryMode, args: &Args) -> Self {
        Self {
            mode,
            key: args.string("key").trim().to_string(),
            value_path: args.string("value_path").trim().to_string(),
            aggregator: args.opt_string("aggregator"),
            slices: args.int("slices", 1),
            range: RangeArgs::from_args(args),
        }
    }

    pub fn slice_count(&self) -> usize {
        self.slices.max(1) as usize
    }
}

/// One metric event
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub key: String,
    pub values: Option<Value>,
    pub at: Option<String>,
    pub mode: WriteMode,
}

impl WriteRequest {
    /// Agent writes always track.
    pub fn from_args(args: &Args) -> Self {
        Self {
            key: args.string("key").trim().to_string(),
            values: args.get("values").cloned(),
            at: args.opt_string("at"),
            mode: WriteMode::Track,
        }
    }
}

/// Read a JSON payload from a file (preferred) or an inline string.
///
/// Returns `None` when both are empty.
pub fn load_json_payload(raw: Option<&str>, file: Option<&Path>) -> MetricsResult<Option<Value>> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| MetricsError::invalid(format!("read payload file: {}", e)))?,
        None => raw.unwrap_or_default().to_string(),
    };

    if text.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| MetricsError::invalid(format!("parse JSON payload: {}", e)))
}
