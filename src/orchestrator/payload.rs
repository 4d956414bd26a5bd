//! Response payloads
//!
//! One serializable type per orchestrator operation. They become JSON only
//! at the edge (CLI output, tool results, resource reads).

use crate::series::{CategoryResult, SeriesTable, Timeline};
use crate::timeframe::{SourceInfo, TimeRange};
use serde::Serialize;
use serde_json::{Map, Value};

pub const STATUS_OK: &str = "ok";

/// Label attached to query timeframes
pub const CUSTOM_LABEL: &str = "custom";

/// Query modes beyond a raw fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Aggregate,
    Timeline,
    Category,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate",
            Self::Timeline => "timeline",
            Self::Category => "category",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeframe {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'static str>,
    pub granularity: String,
}

impl Timeframe {
    pub fn new(range: &TimeRange, granularity: &str) -> Self {
        Self {
            from: range.from.clone(),
            to: range.to.clone(),
            label: None,
            granularity: granularity.to_string(),
        }
    }

    pub fn labelled(range: &TimeRange, granularity: &str) -> Self {
        Self {
            label: Some(CUSTOM_LABEL),
            ..Self::new(range, granularity)
        }
    }
}

/// Observations per metric key or value path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCount {
    pub metric_key: String,
    pub observations: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsListing {
    pub status: &'static str,
    pub timeframe: Timeframe,
    pub paths: Vec<KeyCount>,
    pub total_paths: usize,
}

/// Raw series of one key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPayload {
    pub status: &'static str,
    pub metric_key: String,
    pub timeframe: Timeframe,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatePayload {
    pub status: &'static str,
    pub aggregator: String,
    pub metric_key: String,
    pub value_path: String,
    pub slices: usize,
    pub values: Vec<Value>,
    pub count: usize,
    pub timeframe: Timeframe,
    pub available_paths: Vec<String>,
    pub matched_paths: Vec<String>,
    /// The single value when one slice was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<SeriesTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormattedView {
    Timeline(Timeline),
    Category(CategoryResult),
}

/// Timeline or category reshaping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedPayload {
    pub status: &'static str,
    pub formatter: &'static str,
    pub metric_key: String,
    pub value_path: String,
    pub slices: usize,
    pub timeframe: Timeframe,
    pub result: FormattedView,
    pub available_paths: Vec<String>,
    pub matched_paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<SeriesTable>,
}

/// Query result; remote answers are passed through after path cleanup
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Aggregate(AggregatePayload),
    Formatted(FormattedPayload),
    Remote(Map<String, Value>),
}

impl QueryResult {
    /// Rendered table, if any
    pub fn table(&self) -> Option<SeriesTable> {
        match self {
            QueryResult::Aggregate(payload) => payload.table.clone(),
            QueryResult::Formatted(payload) => payload.table.clone(),
            QueryResult::Remote(data) => data
                .get("table")
                .and_then(|t| serde_json::from_value(t.clone()).ok()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenMetric {
    pub key: String,
    pub at: String,
    pub values: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WriteResult {
    Local { data: WrittenMetric },
    Remote(Value),
}

/// Granularity defaults of the active source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcePayload {
    pub data: SourceInfo,
}
