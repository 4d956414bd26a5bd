//! Tool and resource catalog
//!
//! Transponder tools and the transponder resource only exist for the
//! remote API; local drivers advertise the metric tools alone.

use crate::series::Aggregator;
use serde::Serialize;
use serde_json::{json, Value};

pub const URI_SCHEME: &str = "tally";
pub const JSON_MIME: &str = "application/json";

/// Tools the server knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ListMetrics,
    FetchSeries,
    AggregateSeries,
    FormatTimeline,
    FormatCategory,
    WriteMetric,
    ListTransponders,
    CreateTransponder,
    UpdateTransponder,
    DeleteTransponder,
}

impl Tool {
    pub const METRICS: [Tool; 6] = [
        Tool::ListMetrics,
        Tool::FetchSeries,
        Tool::AggregateSeries,
        Tool::FormatTimeline,
        Tool::FormatCategory,
        Tool::WriteMetric,
    ];

    pub const TRANSPONDERS: [Tool; 4] = [
        Tool::ListTransponders,
        Tool::CreateTransponder,
        Tool::UpdateTransponder,
        Tool::DeleteTransponder,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::METRICS
            .iter()
            .chain(Self::TRANSPONDERS.iter())
            .copied()
            .find(|tool| tool.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tool::ListMetrics => "list_metrics",
            Tool::FetchSeries => "fetch_series",
            Tool::AggregateSeries => "aggregate_series",
            Tool::FormatTimeline => "format_timeline",
            Tool::FormatCategory => "format_category",
            Tool::WriteMetric => "write_metric",
            Tool::ListTransponders => "list_transponders",
            Tool::CreateTransponder => "create_transponder",
            Tool::UpdateTransponder => "update_transponder",
            Tool::DeleteTransponder => "delete_transponder",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tool::ListMetrics => "List available metric keys from the system series.",
            Tool::FetchSeries => "Fetch raw series data for a metric key.",
            Tool::AggregateSeries => "Aggregate a metric series (sum, mean, min, max).",
            Tool::FormatTimeline => "Format a metric series into timeline entries.",
            Tool::FormatCategory => "Format a metric series into categorical totals.",
            Tool::WriteMetric => "Write a metric event.",
            Tool::ListTransponders => "List transponders for the active source.",
            Tool::CreateTransponder => "Create a transponder for the active source.",
            Tool::UpdateTransponder => "Update a transponder by id.",
            Tool::DeleteTransponder => "Delete a transponder by id.",
        }
    }

    pub fn input_schema(&self) -> Value {
        match self {
            Tool::ListMetrics => object_schema(range_properties(), &[]),
            Tool::FetchSeries => {
                let mut props = range_properties();
                props.insert("key".into(), string_schema());
                props.insert("skip_blanks".into(), json!({"type": "boolean"}));
                object_schema(props, &[])
            }
            Tool::AggregateSeries => {
                let mut props = query_properties();
                props.insert(
                    "aggregator".into(),
                    json!({
                        "type": "string",
                        "enum": Aggregator::ALL.iter().map(|a| a.as_str()).collect::<Vec<_>>()
                    }),
                );
                object_schema(props, &["key", "value_path", "aggregator"])
            }
            Tool::FormatTimeline | Tool::FormatCategory => {
                object_schema(query_properties(), &["key", "value_path"])
            }
            Tool::WriteMetric => {
                let mut props = serde_json::Map::new();
                props.insert("key".into(), string_schema());
                props.insert(
                    "values".into(),
                    json!({"type": ["object", "array", "string", "number", "boolean", "null"]}),
                );
                props.insert("at".into(), timestamp_schema());
                object_schema(props, &["key", "values"])
            }
            Tool::ListTransponders => object_schema(serde_json::Map::new(), &[]),
            Tool::CreateTransponder => {
                let mut props = serde_json::Map::new();
                props.insert("payload".into(), json!({"type": "object"}));
                object_schema(props, &["payload"])
            }
            Tool::UpdateTransponder => {
                let mut props = serde_json::Map::new();
                props.insert("id".into(), string_schema());
                props.insert("payload".into(), json!({"type": "object"}));
                object_schema(props, &["id", "payload"])
            }
            Tool::DeleteTransponder => {
                let mut props = serde_json::Map::new();
                props.insert("id".into(), string_schema());
                object_schema(props, &["id"])
            }
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name(),
            description: self.description(),
            input_schema: self.input_schema(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Tools advertised for the active backend
pub fn tool_definitions(remote: bool) -> Vec<ToolDefinition> {
    let mut tools: Vec<ToolDefinition> = Tool::METRICS.iter().map(Tool::definition).collect();
    if remote {
        tools.extend(Tool::TRANSPONDERS.iter().map(Tool::definition));
    }
    tools
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

impl ResourceDescriptor {
    fn new(path: &str, name: &'static str, description: &'static str) -> Self {
        Self {
            uri: format!("{}://{}", URI_SCHEME, path),
            name,
            description,
            mime_type: JSON_MIME,
        }
    }
}

/// Resources advertised for the active backend
pub fn resource_list(remote: bool) -> Vec<ResourceDescriptor> {
    let mut resources = vec![
        ResourceDescriptor::new(
            "source",
            "Source configuration",
            "Active analytics source configuration (defaults and granularities).",
        ),
        ResourceDescriptor::new(
            "metrics",
            "Metrics listing",
            "Available metrics from __system__key__ (use ?from&to RFC3339, granularity like 1h).",
        ),
        ResourceDescriptor::new(
            "metrics/{key}",
            "Metric series",
            "Raw series for a metric key (use ?from&to RFC3339, granularity like 1h).",
        ),
    ];
    if remote {
        resources.push(ResourceDescriptor::new(
            "transponders",
            "Transponders",
            "List transponders for the active source.",
        ));
    }
    resources
}

fn object_schema(properties: serde_json::Map<String, Value>, required: &[&str]) -> Value {
    let mut schema = json!({"type": "object", "properties": properties});
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

fn string_schema() -> Value {
    json!({"type": "string"})
}

fn timestamp_schema() -> Value {
    json!({
        "type": "string",
        "description": "RFC3339 timestamp (e.g. 2024-01-02T15:04:05Z)."
    })
}

fn granularity_schema() -> Value {
    json!({
        "type": "string",
        "description": "Granularity as <number><unit> (e.g. 1m, 1h, 1d).",
        "pattern": "^\\d+(s|m|h|d|w|mo|q|y)$"
    })
}

fn range_properties() -> serde_json::Map<String, Value> {
    let mut props = serde_json::Map::new();
    props.insert("from".into(), timestamp_schema());
    props.insert("to".into(), timestamp_schema());
    props.insert("granularity".into(), granularity_schema());
    props
}

fn query_properties() -> serde_json::Map<String, Value> {
    let mut props = range_properties();
    props.insert("key".into(), string_schema());
    props.insert("value_path".into(), string_schema());
    props.insert("slices".into(), json!({"type": "integer", "minimum": 1}));
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_round_trip() {
        for tool in Tool::METRICS.iter().chain(Tool::TRANSPONDERS.iter()) {
            assert_eq!(Tool::from_name(tool.name()), Some(*tool));
        }
        assert_eq!(Tool::from_name("drop_everything"), None);
    }

    #[test]
    fn test_transponder_tools_are_remote_only() {
        let local: Vec<&str> = tool_definitions(false).iter().map(|t| t.name).collect();
        assert_eq!(local.len(), 6);
        assert!(!local.iter().any(|name| name.contains("transponder")));

        let remote: Vec<&str> = tool_definitions(true).iter().map(|t| t.name).collect();
        assert_eq!(remote.len(), 10);
        assert!(remote.contains(&"delete_transponder"));
    }

    #[test]
    fn test_aggregate_schema() {
        let schema = Tool::AggregateSeries.input_schema();
        assert_eq!(schema["required"], json!(["key", "value_path", "aggregator"]));
        assert_eq!(
            schema["properties"]["aggregator"]["enum"],
            json!(["sum", "mean", "min", "max"])
        );
        assert_eq!(schema["properties"]["slices"]["minimum"], json!(1));
        assert!(schema["properties"]["granularity"]["pattern"]
            .as_str()
            .unwrap()
            .contains("mo|q|y"));
        assert!(Tool::ListMetrics.input_schema().get("required").is_none());
    }

    #[test]
    fn test_resource_list() {
        let local = resource_list(false);
        assert_eq!(local.len(), 3);
        assert_eq!(local[0].uri, "tally://source");
        assert_eq!(local[2].uri, "tally://metrics/{key}");

        let remote = resource_list(true);
        assert_eq!(remote.len(), 4);
        let value = serde_json::to_value(&remote[3]).unwrap();
        assert_eq!(value["uri"], "tally://transponders");
        assert_eq!(value["mimeType"], "application/json");
    }
}
