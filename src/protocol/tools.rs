//! Tool dispatch and result content

use super::catalog::{Tool, JSON_MIME};
use crate::error::{MetricsError, MetricsResult};
use crate::orchestrator::{Args, Orchestrator, QueryMode, QueryRequest, SeriesRequest, WriteRequest};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

/// Result of a tool call; failures are reported in-band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub content: Vec<TextContent>,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: String) -> Self {
        Self {
            content: vec![TextContent { kind: "text", text }],
            is_error: false,
        }
    }

    pub fn error(err: impl Display) -> Self {
        Self {
            content: vec![TextContent {
                kind: "text",
                text: err.to_string(),
            }],
            is_error: true,
        }
    }

    pub fn from_outcome(outcome: MetricsResult<Value>) -> Self {
        match outcome.and_then(|value| Ok(serde_json::to_string_pretty(&value)?)) {
            Ok(text) => Self::text(text),
            Err(err) => Self::error(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceReadResult {
    pub contents: Vec<ResourceContents>,
}

impl ResourceReadResult {
    pub fn json(uri: &str, payload: &Value) -> MetricsResult<Self> {
        Ok(Self {
            contents: vec![ResourceContents {
                uri: uri.to_string(),
                mime_type: JSON_MIME,
                text: serde_json::to_string_pretty(payload)?,
            }],
        })
    }
}

/// Run a tool by name against the orchestrator.
pub async fn execute_tool(
    orchestrator: &Orchestrator,
    name: &str,
    args: &Args,
) -> MetricsResult<Value> {
    let tool = Tool::from_name(name)
        .ok_or_else(|| MetricsError::invalid(format!("unknown tool: {}", name)))?;

    let value = match tool {
        Tool::ListMetrics => {
            serde_json::to_value(orchestrator.list_metrics(&SeriesRequest::from_args(args)).await?)?
        }
        Tool::FetchSeries => {
            serde_json::to_value(orchestrator.fetch_series(&SeriesRequest::from_args(args)).await?)?
        }
        Tool::AggregateSeries => query(orchestrator, QueryMode::Aggregate, args).await?,
        Tool::FormatTimeline => query(orchestrator, QueryMode::Timeline, args).await?,
        Tool::FormatCategory => query(orchestrator, QueryMode::Category, args).await?,
        Tool::WriteMetric => {
            serde_json::to_value(orchestrator.write_metric(&WriteRequest::from_args(args)).await?)?
        }
        Tool::ListTransponders => orchestrator.list_transponders().await?,
        Tool::CreateTransponder => {
            orchestrator
                .create_transponder(args.get("payload").cloned())
                .await?
        }
        Tool::UpdateTransponder => {
            orchestrator
                .update_transponder(&args.string("id"), args.get("payload").cloned())
                .await?
        }
        Tool::DeleteTransponder => orchestrator.delete_transponder(&args.string("id")).await?,
    };
    Ok(value)
}

async fn query(orchestrator: &Orchestrator, mode: QueryMode, args: &Args) -> MetricsResult<Value> {
    let result = orchestrator
        .run_query(&QueryRequest::from_args(mode, args))
        .await?;
    Ok(serde_json::to_value(result)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_shapes() {
        let ok = ToolResult::from_outcome(Ok(json!({"status": "ok"})));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert!(value.get("isError").is_none());
        assert_eq!(
            serde_json::from_str::<Value>(&ok.content[0].text).unwrap(),
            json!({"status": "ok"})
        );

        let failed = ToolResult::from_outcome(Err(MetricsError::invalid("key is required")));
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["isError"], true);
        assert_eq!(value["content"][0]["text"], "key is required");
    }

    #[test]
    fn test_resource_read_result() {
        let result = ResourceReadResult::json("tally://source", &json!({"data": {}})).unwrap();
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["contents"][0]["uri"], "tally://source");
        assert_eq!(value["contents"][0]["mimeType"], "application/json");
    }
}
