//! Line-delimited JSON-RPC server
//!
//! Reads one request per line, answers requests that carry an id, and
//! never answers notifications. Malformed lines are logged and skipped so
//! a single bad client message does not end the session.

use super::catalog::{resource_list, tool_definitions};
use super::resources::read_resource;
use super::rpc::{JsonRpcRequest, JsonRpcResponse, RpcError, PROTOCOL_VERSION};
use super::tools::{execute_tool, ResourceReadResult, ToolResult};
use crate::orchestrator::{Args, Orchestrator};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub const SERVER_NAME: &str = "tally";

#[derive(Debug, Default, Deserialize)]
struct InitializeParams {
    #[serde(default, rename = "protocolVersion")]
    protocol_version: String,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ResourceReadParams {
    #[serde(default)]
    uri: String,
}

/// Agent-facing server over an [`Orchestrator`]
pub struct AgentServer {
    orchestrator: Orchestrator,
}

impl AgentServer {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Serve on the process's stdin and stdout.
    pub async fn serve_stdio(&self) -> io::Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        self.serve(reader, tokio::io::stdout()).await
    }

    /// Serve until end of input or an `exit` request.
    ///
    /// Buffered local writes are flushed when the session ends, including
    /// when reading or writing fails.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(driver = self.orchestrator.driver_name(), "agent server started");

        let session = self.session(reader, &mut writer).await;
        let flushed = writer.flush().await;

        if let Err(e) = self.orchestrator.flush().await {
            tracing::error!(error = %e, "Failed to flush buffered metrics");
        }
        tracing::info!("agent server stopped");
        session.and(flushed)
    }

    async fn session<R, W>(&self, mut reader: R, writer: &mut W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping line that is not valid UTF-8");
                    continue;
                }
            };
            if !self.handle_line(line, writer).await? {
                return Ok(());
            }
        }
    }

    /// Handle one input line.
    ///
    /// Returns false if the session should end.
    async fn handle_line<W>(&self, line: &str, writer: &mut W) -> io::Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        if line.trim().is_empty() {
            return Ok(true);
        }

        let message = match serde_json::from_str::<Value>(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid JSON-RPC message");
                return Ok(true);
            }
        };
        let request = match JsonRpcRequest::deserialize(&message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed JSON-RPC request");
                if let Some(id) = answerable_id(&message) {
                    let response = JsonRpcResponse::failure(
                        Some(id),
                        RpcError::invalid_request(format!("invalid request: {}", e)),
                    );
                    self.write_response(writer, &response).await?;
                }
                return Ok(true);
            }
        };
        if request.jsonrpc.trim().is_empty() {
            tracing::debug!(method = %request.method, "Ignoring message without jsonrpc version");
            return Ok(true);
        }

        let exit = request.method == "exit";
        let outcome = self.handle_request(&request).await;

        if request.is_notification() {
            if let Err(e) = outcome {
                tracing::debug!(method = %request.method, error = %e, "Notification failed");
            }
            return Ok(!exit);
        }

        let response = match outcome {
            Ok(Some(result)) => JsonRpcResponse::success(request.id.clone(), result),
            Ok(None) => return Ok(!exit),
            Err(e) => JsonRpcResponse::failure(request.id.clone(), e),
        };
        self.write_response(writer, &response).await?;
        Ok(!exit)
    }

    async fn write_response<W>(&self, writer: &mut W, response: &JsonRpcResponse) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let text = match serde_json::to_string(response) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize response");
                let fallback =
                    JsonRpcResponse::failure(response.id.clone(), RpcError::internal(e.to_string()));
                serde_json::to_string(&fallback)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            }
        };
        writer.write_all(text.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Dispatch a request; `Ok(None)` means there is nothing to answer.
    pub async fn handle_request(&self, request: &JsonRpcRequest) -> Result<Option<Value>, RpcError> {
        let result = match request.method.as_str() {
            "initialize" => self.initialize(request.params())?,
            "initialized" => return Ok(None),
            "shutdown" | "exit" => json!({}),
            "tools/list" => json!({"tools": tool_definitions(self.orchestrator.is_remote())}),
            "tools/call" => self.call_tool(request.params()).await?,
            "resources/list" => {
                json!({"resources": resource_list(self.orchestrator.is_remote())})
            }
            "resources/read" => self.read_resource(request.params()).await?,
            other => return Err(RpcError::method_not_found(other)),
        };
        Ok(Some(result))
    }

    fn initialize(&self, params: Option<&Value>) -> Result<Value, RpcError> {
        let params = match params {
            Some(value) => InitializeParams::deserialize(value)
                .map_err(|_| RpcError::invalid_params("invalid initialize params"))?,
            None => InitializeParams::default(),
        };
        let version = match params.protocol_version.trim() {
            "" => PROTOCOL_VERSION.to_string(),
            v => v.to_string(),
        };

        Ok(json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": {"listChanged": false},
                "resources": {"listChanged": false}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        }))
    }

    async fn call_tool(&self, params: Option<&Value>) -> Result<Value, RpcError> {
        let params = params.ok_or_else(|| RpcError::invalid_params("missing params"))?;
        let call = ToolCallParams::deserialize(params)
            .map_err(|_| RpcError::invalid_params("invalid tool call params"))?;
        let name = call.name.trim();
        if name.is_empty() {
            return Err(RpcError::invalid_params("tool name required"));
        }

        let args = Args::new(call.arguments.unwrap_or_default());
        let outcome = execute_tool(&self.orchestrator, name, &args).await;
        if let Err(e) = &outcome {
            tracing::debug!(tool = name, error = %e, "Tool call failed");
        }
        to_result(ToolResult::from_outcome(outcome))
    }

    async fn read_resource(&self, params: Option<&Value>) -> Result<Value, RpcError> {
        let params = params.ok_or_else(|| RpcError::invalid_params("missing params"))?;
        let read = ResourceReadParams::deserialize(params)
            .map_err(|_| RpcError::invalid_params("invalid resource params"))?;
        let uri = read.uri.trim();
        if uri.is_empty() {
            return Err(RpcError::invalid_params("uri required"));
        }

        let outcome = read_resource(&self.orchestrator, uri)
            .await
            .and_then(|payload| ResourceReadResult::json(uri, &payload));
        match outcome {
            Ok(result) => to_result(result),
            Err(e) => to_result(ToolResult::error(e)),
        }
    }
}

fn to_result(result: impl serde::Serialize) -> Result<Value, RpcError> {
    serde_json::to_value(result).map_err(|e| RpcError::internal(e.to_string()))
}

/// Id of a message that failed to parse as a request, when it is one a
/// client expects an answer to.
fn answerable_id(message: &Value) -> Option<Value> {
    let versioned = message
        .get("jsonrpc")
        .and_then(Value::as_str)
        .is_some_and(|v| !v.trim().is_empty());
    match message.get("id") {
        Some(id) if versioned && !id.is_null() => Some(id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        Backend, DriverKind, DriverOptions, LocalBackend, RemoteClient, RemoteConfig,
    };
    use crate::stats::driver::MEMORY_PATH;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

    async fn local_server() -> AgentServer {
        let options = DriverOptions {
            db_path: MEMORY_PATH.to_string(),
            buffer_mode: "off".to_string(),
            ..DriverOptions::default()
        };
        let backend = LocalBackend::connect(DriverKind::Sqlite, &options).await.unwrap();
        backend.setup().await.unwrap();
        AgentServer::new(Orchestrator::new(Backend::Local(backend)))
    }

    fn remote_server() -> AgentServer {
        let client = RemoteClient::new(RemoteConfig {
            base_url: "127.0.0.1:9".to_string(),
            ..RemoteConfig::default()
        })
        .unwrap();
        AgentServer::new(Orchestrator::new(Backend::Remote(client)))
    }

    async fn exchange(server: &AgentServer, input: &str) -> Vec<Value> {
        exchange_bytes(server, input.as_bytes()).await
    }

    async fn exchange_bytes(server: &AgentServer, input: &[u8]) -> Vec<Value> {
        let mut output: Vec<u8> = Vec::new();
        server.serve(input, &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn tool_text(response: &Value) -> &str {
        response["result"]["content"][0]["text"].as_str().unwrap()
    }

    #[tokio::test]
    async fn test_initialize() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-01-01","clientInfo":{"name":"t"}}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","method":"initialized"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"initialize"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":3,"method":"initialize","params":[1]}"#,
                "\n"
            ),
        )
        .await;

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["protocolVersion"], "2025-01-01");
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], "tally");
        assert_eq!(
            responses[0]["result"]["capabilities"]["tools"]["listChanged"],
            false
        );
        assert_eq!(responses[1]["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(responses[2]["error"]["code"], -32602);
        assert_eq!(responses[2]["error"]["message"], "invalid initialize params");
    }

    #[tokio::test]
    async fn test_aggregate_without_data_is_tool_error() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"aggregate_series","arguments":{"key":"signup","value_path":"count","aggregator":"sum","from":"2024-01-02T15:00:00Z","to":"2024-01-02T15:00:00Z","granularity":"1h"}}}"#,
        )
        .await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["isError"], true);
        assert!(tool_text(&responses[0]).contains("no data available"));
    }

    #[tokio::test]
    async fn test_write_then_aggregate() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"write_metric","arguments":{"key":"signup","values":{"count":2},"at":"2024-01-02T15:00:00Z"}}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"aggregate_series","arguments":{"key":"signup","value_path":"count","aggregator":"sum","from":"2024-01-02T15:00:00Z","to":"2024-01-02T15:00:00Z","granularity":"1h"}}}"#,
                "\n"
            ),
        )
        .await;

        assert_eq!(responses.len(), 2);
        assert!(responses[0]["result"].get("isError").is_none());
        let written: Value = serde_json::from_str(tool_text(&responses[0])).unwrap();
        assert_eq!(written["data"]["key"], "signup");

        let aggregate: Value = serde_json::from_str(tool_text(&responses[1])).unwrap();
        assert_eq!(aggregate["aggregator"], "sum");
        assert_eq!(aggregate["value"], 2);
    }

    #[tokio::test]
    async fn test_notifications_are_never_answered() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","method":"no/such/method"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":null,"method":"tools/call"}"#,
                "\n"
            ),
        )
        .await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_bad_lines_are_skipped() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            concat!(
                "\n",
                "not json\n",
                r#"{"id":1,"method":"tools/list"}"#,
                "\n",
                r#"{"jsonrpc":"","id":2,"method":"tools/list"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":3,"method":"nope"}"#,
                "\n"
            ),
        )
        .await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 3);
        assert_eq!(responses[0]["error"]["code"], -32601);
        assert_eq!(responses[0]["error"]["message"], "method not found: nope");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let server = local_server().await;
        let mut input = b"\xff\xfe\n".to_vec();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"shutdown"}"#);
        input.push(b'\n');

        let responses = exchange_bytes(&server, &input).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"], json!({}));
    }

    #[tokio::test]
    async fn test_malformed_request_with_id_is_answered() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":7,"method":5}"#,
                "\n",
                r#"{"jsonrpc":"2.0","method":5}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":null,"method":5}"#,
                "\n",
                r#"[1,2]"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":8,"method":"shutdown"}"#,
                "\n"
            ),
        )
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 7);
        assert_eq!(responses[0]["error"]["code"], -32600);
        assert!(responses[0]["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("invalid request"));
        assert_eq!(responses[1]["id"], 8);
    }

    struct BrokenInput;

    impl AsyncRead for BrokenInput {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "input closed")))
        }
    }

    #[tokio::test]
    async fn test_read_error_still_flushes_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("stats.db").to_string_lossy().to_string();
        let buffered = DriverOptions {
            db_path: db.clone(),
            buffer_mode: "on".to_string(),
            buffer_size: 100,
            buffer_duration: std::time::Duration::from_secs(3600),
            ..DriverOptions::default()
        };
        let backend = LocalBackend::connect(DriverKind::Sqlite, &buffered).await.unwrap();
        backend.setup().await.unwrap();
        assert!(backend.is_buffered());
        let server = AgentServer::new(Orchestrator::new(Backend::Local(backend)));

        let line = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"write_metric","arguments":{"key":"signup","values":{"count":2},"at":"2024-01-02T15:00:00Z"}}}"#,
            "\n"
        );
        let reader = BufReader::new(line.as_bytes().chain(BrokenInput));
        let mut output: Vec<u8> = Vec::new();
        let err = server.serve(reader, &mut output).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(String::from_utf8(output).unwrap().lines().count(), 1);

        let unbuffered = DriverOptions {
            db_path: db,
            buffer_mode: "off".to_string(),
            ..DriverOptions::default()
        };
        let reader = LocalBackend::connect(DriverKind::Sqlite, &unbuffered).await.unwrap();
        let moment = chrono::DateTime::parse_from_rfc3339("2024-01-02T15:00:00Z").unwrap();
        let series = reader
            .fetch_values("signup", moment, moment, "1h", true)
            .await
            .unwrap();
        assert_eq!(series.values[0].get("count"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_exit_ends_session() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"shutdown"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"exit"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
                "\n"
            ),
        )
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"], json!({}));
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["result"], json!({}));
    }

    #[tokio::test]
    async fn test_tool_call_param_errors() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":"x"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":" "}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"drop_all"}}"#,
                "\n"
            ),
        )
        .await;

        assert_eq!(responses[0]["error"]["message"], "missing params");
        assert_eq!(responses[1]["error"]["message"], "invalid tool call params");
        assert_eq!(responses[2]["error"]["message"], "tool name required");
        assert_eq!(responses[3]["result"]["isError"], true);
        assert_eq!(tool_text(&responses[3]), "unknown tool: drop_all");
    }

    #[tokio::test]
    async fn test_catalog_depends_on_backend() {
        let local = local_server().await;
        let responses = exchange(
            &local,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#,
                "\n"
            ),
        )
        .await;
        assert_eq!(responses[0]["result"]["tools"].as_array().unwrap().len(), 6);
        assert_eq!(responses[1]["result"]["resources"].as_array().unwrap().len(), 3);

        let remote = remote_server();
        let responses = exchange(
            &remote,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
        )
        .await;
        assert_eq!(responses[0]["result"]["tools"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_resource_reads() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"tally://source"}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"resources/read","params":{"uri":"file://source"}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":3,"method":"resources/read","params":{"uri":"tally://elsewhere"}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":4,"method":"resources/read","params":{"uri":""}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":5,"method":"resources/read","params":{"uri":"tally://transponders"}}"#,
                "\n"
            ),
        )
        .await;

        let contents = &responses[0]["result"]["contents"][0];
        assert_eq!(contents["uri"], "tally://source");
        assert_eq!(contents["mimeType"], "application/json");
        let source: Value = serde_json::from_str(contents["text"].as_str().unwrap()).unwrap();
        assert!(source["data"]["default_granularity"].is_string());

        assert_eq!(responses[1]["result"]["isError"], true);
        assert_eq!(tool_text(&responses[1]), "unsupported scheme: file");
        assert_eq!(tool_text(&responses[2]), "unknown resource: elsewhere");
        assert_eq!(responses[3]["error"]["message"], "uri required");
        assert!(tool_text(&responses[4]).contains("only available for api drivers"));
    }

    #[tokio::test]
    async fn test_metrics_resource_fetches_series() {
        let server = local_server().await;
        let responses = exchange(
            &server,
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"tally://metrics/signup?from=2024-01-02T15:00:00Z&to=2024-01-02T15:00:00Z&granularity=1h"}}"#,
        )
        .await;
        let text = responses[0]["result"]["contents"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["metric_key"], "signup");
        assert_eq!(payload["timeframe"]["granularity"], "1h");
    }
}
