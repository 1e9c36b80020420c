// MCP server loop - reader task, per-request handlers, single writer

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::Core;
use crate::mcp::registry::{self, tool_specs};
use crate::mcp::transport::{
    error_codes, spawn_stdin_reader, spawn_stdout_writer, DownstreamEvent, JsonRpcRequest,
    JsonRpcResponse,
};

const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    core: Arc<Core>,
}

impl McpServer {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    /// Serve until stdin closes. Tool calls run as independent tasks, so
    /// slow upstream operations never block the read loop; the writer
    /// channel serializes their responses.
    pub async fn run(&self) -> anyhow::Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<DownstreamEvent>(64);
        let (response_tx, response_rx) = mpsc::channel::<JsonRpcResponse>(64);

        spawn_stdin_reader(event_tx);
        spawn_stdout_writer(response_rx, tokio::io::stdout());

        info!("server ready on stdio");

        while let Some(event) = event_rx.recv().await {
            match event {
                DownstreamEvent::Request(request) => {
                    self.handle_request(request, response_tx.clone());
                }
                DownstreamEvent::Malformed(message) => {
                    warn!(error = %message, "malformed request");
                    let _ = response_tx
                        .send(JsonRpcResponse::failure(
                            Value::Null,
                            error_codes::PARSE_ERROR,
                            "parse error",
                        ))
                        .await;
                }
                DownstreamEvent::Disconnect => {
                    info!("client disconnected");
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_request(&self, request: JsonRpcRequest, out: mpsc::Sender<JsonRpcResponse>) {
        // notifications expect no response
        let Some(id) = request.id.clone() else {
            return;
        };

        match request.method.as_str() {
            "initialize" => {
                let result = json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": "spapi-bridge",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                });
                let _ = out.try_send(JsonRpcResponse::success(id, result));
            }
            "ping" => {
                let _ = out.try_send(JsonRpcResponse::success(id, json!({})));
            }
            "tools/list" => {
                let tools: Vec<Value> = tool_specs()
                    .iter()
                    .map(|spec| {
                        json!({
                            "name": spec.name,
                            "description": spec.description,
                            "inputSchema": spec.input_schema,
                        })
                    })
                    .collect();
                let _ = out.try_send(JsonRpcResponse::success(id, json!({"tools": tools})));
            }
            "tools/call" => {
                let params = request.params.unwrap_or(Value::Null);
                let name = params
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                if name.is_empty() {
                    let _ = out.try_send(JsonRpcResponse::failure(
                        id,
                        error_codes::INVALID_PARAMS,
                        "tools/call requires a tool name",
                    ));
                    return;
                }
                let args = params.get("arguments").cloned().unwrap_or(json!({}));

                let core = self.core.clone();
                tokio::spawn(async move {
                    let envelope = registry::dispatch_tool(&core, &name, args).await;
                    let is_error = !envelope.is_ok();
                    let text = serde_json::to_string(&envelope.to_value())
                        .unwrap_or_else(|_| "{\"success\":false}".to_string());
                    let result = json!({
                        "content": [{"type": "text", "text": text}],
                        "isError": is_error,
                    });
                    let _ = out.send(JsonRpcResponse::success(id, result)).await;
                });
            }
            other => {
                warn!(method = other, "unknown method");
                let _ = out.try_send(JsonRpcResponse::failure(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    &format!("unknown method '{}'", other),
                ));
            }
        }
    }
}
