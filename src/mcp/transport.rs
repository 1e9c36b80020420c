// JSON-RPC 2.0 over line-delimited stdio

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error};

use crate::constants::limits::MAX_LINE_BYTES;

pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
            id,
        }
    }
}

/// Messages arriving from the downstream client.
#[derive(Debug)]
pub enum DownstreamEvent {
    Request(JsonRpcRequest),
    /// Malformed JSON or framing failure; the parse error goes back with a
    /// null id per JSON-RPC.
    Malformed(String),
    /// EOF on stdin.
    Disconnect,
}

/// Read newline-delimited JSON-RPC requests from stdin into a channel.
/// Bounded line length protects against unframed garbage.
pub fn spawn_stdin_reader(tx: mpsc::Sender<DownstreamEvent>) {
    tokio::spawn(async move {
        let codec = LinesCodec::new_with_max_length(MAX_LINE_BYTES);
        let mut framed = FramedRead::new(tokio::io::stdin(), codec);

        while let Some(result) = framed.next().await {
            match result {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    debug!(bytes = line.len(), "received frame");
                    match serde_json::from_str::<JsonRpcRequest>(&line) {
                        Ok(request) => {
                            if tx.send(DownstreamEvent::Request(request)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "request parse error");
                            if tx
                                .send(DownstreamEvent::Malformed(e.to_string()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "framing error");
                    let _ = tx.send(DownstreamEvent::Malformed(e.to_string())).await;
                    break;
                }
            }
        }
        let _ = tx.send(DownstreamEvent::Disconnect).await;
    });
}

/// Serialize responses onto stdout from a channel. A single writer task
/// keeps concurrent handlers from interleaving partial lines.
pub fn spawn_stdout_writer(mut rx: mpsc::Receiver<JsonRpcResponse>, mut stdout: Stdout) {
    tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let json = match serde_json::to_string(&response) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "response serialization failed");
                    continue;
                }
            };
            debug!(bytes = json.len(), "sending frame");
            if stdout.write_all(json.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let raw = r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"authenticate","arguments":{}},"id":1}"#;
        let request: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.method, "tools/call");
        assert_eq!(request.id, Some(serde_json::json!(1)));
    }

    #[test]
    fn notification_has_no_id() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let request: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(request.id.is_none());
    }

    #[test]
    fn error_response_shape() {
        let response = JsonRpcResponse::failure(
            Value::Null,
            error_codes::PARSE_ERROR,
            "parse error",
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], serde_json::json!(-32700));
        assert!(json.get("result").is_none());
    }
}
