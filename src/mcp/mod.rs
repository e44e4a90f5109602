//! Model Context Protocol server: JSON-RPC 2.0 dispatch shared by the stdio
//! and HTTP transports.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub mod http;
pub mod stdio;

use crate::tools::ToolFacade;

/// Protocol revision answered when the client does not name one
pub const PROTOCOL_VERSION: &str = "2025-06-18";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Tool name of a `tools/call` request
    pub fn tool_name(&self) -> Option<&str> {
        if self.method != "tools/call" {
            return None;
        }
        self.params.as_ref()?.get("name")?.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Transport-independent MCP request handler
#[derive(Clone)]
pub struct McpServer {
    tools: ToolFacade,
    name: &'static str,
}

impl McpServer {
    pub fn new(tools: ToolFacade, name: &'static str) -> Self {
        Self { tools, name }
    }

    pub fn tools(&self) -> &ToolFacade {
        &self.tools
    }

    /// Handle one request. Notifications produce no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!("MCP request: {}", request.method);

        if request.jsonrpc.as_deref().is_some_and(|version| version != "2.0") {
            return request.id.map(|id| {
                JsonRpcResponse::failure(id, INVALID_REQUEST, "Only JSON-RPC 2.0 is supported")
            });
        }

        let Some(id) = request.id.clone() else {
            if request.method != "notifications/initialized" {
                tracing::debug!("Ignoring notification: {}", request.method);
            }
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize(request.params.as_ref())),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                json!({ "tools": ToolFacade::tool_definitions() }),
            ),
            "tools/call" => self.call_tool(id, request.params).await,
            other => {
                JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {}", other))
            }
        };

        Some(response)
    }

    /// Parse and handle one serialized message
    pub async fn handle_message(&self, message: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(message) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                tracing::warn!("Unparseable MCP message: {}", e);
                Some(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let protocol = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);

        json!({
            "protocolVersion": protocol,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": self.name,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let Some(mut params) = params else {
            return JsonRpcResponse::failure(id, INVALID_PARAMS, "Missing params");
        };
        let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
            return JsonRpcResponse::failure(id, INVALID_PARAMS, "Missing tool name");
        };
        let arguments = params
            .get_mut("arguments")
            .map(Value::take)
            .unwrap_or(Value::Null);

        match self.tools.call_tool(&name, arguments).await {
            Ok(output) => {
                let text = serde_json::to_string_pretty(&output.envelope)
                    .unwrap_or_else(|_| output.envelope.to_string());
                JsonRpcResponse::success(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": text }],
                        "isError": output.is_error
                    }),
                )
            }
            Err(e) => JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
        }
    }
}
