//! MCP protocol message definitions
//!
//! JSON-RPC 2.0 envelope types and the fixed MCP structures this server
//! exchanges over its SSE transport, per MCP 2024-11-05.

use serde::{Deserialize, Serialize};

/// MCP protocol version echoed when a client does not request one
pub const MCP_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request message
///
/// A missing `id` marks the request as a notification: it is processed but
/// never answered. An explicit JSON `null` id is not a notification; it
/// deserializes to `Some(Value::Null)` and the response echoes the null id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

// Present-but-null ids must stay distinguishable from an absent field, so a
// null value becomes Some(Value::Null) while the field default stays None.
fn deserialize_id<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    /// Create a successful response echoing the request id
    pub fn success(
        jsonrpc: String,
        id: serde_json::Value,
        result: serde_json::Value,
    ) -> Self {
        Self {
            jsonrpc,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response echoing the request id
    pub fn error(jsonrpc: String, id: serde_json::Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc,
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

/// MCP method names handled by the dispatcher
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
    pub const RUN_TOOL: &str = "tools/run";
}

/// Standard JSON-RPC error codes
pub mod error_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request - The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found - The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params - Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error - Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Server information included in initialize responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "mcp-server".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// Server capabilities advertised during initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub experimental: serde_json::Value,
    pub prompts: PromptsCapability,
    pub resources: ResourcesCapability,
    pub tools: ToolsCapability,
}

/// Prompts capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Resources capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesCapability {
    pub subscribe: bool,
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Tools capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            experimental: serde_json::json!({}),
            prompts: PromptsCapability {
                list_changed: false,
            },
            resources: ResourcesCapability {
                subscribe: false,
                list_changed: false,
            },
            tools: ToolsCapability {
                list_changed: false,
            },
        }
    }
}

/// MCP initialization result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_id_is_notification_shaped() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(request.id.is_none());
        assert_eq!(request.method, methods::INITIALIZED);
    }

    #[test]
    fn null_id_is_distinct_from_absent_id() {
        let with_null: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":null,"method":"initialize"}"#).unwrap();
        assert_eq!(with_null.id, Some(serde_json::Value::Null));

        let absent: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialize"}"#).unwrap();
        assert!(absent.id.is_none());
    }

    #[test]
    fn request_defaults_tolerate_missing_fields() {
        // Missing method/jsonrpc fields fall back to "" / "2.0"
        let request: JsonRpcRequest = serde_json::from_str(r#"{"id":7}"#).unwrap();
        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.method, "");
        assert_eq!(request.id, Some(json!(7)));
    }

    #[test]
    fn success_response_omits_error_field() {
        let response =
            JsonRpcResponse::success("2.0".to_string(), json!(1), json!({"ok": true}));
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(
            encoded,
            json!({"jsonrpc":"2.0","id":1,"result":{"ok":true}})
        );
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let response = JsonRpcResponse::error(
            "2.0".to_string(),
            json!("abc"),
            error_codes::METHOD_NOT_FOUND,
            "Method not found: nope".to_string(),
        );
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(
            encoded,
            json!({
                "jsonrpc":"2.0",
                "id":"abc",
                "error":{"code":-32601,"message":"Method not found: nope"}
            })
        );
    }

    #[test]
    fn default_capabilities_match_wire_shape() {
        let encoded = serde_json::to_value(ServerCapabilities::default()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "experimental": {},
                "prompts": {"listChanged": false},
                "resources": {"subscribe": false, "listChanged": false},
                "tools": {"listChanged": false}
            })
        );
    }
}
