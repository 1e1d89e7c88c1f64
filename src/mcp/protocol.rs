//! MCP Protocol types.
//!
//! JSON-RPC 2.0 envelopes plus the handful of MCP payloads a keep-alive
//! session needs: the `initialize` handshake, `tools/list`, `tools/call`
//! and `ping`. Based on the MCP specification: https://modelcontextprotocol.io/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// MCP protocol revision sent during the handshake.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Method name of the liveness request.
pub const PING_METHOD: &str = "ping";

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i32 = -32601;

/// JSON-RPC "internal error" code.
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Parameters (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), id: id.into(), method: method.into(), params }
    }

    /// Liveness request. Carries no parameters so the `params` key is omitted on the wire.
    pub fn ping(id: i64) -> Self {
        Self::new(id, PING_METHOD, None)
    }

    /// Whether this request is a liveness request.
    pub fn is_ping(&self) -> bool {
        self.method == PING_METHOD
    }
}

/// JSON-RPC request ID (can be string or number).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// String ID
    String(String),
    /// Numeric ID
    Number(i64),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Request ID (absent only on malformed error replies)
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Result (if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id: Some(id), result: Some(result), error: None }
    }

    /// Error response.
    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self { jsonrpc: "2.0".to_string(), id: Some(id), result: None, error: Some(error) }
    }

    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Get the result value.
    pub fn into_result<T: for<'de> Deserialize<'de>>(self) -> Result<T, JsonRpcError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let result = self.result.ok_or_else(|| JsonRpcError {
            code: INTERNAL_ERROR,
            message: "No result in response".to_string(),
            data: None,
        })?;

        serde_json::from_value(result).map_err(|e| JsonRpcError {
            code: INTERNAL_ERROR,
            message: format!("Failed to parse result: {}", e),
            data: None,
        })
    }
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Error returned for server-initiated requests this client does not handle.
    pub fn method_not_found(method: &str) -> Self {
        Self { code: METHOD_NOT_FOUND, message: format!("Method not found: {}", method), data: None }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

/// JSON-RPC 2.0 notification (no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), method: method.into(), params }
    }

    /// The `notifications/initialized` message that completes the handshake.
    pub fn initialized() -> Self {
        Self::new("notifications/initialized", None)
    }
}

/// Any message a server may put on the wire.
///
/// Servers may send their own requests (including `ping`) and
/// notifications on the same stream as responses, so incoming lines are
/// classified before being routed to a waiter.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Reply to one of our requests.
    Response(JsonRpcResponse),
    /// Request initiated by the server.
    Request(JsonRpcRequest),
    /// Notification from the server.
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Classify a raw JSON-RPC message.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some_and(|id| !id.is_null());

        match (has_method, has_id) {
            (true, true) => Ok(Self::Request(serde_json::from_value(value)?)),
            (true, false) => Ok(Self::Notification(serde_json::from_value(value)?)),
            _ => Ok(Self::Response(serde_json::from_value(value)?)),
        }
    }
}

// ============================================================================
// MCP-specific message types
// ============================================================================

/// MCP initialize request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MCPInitializeParams {
    /// Protocol version
    pub protocol_version: String,
    /// Client capabilities
    pub capabilities: MCPCapabilities,
    /// Client info
    pub client_info: MCPClientInfo,
}

impl Default for MCPInitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: MCPCapabilities::default(),
            client_info: MCPClientInfo {
                name: crate::APP_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// MCP client info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

/// MCP client capabilities. A tool-calling client advertises none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MCPCapabilities {
    /// Root list capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,
    /// Sampling capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

/// MCP initialize response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MCPInitializeResult {
    /// Protocol version
    pub protocol_version: String,
    /// Server capabilities
    #[serde(default)]
    pub capabilities: MCPServerCapabilities,
    /// Server info
    pub server_info: MCPServerInfo,
}

/// MCP server info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// MCP server capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MCPServerCapabilities {
    /// Tool capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Resource capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Prompt capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
}

/// MCP tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MCPTool {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input schema (JSON Schema)
    pub input_schema: MCPToolInputSchema,
}

/// MCP tool input schema (JSON Schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPToolInputSchema {
    /// Schema type (usually "object")
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Properties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, Value>>,
    /// Required properties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

/// Result from listing tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Available tools
    pub tools: Vec<MCPTool>,
    /// Pagination cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for calling a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, Value>>,
}

/// Result from calling a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content returned by the tool
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// Concatenated text of all text-bearing content items.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(ToolContent::as_text).collect::<Vec<_>>().join("\n")
    }
}

/// Content from a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Text content
    Text {
        /// The text content
        text: String,
    },
    /// Image content
    Image {
        /// Base64-encoded image data
        data: String,
        /// MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Audio content
    Audio {
        /// Base64-encoded audio data
        data: String,
        /// MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Resource embedded in the result
    Resource {
        /// The embedded resource
        resource: EmbeddedResource,
    },
    /// Link to a resource the client may read separately
    ResourceLink {
        /// Resource URI
        uri: String,
        /// Resource name
        #[serde(default)]
        name: String,
        /// Resource description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        /// Resource MIME type
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Content type this client does not know
    #[serde(other)]
    Unknown,
}

/// Resource contents embedded in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    /// Resource URI
    pub uri: String,
    /// Resource MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64-encoded binary contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ToolContent {
    /// Get text content if this item carries any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolContent::Text { text } => Some(text),
            ToolContent::Resource { resource } => resource.text.as_deref(),
            ToolContent::Image { .. }
            | ToolContent::Audio { .. }
            | ToolContent::ResourceLink { .. }
            | ToolContent::Unknown => None,
        }
    }
}
