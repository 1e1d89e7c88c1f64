//! MCP (Model Context Protocol) client with keep-alive pings.
//!
//! Load balancers and proxies in front of MCP servers commonly drop
//! connections that stay idle for 60 seconds. This module keeps tool
//! sessions alive by sending a JSON-RPC `ping` on each open session at a
//! configurable interval, without changing the API applications use to list
//! and call tools.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               PingEnabledToolset                 │
//! │  • Tool filter and name prefix                  │
//! │  • Per-session headers                          │
//! │  ┌─────────────────────────────────────────┐    │
//! │  │      PingEnabledSessionManager          │    │
//! │  │  • One KeepAlivePinger per session key  │    │
//! │  │  • Stops every pinger before closing    │    │
//! │  └─────────────────────────────────────────┘    │
//! │                      │                           │
//! │              McpSessionManager                   │
//! │           ┌──────────┴──────────┐               │
//! │           ▼                     ▼               │
//! │     StdioSession           HttpSession          │
//! │     (child process)        (streamable HTTP)    │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcp_keepalive::mcp::{ConnectionParams, HttpConnectionParams, PingEnabledToolset, ToolsetConfig};
//!
//! let params = ConnectionParams::Http(HttpConnectionParams::new("http://server:8000/mcp"));
//! let toolset = PingEnabledToolset::new(ToolsetConfig {
//!     ping_interval: 30.0,
//!     ..ToolsetConfig::new(params)
//! })?;
//!
//! // Opening the first session starts its pinger
//! let tools = toolset.get_tools().await?;
//!
//! // Stops all pingers, then closes the sessions
//! toolset.close().await?;
//! ```

mod http;
mod manager;
mod pinger;
mod protocol;
mod session;
mod stdio;
mod toolset;

pub use http::{parse_sse_response, HttpConnectionParams, HttpSession, SESSION_ID_HEADER};
pub use manager::{
    initialize, session_key_for, ConnectionParams, ManagerError, McpSessionManager,
    PingEnabledSessionManager, SessionManager, STDIO_SESSION_KEY,
};
pub use pinger::{KeepAlivePinger, PingStats, PingerError, PingerState};
pub use protocol::{
    CallToolParams, CallToolResult, EmbeddedResource, IncomingMessage, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, MCPCapabilities,
    MCPClientInfo, MCPInitializeParams, MCPInitializeResult, MCPServerCapabilities,
    MCPServerInfo, MCPTool, MCPToolInputSchema, RequestId, ToolContent, METHOD_NOT_FOUND,
    PING_METHOD, PROTOCOL_VERSION,
};
pub use session::{CallIdGenerator, McpSession, PendingResponse, ResponseResult, SessionError};
pub use stdio::{StdioConnectionParams, StdioSession};
pub use toolset::{HeaderProvider, PingEnabledToolset, ToolsetConfig, ToolsetError};
