//! Ping-enabled MCP toolset.
//!
//! The entry point applications use: it accepts the usual toolset settings
//! (connection, tool filter, tool name prefix, per-session headers) plus the
//! keep-alive interval, and routes every session through a
//! [`PingEnabledSessionManager`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::manager::{
    ConnectionParams, ManagerError, McpSessionManager, PingEnabledSessionManager, SessionManager,
};
use super::protocol::{CallToolParams, CallToolResult, ListToolsResult, MCPTool, METHOD_NOT_FOUND};
use super::session::{McpSession, SessionError};
use crate::core::{ConfigError, PingInterval, DEFAULT_PING_INTERVAL_SECONDS};

/// Error type for toolset operations.
#[derive(Debug, thiserror::Error)]
pub enum ToolsetError {
    #[error("Manager error: {0}")]
    Manager(#[from] ManagerError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool not selected by filter: {0}")]
    ToolFiltered(String),
}

/// Supplies headers for each session request (e.g. per-user credentials).
pub type HeaderProvider = Arc<dyn Fn() -> HashMap<String, String> + Send + Sync>;

/// Toolset settings.
#[derive(Debug, Clone)]
pub struct ToolsetConfig {
    /// How to reach the server
    pub connection_params: ConnectionParams,
    /// Seconds between keep-alive pings
    pub ping_interval: f64,
    /// Only expose these tools (all tools when unset)
    pub tool_filter: Option<Vec<String>>,
    /// Prefix prepended to exposed tool names as `<prefix>_<name>`
    pub tool_name_prefix: Option<String>,
}

impl ToolsetConfig {
    /// Settings with the default interval and no filter or prefix.
    pub fn new(connection_params: ConnectionParams) -> Self {
        Self {
            connection_params,
            ping_interval: DEFAULT_PING_INTERVAL_SECONDS,
            tool_filter: None,
            tool_name_prefix: None,
        }
    }
}

/// MCP toolset with automatic keep-alive pings.
pub struct PingEnabledToolset<M = McpSessionManager> {
    manager: PingEnabledSessionManager<M>,
    tool_filter: Option<Vec<String>>,
    tool_name_prefix: Option<String>,
    header_provider: Option<HeaderProvider>,
}

impl PingEnabledToolset<McpSessionManager> {
    /// Build a toolset from settings. An invalid interval fails here, before any connection.
    pub fn new(config: ToolsetConfig) -> Result<Self, ToolsetError> {
        let interval = PingInterval::from_secs_f64(config.ping_interval)?;
        let inner = McpSessionManager::new(config.connection_params);

        let mut toolset = Self::with_manager(inner, interval);
        toolset.tool_filter = config.tool_filter;
        toolset.tool_name_prefix = config.tool_name_prefix;
        Ok(toolset)
    }
}

impl<M: SessionManager> PingEnabledToolset<M> {
    /// Build a toolset around an existing session manager.
    pub fn with_manager(inner: M, ping_interval: PingInterval) -> Self {
        Self {
            manager: PingEnabledSessionManager::new(inner, ping_interval),
            tool_filter: None,
            tool_name_prefix: None,
            header_provider: None,
        }
    }

    /// Only expose the named tools.
    pub fn with_tool_filter(mut self, filter: Vec<String>) -> Self {
        self.tool_filter = Some(filter);
        self
    }

    /// Prefix exposed tool names.
    pub fn with_tool_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_name_prefix = Some(prefix.into());
        self
    }

    /// Supply headers for every session request.
    pub fn with_header_provider(mut self, provider: HeaderProvider) -> Self {
        self.header_provider = Some(provider);
        self
    }

    /// The ping-enabled session manager.
    pub fn session_manager(&self) -> &PingEnabledSessionManager<M> {
        &self.manager
    }

    /// Whether a server-side tool name passes the filter.
    pub fn is_tool_selected(&self, name: &str) -> bool {
        self.tool_filter.as_ref().map(|filter| filter.iter().any(|t| t == name)).unwrap_or(true)
    }

    /// Name under which a server-side tool is exposed.
    pub fn exposed_name(&self, name: &str) -> String {
        match self.tool_name_prefix {
            Some(ref prefix) => format!("{}_{}", prefix, name),
            None => name.to_string(),
        }
    }

    /// Server-side name for an exposed tool name.
    fn server_name<'a>(&self, exposed: &'a str) -> &'a str {
        self.tool_name_prefix
            .as_ref()
            .and_then(|prefix| exposed.strip_prefix(prefix.as_str()))
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(exposed)
    }

    async fn session(&self) -> Result<Arc<dyn McpSession>, ToolsetError> {
        let headers = self.header_provider.as_ref().map(|provider| provider());
        Ok(self.manager.create_session(headers.as_ref()).await?)
    }

    /// List the selected tools, renamed with the prefix.
    pub async fn get_tools(&self) -> Result<Vec<MCPTool>, ToolsetError> {
        let session = self.session().await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let page: ListToolsResult =
                session.request("tools/list", params).await?.into_result().map_err(SessionError::from)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools
            .into_iter()
            .filter(|tool| self.is_tool_selected(&tool.name))
            .map(|mut tool| {
                tool.name = self.exposed_name(&tool.name);
                tool
            })
            .collect())
    }

    /// Call a tool by its exposed name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<HashMap<String, Value>>,
    ) -> Result<CallToolResult, ToolsetError> {
        let server_name = self.server_name(name);
        if !self.is_tool_selected(server_name) {
            return Err(ToolsetError::ToolFiltered(name.to_string()));
        }

        let session = self.session().await?;
        let params = CallToolParams { name: server_name.to_string(), arguments };
        let params = serde_json::to_value(&params).map_err(SessionError::from)?;

        tracing::debug!("Calling tool {}", server_name);
        let response = session
            .request("tools/call", Some(params))
            .await
            .map_err(|e| match e {
                SessionError::Rpc(ref rpc) if rpc.code == METHOD_NOT_FOUND => {
                    ToolsetError::ToolNotFound(name.to_string())
                }
                other => ToolsetError::Session(other),
            })?;

        Ok(response.into_result().map_err(SessionError::from)?)
    }

    /// Stop every pinger and close every session.
    pub async fn close(&self) -> Result<(), ToolsetError> {
        self.manager.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::HttpConnectionParams;

    fn toolset() -> PingEnabledToolset {
        let params = ConnectionParams::Http(HttpConnectionParams::new("http://localhost:8000/mcp"));
        PingEnabledToolset::new(ToolsetConfig::new(params)).unwrap()
    }

    #[test]
    fn test_default_interval_wired() {
        let toolset = toolset();
        assert_eq!(
            toolset.session_manager().ping_interval().as_secs_f64(),
            DEFAULT_PING_INTERVAL_SECONDS
        );
    }

    #[test]
    fn test_custom_interval_wired() {
        let params = ConnectionParams::Http(HttpConnectionParams::new("http://localhost:8000/mcp"));
        let config = ToolsetConfig { ping_interval: 30.0, ..ToolsetConfig::new(params) };
        let toolset = PingEnabledToolset::new(config).unwrap();
        assert_eq!(toolset.session_manager().ping_interval().as_secs_f64(), 30.0);
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let params = ConnectionParams::Http(HttpConnectionParams::new("http://localhost:8000/mcp"));
        let config = ToolsetConfig { ping_interval: -1.0, ..ToolsetConfig::new(params) };
        assert!(matches!(
            PingEnabledToolset::new(config),
            Err(ToolsetError::Config(ConfigError::InvalidPingInterval(_)))
        ));
    }

    #[test]
    fn test_prefix_round_trip() {
        let toolset = toolset().with_tool_name_prefix("github");
        assert_eq!(toolset.exposed_name("create_issue"), "github_create_issue");
        assert_eq!(toolset.server_name("github_create_issue"), "create_issue");
        assert_eq!(toolset.server_name("create_issue"), "create_issue");
    }

    #[test]
    fn test_filter() {
        let filtered = toolset().with_tool_filter(vec!["search".to_string()]);
        assert!(filtered.is_tool_selected("search"));
        assert!(!filtered.is_tool_selected("delete"));
        assert!(toolset().is_tool_selected("anything"));
    }

    #[tokio::test]
    async fn test_filtered_call_rejected_without_connecting() {
        let toolset = toolset().with_tool_filter(vec!["search".to_string()]);
        let err = toolset.call_tool("delete", None).await.unwrap_err();
        assert!(matches!(err, ToolsetError::ToolFiltered(ref name) if name == "delete"));
        assert_eq!(toolset.session_manager().active_pingers().await, 0);
    }
}
