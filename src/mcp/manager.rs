//! MCP session managers.
//!
//! [`McpSessionManager`] creates and caches sessions for one server.
//! [`PingEnabledSessionManager`] wraps any [`SessionManager`] and binds a
//! [`KeepAlivePinger`] to every session it hands out, stopping all of them
//! before the wrapped manager closes its sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::http::{HttpConnectionParams, HttpSession};
use super::pinger::{KeepAlivePinger, PingerError};
use super::protocol::{JsonRpcNotification, MCPInitializeParams, MCPInitializeResult};
use super::session::{McpSession, SessionError};
use super::stdio::{StdioConnectionParams, StdioSession};
use crate::core::{ConfigError, PingInterval};

/// Session key used for stdio servers (one process per manager).
pub const STDIO_SESSION_KEY: &str = "stdio_session";

/// Length of the session key prefix shown in logs.
const LOG_KEY_LEN: usize = 8;

/// How to reach an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ConnectionParams {
    /// Child process speaking JSON-RPC over stdio
    Stdio(StdioConnectionParams),
    /// Streamable HTTP endpoint
    Http(HttpConnectionParams),
}

impl ConnectionParams {
    /// Short human-readable description of the target.
    pub fn describe(&self) -> String {
        match self {
            Self::Stdio(params) => format!("stdio:{}", params.command),
            Self::Http(params) => params.url.clone(),
        }
    }
}

/// Error type for session manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Keep-alive error: {0}")]
    Pinger(#[from] PingerError),
}

/// Creates, caches and closes MCP sessions.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Return a live session for `headers`, creating one if needed.
    async fn create_session(
        &self,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<Arc<dyn McpSession>, ManagerError>;

    /// Key identifying the session that `create_session(headers)` returns.
    fn session_key(&self, headers: Option<&HashMap<String, String>>) -> String;

    /// Close every session.
    async fn close(&self) -> Result<(), ManagerError>;
}

/// Session manager for a single MCP server.
pub struct McpSessionManager {
    params: ConnectionParams,
    /// Live sessions by key
    sessions: Mutex<HashMap<String, Arc<dyn McpSession>>>,
}

impl McpSessionManager {
    /// Create a manager for the given server.
    pub fn new(params: ConnectionParams) -> Self {
        Self { params, sessions: Mutex::new(HashMap::new()) }
    }

    /// Connection parameters.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Number of cached sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Static headers from the params overlaid with per-call headers.
    fn merge_headers(&self, headers: Option<&HashMap<String, String>>) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        if let ConnectionParams::Http(params) = &self.params {
            merged.extend(params.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(headers) = headers {
            merged.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    async fn connect(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn McpSession>, SessionError> {
        let session: Arc<dyn McpSession> = match &self.params {
            ConnectionParams::Stdio(params) => Arc::new(StdioSession::spawn(params)?),
            ConnectionParams::Http(params) => {
                let headers: HashMap<String, String> =
                    headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                Arc::new(HttpSession::connect(params, &headers)?)
            }
        };

        if let Err(e) = initialize(session.as_ref()).await {
            let _ = session.close().await;
            return Err(e);
        }
        Ok(session)
    }
}

/// Run the MCP handshake on a fresh session.
pub async fn initialize(session: &dyn McpSession) -> Result<MCPInitializeResult, SessionError> {
    let params = MCPInitializeParams::default();
    let response = session.request("initialize", Some(serde_json::to_value(&params)?)).await?;
    let result: MCPInitializeResult = response.into_result()?;

    session.notify(JsonRpcNotification::initialized()).await?;

    tracing::info!(
        "Connected to MCP server {} {} (protocol {})",
        result.server_info.name,
        result.server_info.version.as_deref().unwrap_or(""),
        result.protocol_version
    );
    Ok(result)
}

#[async_trait]
impl SessionManager for McpSessionManager {
    async fn create_session(
        &self,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<Arc<dyn McpSession>, ManagerError> {
        let merged = self.merge_headers(headers);
        let key = session_key_for(&self.params, &merged);

        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            if !session.is_disconnected() {
                return Ok(Arc::clone(session));
            }
            tracing::debug!("Session {} disconnected, reconnecting", short_key(&key));
            if let Some(stale) = sessions.remove(&key) {
                let _ = stale.close().await;
            }
        }

        let session = self.connect(&merged).await?;
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    fn session_key(&self, headers: Option<&HashMap<String, String>>) -> String {
        session_key_for(&self.params, &self.merge_headers(headers))
    }

    async fn close(&self) -> Result<(), ManagerError> {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (key, session) in sessions {
            if let Err(e) = session.close().await {
                tracing::warn!("Error closing session {}: {}", short_key(&key), e);
            }
        }
        Ok(())
    }
}

/// Derive the session key for a target and its merged headers.
///
/// Stdio servers have exactly one session. HTTP sessions are keyed by a
/// SHA-256 of the headers so different credentials get different sessions.
pub fn session_key_for(params: &ConnectionParams, headers: &BTreeMap<String, String>) -> String {
    match params {
        ConnectionParams::Stdio(_) => STDIO_SESSION_KEY.to_string(),
        ConnectionParams::Http(_) => {
            let mut hasher = Sha256::new();
            for (key, value) in headers {
                hasher.update(key.as_bytes());
                hasher.update([0]);
                hasher.update(value.as_bytes());
                hasher.update([0]);
            }
            hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
        }
    }
}

fn short_key(key: &str) -> &str {
    key.get(..LOG_KEY_LEN).unwrap_or(key)
}

/// Session manager that keeps every session alive with periodic pings.
///
/// Drop-in replacement for the manager it wraps: it implements
/// [`SessionManager`] by delegating, and adds one [`KeepAlivePinger`] per
/// session key.
pub struct PingEnabledSessionManager<M> {
    inner: M,
    ping_interval: PingInterval,
    /// Pingers by session key
    pingers: Mutex<HashMap<String, BoundPinger>>,
}

/// A pinger together with the session it pings.
struct BoundPinger {
    session: Arc<dyn McpSession>,
    pinger: KeepAlivePinger,
}

impl BoundPinger {
    /// Still pinging this exact session.
    fn serves(&self, session: &Arc<dyn McpSession>) -> bool {
        Arc::ptr_eq(&self.session, session) && self.pinger.is_active()
    }
}

impl<M: SessionManager> PingEnabledSessionManager<M> {
    /// Wrap `inner`, pinging every session at `ping_interval`.
    pub fn new(inner: M, ping_interval: PingInterval) -> Self {
        Self { inner, ping_interval, pingers: Mutex::new(HashMap::new()) }
    }

    /// Wrap `inner` with an interval given in seconds. Fails before any session exists.
    pub fn with_interval_secs(inner: M, ping_interval: f64) -> Result<Self, ConfigError> {
        Ok(Self::new(inner, PingInterval::from_secs_f64(ping_interval)?))
    }

    /// The wrapped manager.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    /// Configured interval.
    pub fn ping_interval(&self) -> PingInterval {
        self.ping_interval
    }

    /// Number of pingers whose loop is still running.
    pub async fn active_pingers(&self) -> usize {
        self.pingers.lock().await.values().filter(|b| b.pinger.is_active()).count()
    }

    /// Pings sent so far on the session for `key`.
    pub async fn pings_sent(&self, key: &str) -> Option<u64> {
        self.pingers.lock().await.get(key).map(|b| b.pinger.pings_sent())
    }
}

#[async_trait]
impl<M: SessionManager> SessionManager for PingEnabledSessionManager<M> {
    async fn create_session(
        &self,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<Arc<dyn McpSession>, ManagerError> {
        let session = self.inner.create_session(headers).await?;
        let key = self.inner.session_key(headers);

        let mut pingers = self.pingers.lock().await;
        if pingers.get(&key).is_some_and(|bound| bound.serves(&session)) {
            return Ok(session);
        }

        // The inner manager reconnected, or the old loop ended on disconnect.
        if let Some(mut stale) = pingers.remove(&key) {
            stale.pinger.stop().await;
        }

        let mut pinger = KeepAlivePinger::new(short_key(&key));
        pinger.start(Arc::clone(&session), self.ping_interval)?;
        pingers.insert(key, BoundPinger { session: Arc::clone(&session), pinger });

        Ok(session)
    }

    fn session_key(&self, headers: Option<&HashMap<String, String>>) -> String {
        self.inner.session_key(headers)
    }

    async fn close(&self) -> Result<(), ManagerError> {
        {
            let mut pingers = self.pingers.lock().await;
            let stops = pingers.values_mut().map(|bound| bound.pinger.stop());
            let stopped = futures::future::join_all(stops).await;
            tracing::debug!("Stopped {} ping tasks", stopped.iter().flatten().count());
            pingers.clear();
        }

        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(url: &str) -> ConnectionParams {
        ConnectionParams::Http(HttpConnectionParams::new(url))
    }

    #[test]
    fn test_stdio_key_is_fixed() {
        let params = ConnectionParams::Stdio(StdioConnectionParams::new("server"));
        assert_eq!(session_key_for(&params, &BTreeMap::new()), STDIO_SESSION_KEY);
    }

    #[test]
    fn test_http_key_depends_on_headers() {
        let params = http("http://localhost/mcp");
        let anonymous = session_key_for(&params, &BTreeMap::new());
        let alice = session_key_for(
            &params,
            &BTreeMap::from([("Authorization".to_string(), "alice".to_string())]),
        );
        let alice_again = session_key_for(
            &params,
            &BTreeMap::from([("Authorization".to_string(), "alice".to_string())]),
        );

        assert_eq!(anonymous.len(), 64);
        assert_ne!(anonymous, alice);
        assert_eq!(alice, alice_again);
    }

    #[test]
    fn test_call_headers_override_static_headers() {
        let mut params = HttpConnectionParams::new("http://localhost/mcp");
        params.headers.insert("X-Team".to_string(), "static".to_string());
        let manager = McpSessionManager::new(ConnectionParams::Http(params));

        let overrides = HashMap::from([("X-Team".to_string(), "call".to_string())]);
        let merged = manager.merge_headers(Some(&overrides));
        assert_eq!(merged.get("X-Team").map(String::as_str), Some("call"));
        assert_ne!(manager.session_key(None), manager.session_key(Some(&overrides)));
    }

    #[test]
    fn test_short_key() {
        assert_eq!(short_key("abcdef0123456789"), "abcdef01");
        assert_eq!(short_key("abc"), "abc");
    }

    #[test]
    fn test_invalid_interval_rejected_up_front() {
        let manager = McpSessionManager::new(http("http://localhost/mcp"));
        assert!(matches!(
            PingEnabledSessionManager::with_interval_secs(manager, -1.0),
            Err(ConfigError::InvalidPingInterval(_))
        ));
    }

    #[test]
    fn test_describe() {
        assert_eq!(http("http://server:8000/mcp").describe(), "http://server:8000/mcp");
        let stdio = ConnectionParams::Stdio(StdioConnectionParams::new("npx"));
        assert_eq!(stdio.describe(), "stdio:npx");
    }
}
