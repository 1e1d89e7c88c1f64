//! Streamable HTTP transport.
//!
//! Every JSON-RPC message is POSTed to the server endpoint. The server replies
//! either with a plain JSON body or with a short SSE stream whose `data:`
//! events carry the response. Once the server assigns an `Mcp-Session-Id`
//! it is echoed on every later request and released with a DELETE on close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::protocol::{
    IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use super::session::{CallIdGenerator, McpSession, PendingResponse, SessionError};

/// Header carrying the server-assigned session id.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Default per-request timeout for long tool calls.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

fn default_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

/// Parameters for connecting to a streamable HTTP MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpConnectionParams {
    /// Endpoint URL (e.g. `http://server:8000/mcp`)
    pub url: String,
    /// Static headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl HttpConnectionParams {
    /// Create params for an endpoint with default timeout and no headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), headers: HashMap::new(), timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS }
    }
}

/// MCP session over streamable HTTP.
pub struct HttpSession {
    client: Client,
    url: String,
    headers: HeaderMap,
    session_id: Arc<RwLock<Option<String>>>,
    disconnected: Arc<AtomicBool>,
    call_ids: CallIdGenerator,
}

impl HttpSession {
    /// Build a session for the endpoint. No traffic is sent until the first request.
    pub fn connect(
        params: &HttpConnectionParams,
        headers: &HashMap<String, String>,
    ) -> Result<Self, SessionError> {
        let client = Client::builder().timeout(Duration::from_secs(params.timeout_secs)).build()?;

        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                SessionError::InitializationFailed(format!("Invalid header name {}: {}", key, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                SessionError::InitializationFailed(format!("Invalid header value for {}: {}", key, e))
            })?;
            header_map.insert(name, value);
        }

        Ok(Self {
            client,
            url: params.url.clone(),
            headers: header_map,
            session_id: Arc::new(RwLock::new(None)),
            disconnected: Arc::new(AtomicBool::new(false)),
            call_ids: CallIdGenerator::new(),
        })
    }

    /// Server-assigned session id, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn exchange(&self) -> Exchange {
        Exchange {
            client: self.client.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            session_id: Arc::clone(&self.session_id),
            disconnected: Arc::clone(&self.disconnected),
        }
    }
}

/// Everything one POST needs, detached from the session so it can run in its own task.
struct Exchange {
    client: Client,
    url: String,
    headers: HeaderMap,
    session_id: Arc<RwLock<Option<String>>>,
    disconnected: Arc<AtomicBool>,
}

impl Exchange {
    async fn post(&self, body: String) -> Result<reqwest::Response, SessionError> {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let session_id = self.session_id.read().clone();
        if let Some(id) = session_id {
            request = request.header(SESSION_ID_HEADER, id);
        }

        let response = request.send().await?;

        if let Some(id) = response.headers().get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) {
            *self.session_id.write() = Some(id.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            // A 404 on an established session means the server dropped it.
            let established = self.session_id.read().is_some();
            if status == StatusCode::NOT_FOUND && established {
                self.disconnected.store(true, Ordering::SeqCst);
            }
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::HttpStatus { status: status.as_u16(), body });
        }

        Ok(response)
    }

    async fn request(&self, id: RequestId, body: String) -> Result<JsonRpcResponse, SessionError> {
        let response = self.post(body).await?;

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        let text = response.text().await?;
        tracing::debug!("MCP {} -> {}", self.url, text.trim());

        if is_sse {
            return parse_sse_response(&text, &id).ok_or(SessionError::NoResponse(id));
        }

        let response: JsonRpcResponse = serde_json::from_str(&text)?;
        if response.id.as_ref() != Some(&id) {
            return Err(SessionError::NoResponse(id));
        }
        Ok(response)
    }
}

/// Find the response for `id` among the events of an SSE body.
pub fn parse_sse_response(body: &str, id: &RequestId) -> Option<JsonRpcResponse> {
    let mut data = String::new();

    // A trailing empty line flushes the last event even if the body lacks one.
    for line in body.lines().chain(std::iter::once("")) {
        if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.strip_prefix(' ').unwrap_or(chunk));
            continue;
        }

        if line.is_empty() && !data.is_empty() {
            if let Ok(IncomingMessage::Response(response)) = IncomingMessage::parse(&data) {
                if response.id.as_ref() == Some(id) {
                    return Some(response);
                }
            }
            data.clear();
        }
    }

    None
}

#[async_trait]
impl McpSession for HttpSession {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<PendingResponse, SessionError> {
        if self.is_disconnected() {
            return Err(SessionError::Closed);
        }

        let body = serde_json::to_string(&request)?;
        tracing::debug!("MCP {} <- {}", self.url, body);

        let id = request.id;
        let (tx, rx) = oneshot::channel();
        let exchange = self.exchange();
        let request_id = id.clone();

        // One task per request so concurrent requests each hold their own HTTP exchange.
        tokio::spawn(async move {
            let result = exchange.request(request_id, body).await;
            let _ = tx.send(result);
        });

        Ok(PendingResponse::new(id, rx))
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), SessionError> {
        let body = serde_json::to_string(&notification)?;
        self.exchange().post(body).await?;
        Ok(())
    }

    fn next_call_id(&self) -> RequestId {
        self.call_ids.next_id()
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let session_id = self.session_id.write().take();
        let Some(id) = session_id else {
            return Ok(());
        };

        // Servers may answer 405 when they do not support explicit termination.
        let result = self
            .client
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(SESSION_ID_HEADER, id)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!("Failed to terminate MCP session at {}: {}", self.url, e);
        }
        Ok(())
    }
}
