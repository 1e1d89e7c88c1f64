//! MCP session abstraction.
//!
//! A session is one live connection to an MCP server. The keep-alive layer
//! only needs two capabilities from it: hand a request to the transport, and
//! later await the matching response. Splitting those two steps lets the ping
//! loop keep its schedule while an acknowledgment is still outstanding.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};

/// Error type for MCP session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("JSON-RPC error: {0}")]
    Rpc(#[from] JsonRpcError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Session closed")]
    Closed,

    #[error("Request id already in flight: {0}")]
    DuplicateRequestId(RequestId),

    #[error("No response received for request {0}")]
    NoResponse(RequestId),

    #[error("Server initialization failed: {0}")]
    InitializationFailed(String),
}

/// Outcome delivered to whoever awaits a response.
pub type ResponseResult = Result<JsonRpcResponse, SessionError>;

/// A request that has been handed to the transport and awaits its response.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<ResponseResult>,
}

impl PendingResponse {
    /// Wrap the receiving half of a response slot.
    pub fn new(id: RequestId, rx: oneshot::Receiver<ResponseResult>) -> Self {
        Self { id, rx }
    }

    /// A pending response that is already resolved.
    pub fn ready(id: RequestId, result: ResponseResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { id, rx }
    }

    /// Request id this response belongs to.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the response. A dropped slot means the session went away.
    pub async fn wait(self) -> ResponseResult {
        self.rx.await.unwrap_or_else(|_| Err(SessionError::Closed))
    }
}

/// One live connection to an MCP server.
///
/// Implementations must tolerate concurrent callers: the keep-alive loop and
/// the application issue requests on the same session and the transport
/// multiplexes them by request id.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Hand a request to the transport.
    ///
    /// Completes once the request has been accepted for sending. The
    /// returned [`PendingResponse`] resolves when the matching reply arrives.
    async fn send_request(&self, request: JsonRpcRequest) -> Result<PendingResponse, SessionError>;

    /// Send a notification (no response expected).
    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), SessionError>;

    /// Allocate an id for an application request.
    fn next_call_id(&self) -> RequestId;

    /// Whether the underlying connection is known to be gone.
    fn is_disconnected(&self) -> bool;

    /// Close the connection. Outstanding waiters resolve with [`SessionError::Closed`].
    async fn close(&self) -> Result<(), SessionError>;

    /// Send a request and wait for a successful response.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, SessionError> {
        let request = JsonRpcRequest::new(self.next_call_id(), method, params);
        let mut response = self.send_request(request).await?.wait().await?;

        if let Some(error) = response.error.take() {
            return Err(SessionError::Rpc(error));
        }
        Ok(response)
    }
}

/// Id allocator for application requests.
///
/// Application requests carry string ids (`call-1`, `call-2`, ...) so they can
/// never collide with the integer ids used by the keep-alive pinger on the
/// same session.
#[derive(Debug)]
pub struct CallIdGenerator {
    next: AtomicU64,
}

impl CallIdGenerator {
    /// Create a generator starting at `call-1`.
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Next application request id.
    pub fn next_id(&self) -> RequestId {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        RequestId::String(format!("call-{}", n))
    }
}

impl Default for CallIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_ids_are_strings_and_increase() {
        let ids = CallIdGenerator::new();
        assert_eq!(ids.next_id(), RequestId::String("call-1".to_string()));
        assert_eq!(ids.next_id(), RequestId::String("call-2".to_string()));
    }

    #[tokio::test]
    async fn test_ready_pending_response() {
        let response = JsonRpcResponse::success(RequestId::Number(1), serde_json::json!({}));
        let pending = PendingResponse::ready(RequestId::Number(1), Ok(response));
        assert_eq!(pending.id(), &RequestId::Number(1));
        assert!(pending.wait().await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_dropped_slot_resolves_closed() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingResponse::new(RequestId::Number(2), rx);
        drop(tx);
        assert!(matches!(pending.wait().await, Err(SessionError::Closed)));
    }
}
