//! Stdio transport.
//!
//! Spawns the MCP server as a child process and exchanges newline-delimited
//! JSON-RPC messages over its stdin/stdout. A writer task serializes outgoing
//! lines and a reader task routes each response to the waiter registered for
//! its id, so any number of requests (tool calls and pings alike) can be in
//! flight at once.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use super::protocol::{
    IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use super::session::{CallIdGenerator, McpSession, PendingResponse, ResponseResult, SessionError};

/// Outgoing message queue depth.
const WRITE_QUEUE_DEPTH: usize = 32;

/// Parameters for launching a stdio MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StdioConnectionParams {
    /// Command to run
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl StdioConnectionParams {
    /// Create params for a command with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), args: Vec::new(), env: HashMap::new(), cwd: None }
    }

    /// Add command arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseResult>>>>;

/// MCP session over a child process's stdio.
pub struct StdioSession {
    /// Display name used in logs
    name: String,
    /// Server process
    child: tokio::sync::Mutex<Option<Child>>,
    /// Outgoing line queue feeding the writer task
    writer_tx: mpsc::Sender<String>,
    /// Waiters by request id
    pending: PendingMap,
    /// Set once stdout hits EOF, a write fails, or the session is closed
    disconnected: Arc<AtomicBool>,
    call_ids: CallIdGenerator,
}

impl StdioSession {
    /// Spawn the server process and start the I/O tasks.
    ///
    /// Must be called from within a tokio runtime. The MCP handshake is not
    /// performed here; the session manager runs it once the transport is up.
    pub fn spawn(params: &StdioConnectionParams) -> Result<Self, SessionError> {
        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args);

        for (key, value) in &params.env {
            // Expand environment variables in the value
            let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
            cmd.env(key, expanded.as_ref());
        }

        if let Some(ref cwd) = params.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            SessionError::InitializationFailed("Failed to capture stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SessionError::InitializationFailed("Failed to capture stdout".to_string())
        })?;

        let name = params.command.clone();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let disconnected = Arc::new(AtomicBool::new(false));
        let (writer_tx, writer_rx) = mpsc::channel::<String>(WRITE_QUEUE_DEPTH);

        tokio::spawn(write_loop(name.clone(), stdin, writer_rx, Arc::clone(&disconnected)));
        tokio::spawn(read_loop(
            name.clone(),
            stdout,
            writer_tx.clone(),
            Arc::clone(&pending),
            Arc::clone(&disconnected),
        ));

        tracing::debug!("Spawned MCP server process {}", name);

        Ok(Self {
            name,
            child: tokio::sync::Mutex::new(Some(child)),
            writer_tx,
            pending,
            disconnected,
            call_ids: CallIdGenerator::new(),
        })
    }

    /// Display name of the server process.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    async fn write_line(&self, line: String) -> Result<(), SessionError> {
        self.writer_tx.send(line).await.map_err(|_| SessionError::Closed)
    }
}

#[async_trait]
impl McpSession for StdioSession {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<PendingResponse, SessionError> {
        if self.is_disconnected() {
            return Err(SessionError::Closed);
        }

        let line = serde_json::to_string(&request)? + "\n";
        let id = request.id;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&id) {
                return Err(SessionError::DuplicateRequestId(id));
            }
            pending.insert(id.clone(), tx);
        }

        tracing::debug!("MCP {} <- {}", self.name, line.trim_end());

        if let Err(e) = self.write_line(line).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        Ok(PendingResponse::new(id, rx))
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), SessionError> {
        let line = serde_json::to_string(&notification)? + "\n";
        self.write_line(line).await
    }

    fn next_call_id(&self) -> RequestId {
        self.call_ids.next_id()
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.disconnected.store(true, Ordering::SeqCst);

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }

        fail_pending(&self.pending);
        tracing::debug!("Closed MCP server process {}", self.name);
        Ok(())
    }
}

async fn write_loop(
    name: String,
    mut stdin: ChildStdin,
    mut rx: mpsc::Receiver<String>,
    disconnected: Arc<AtomicBool>,
) {
    while let Some(line) = rx.recv().await {
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::debug!("MCP {} write failed: {}", name, e);
            disconnected.store(true, Ordering::SeqCst);
            break;
        }
    }
}

async fn read_loop(
    name: String,
    stdout: ChildStdout,
    writer_tx: mpsc::Sender<String>,
    pending: PendingMap,
    disconnected: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                tracing::debug!("MCP {} -> {}", name, raw);

                match IncomingMessage::parse(raw) {
                    Ok(IncomingMessage::Response(response)) => route_response(&pending, response),
                    Ok(IncomingMessage::Request(request)) => {
                        let reply = answer_server_request(&request);
                        if let Ok(json) = serde_json::to_string(&reply) {
                            let _ = writer_tx.send(json + "\n").await;
                        }
                    }
                    Ok(IncomingMessage::Notification(notification)) => {
                        tracing::debug!("MCP {} notification: {}", name, notification.method);
                    }
                    Err(e) => tracing::debug!("MCP {} sent unparseable line: {}", name, e),
                }
            }
            Err(e) => {
                tracing::debug!("MCP {} read failed: {}", name, e);
                break;
            }
        }
    }

    disconnected.store(true, Ordering::SeqCst);
    fail_pending(&pending);
    tracing::debug!("MCP {} stdout closed", name);
}

fn route_response(pending: &PendingMap, response: JsonRpcResponse) {
    let Some(id) = response.id.clone() else {
        tracing::debug!("Dropping response without id");
        return;
    };

    if let Some(tx) = pending.lock().remove(&id) {
        let _ = tx.send(Ok(response));
    } else {
        tracing::debug!("Dropping response for unknown request {}", id);
    }
}

/// Reply to a request the server sent us. Only `ping` is supported.
pub(crate) fn answer_server_request(request: &JsonRpcRequest) -> JsonRpcResponse {
    if request.is_ping() {
        JsonRpcResponse::success(request.id.clone(), serde_json::json!({}))
    } else {
        JsonRpcResponse::failure(request.id.clone(), JsonRpcError::method_not_found(&request.method))
    }
}

fn fail_pending(pending: &PendingMap) {
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(SessionError::Closed));
    }
}
