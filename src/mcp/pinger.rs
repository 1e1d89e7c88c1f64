//! Keep-alive pinger.
//!
//! Owns one background task per session that sends an MCP `ping` at a fixed
//! interval so that load balancers and proxies in front of the server see
//! traffic during long tool calls and do not close the idle connection.
//!
//! The loop never fails: a ping that cannot be sent or is answered with an
//! error is logged and the schedule simply continues. A dead connection will
//! surface through the next application request instead.
//!
//! Pings are not serialized against application traffic. Both go through the
//! same [`McpSession`], which multiplexes requests by id. Transports that
//! cannot have two requests outstanding at once are not supported.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};

use super::protocol::JsonRpcRequest;
use super::session::{McpSession, ResponseResult};
use crate::core::PingInterval;

/// Lifecycle of a pinger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingerState {
    /// Created, not started
    Idle,
    /// Ping loop running
    Running,
    /// Stop requested, waiting for the loop to unwind
    Stopping,
    /// Loop finished; the pinger cannot be restarted
    Stopped,
}

impl fmt::Display for PingerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Error type for pinger lifecycle misuse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PingerError {
    #[error("Cannot start keep-alive pinger for {label}: pinger is {state}")]
    InvalidState { label: String, state: PingerState },
}

/// Counters reported by a finished ping loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingStats {
    /// Pings handed to the transport
    pub sent: u64,
    /// Pings acknowledged with a successful response
    pub acknowledged: u64,
    /// Pings that failed to send or were answered with an error
    pub failed: u64,
}

struct PingTask {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<PingStats>,
}

/// Periodic `ping` sender bound to one session.
pub struct KeepAlivePinger {
    /// Short session label for logs
    label: String,
    state: PingerState,
    /// Shared with the loop so callers can observe progress
    pings_sent: Arc<AtomicU64>,
    task: Option<PingTask>,
}

impl KeepAlivePinger {
    /// Create an idle pinger. `label` identifies the session in logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: PingerState::Idle,
            pings_sent: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Session label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PingerState {
        self.state
    }

    /// Number of pings handed to the transport so far.
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::SeqCst)
    }

    /// Whether the loop is still running.
    ///
    /// A running pinger becomes inactive on its own when the session reports
    /// that it is disconnected.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.handle.is_finished())
    }

    /// Start pinging `session` every `interval`.
    ///
    /// Spawns exactly one task. Only valid on an idle pinger; a second call
    /// fails with [`PingerError::InvalidState`] and spawns nothing.
    pub fn start(
        &mut self,
        session: Arc<dyn McpSession>,
        interval: PingInterval,
    ) -> Result<(), PingerError> {
        if self.state != PingerState::Idle {
            return Err(PingerError::InvalidState { label: self.label.clone(), state: self.state });
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(ping_loop(
            session,
            interval,
            stop_rx,
            Arc::clone(&self.pings_sent),
            self.label.clone(),
        ));

        self.task = Some(PingTask { stop_tx, handle });
        self.state = PingerState::Running;

        tracing::debug!(
            "Started ping task for session {} (interval: {:.1}s)",
            self.label,
            interval.as_secs_f64()
        );
        Ok(())
    }

    /// Stop the loop and wait for it to unwind.
    ///
    /// Returns the loop's counters the first time. Calling it again, or on a
    /// pinger that never started, does nothing and returns `None`. Once this
    /// returns no further ping is sent.
    pub async fn stop(&mut self) -> Option<PingStats> {
        let task = self.task.take()?;
        self.state = PingerState::Stopping;

        // The loop may already have exited on disconnect; the send result does not matter.
        let _ = task.stop_tx.send(());

        let stats = match task.handle.await {
            Ok(stats) => {
                tracing::debug!(
                    "Ping task for session {} stopped: {} sent, {} acknowledged, {} failed",
                    self.label,
                    stats.sent,
                    stats.acknowledged,
                    stats.failed
                );
                Some(stats)
            }
            Err(e) => {
                tracing::warn!("Ping task for session {} ended abnormally: {}", self.label, e);
                None
            }
        };

        self.state = PingerState::Stopped;
        stats
    }
}

impl Drop for KeepAlivePinger {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            // Dropping the sender alone would also end the loop.
            let _ = task.stop_tx.send(());
            tracing::debug!("Keep-alive pinger for session {} dropped while running", self.label);
        }
    }
}

impl fmt::Debug for KeepAlivePinger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlivePinger")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("pings_sent", &self.pings_sent())
            .finish()
    }
}

async fn ping_loop(
    session: Arc<dyn McpSession>,
    interval: PingInterval,
    mut stop_rx: oneshot::Receiver<()>,
    pings_sent: Arc<AtomicU64>,
    label: String,
) -> PingStats {
    let period = interval.as_duration();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Acknowledgments are awaited here, off the timer path.
    let mut acks: JoinSet<(i64, ResponseResult)> = JoinSet::new();
    let mut stats = PingStats::default();
    let mut next_id: i64 = 1;

    loop {
        tokio::select! {
            biased;

            // Sender fired or dropped: either way the owner is done with us.
            _ = &mut stop_rx => {
                tracing::debug!(
                    "Ping loop cancelled for session {} after {} pings",
                    label,
                    stats.sent
                );
                break;
            }

            Some(joined) = acks.join_next(), if !acks.is_empty() => {
                if let Ok((id, outcome)) = joined {
                    record_ack(&label, id, outcome, &mut stats);
                }
                continue;
            }

            _ = ticker.tick() => {}
        }

        if session.is_disconnected() {
            tracing::debug!("Session {} disconnected, stopping ping loop", label);
            break;
        }

        let id = next_id;
        next_id += 1;

        // A send stuck behind a full transport queue must not hold up stop.
        let sent = tokio::select! {
            biased;

            _ = &mut stop_rx => {
                tracing::debug!("Ping #{} abandoned for session {}: stop requested", id, label);
                break;
            }

            sent = session.send_request(JsonRpcRequest::ping(id)) => sent,
        };

        match sent {
            Ok(pending) => {
                stats.sent += 1;
                pings_sent.fetch_add(1, Ordering::SeqCst);
                tracing::debug!("Ping #{} sent for session {}", id, label);
                acks.spawn(async move { (id, pending.wait().await) });
            }
            Err(e) => {
                stats.failed += 1;
                tracing::debug!("Ping #{} failed for session {}: {}", id, label, e);
            }
        }
    }

    // Outstanding acknowledgments are abandoned.
    acks.shutdown().await;
    stats
}

fn record_ack(label: &str, id: i64, outcome: ResponseResult, stats: &mut PingStats) {
    match outcome {
        Ok(response) => match response.error {
            None => {
                stats.acknowledged += 1;
                tracing::trace!("Ping #{} acknowledged for session {}", id, label);
            }
            Some(error) => {
                stats.failed += 1;
                tracing::debug!("Ping #{} rejected by session {}: {}", id, label, error);
            }
        },
        Err(e) => {
            stats.failed += 1;
            tracing::debug!("Ping #{} got no acknowledgment from session {}: {}", id, label, e);
        }
    }
}
