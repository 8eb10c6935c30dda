//! Periodic `notifications/heartbeat` emission on a session's push channel.

use std::sync::{atomic::Ordering, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Session;

pub const HEARTBEAT_METHOD: &str = "notifications/heartbeat";

/// Why the heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The stream token was cancelled (terminate, close, or shutdown).
    Cancelled,
    /// The receiving side of the push channel went away.
    ChannelClosed,
    /// The session was released while the loop was still running.
    SessionDropped,
}

pub fn heartbeat_notification() -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": HEARTBEAT_METHOD,
        "params": { "timestamp": Utc::now().to_rfc3339() },
    })
}

/// Emits a heartbeat every `interval` until cancelled or the channel closes.
///
/// The first notification is sent one full interval after start. A tick that
/// finds the channel full is skipped rather than awaited, so a slow reader
/// never holds the loop past a cancellation.
pub async fn run_heartbeat(
    session: Weak<Session>,
    sender: mpsc::Sender<Value>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatOutcome {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
            () = sender.closed() => return HeartbeatOutcome::ChannelClosed,
            _ = ticker.tick() => {
                let Some(session) = session.upgrade() else {
                    return HeartbeatOutcome::SessionDropped;
                };
                if session.is_closed() {
                    return HeartbeatOutcome::Cancelled;
                }

                match sender.try_send(heartbeat_notification()) {
                    Ok(()) => {
                        session.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        debug!(session_id = %session.id(), "push channel full, heartbeat skipped");
                    }
                    Err(TrySendError::Closed(_)) => return HeartbeatOutcome::ChannelClosed,
                }
            }
        }
    }
}
