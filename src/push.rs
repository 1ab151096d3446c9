//! Periodic snapshot push shared by the SSE and WebSocket adapters.
//!
//! Each connection runs its own loop: every [`PUSH_INTERVAL`] it reads the
//! snapshot cache and pushes the payload to its sink. Ticks that fall behind
//! are skipped, never queued, so a push always carries the current snapshot.
//! The loop ends when the connection's cancellation token fires or, under
//! [`WriteFailure::Close`], when a write fails.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;

pub const PUSH_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
#[error("push to client failed: {0}")]
pub struct PushError(pub String);

/// Destination of pushed frames for one client.
#[async_trait]
pub trait PushSink: Send {
    async fn push(&mut self, payload: Bytes) -> Result<(), PushError>;
}

/// What a failed write does to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    /// Log and keep ticking; disconnects are observed through cancellation.
    Continue,
    /// End the connection.
    Close,
}

/// Per-connection state, owned by the serving task.
#[derive(Debug, Clone)]
pub struct Connection {
    pub opened_at: Instant,
    pub last_push: Option<Instant>,
    pub frames: u64,
    pub alive: bool,
}

impl Connection {
    fn open() -> Self {
        Self {
            opened_at: Instant::now(),
            last_push: None,
            frames: 0,
            alive: true,
        }
    }
}

/// Runs the push loop for one connection until `cancel` fires (or a write
/// fails under [`WriteFailure::Close`]) and returns the closed connection.
///
/// The first push happens one interval after the connection opens. Fetch
/// failures are logged and the tick is skipped.
pub async fn serve<S: PushSink>(
    cache: &SnapshotCache,
    sink: &mut S,
    cancel: CancellationToken,
    on_write_failure: WriteFailure,
) -> Connection {
    let mut conn = Connection::open();
    let mut ticker = tokio::time::interval_at(conn.opened_at + PUSH_INTERVAL, PUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while conn.alive {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Client disconnected");
                conn.alive = false;
            }
            _ = ticker.tick() => {
                let payload = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        conn.alive = false;
                        continue;
                    }
                    result = cache.get() => match result {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "Snapshot unavailable, skipping push");
                            continue;
                        }
                    },
                };

                // A client that stops reading can stall the write forever.
                let written = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Cancelled during push");
                        conn.alive = false;
                        continue;
                    }
                    result = sink.push(payload) => result,
                };

                match written {
                    Ok(()) => {
                        conn.frames += 1;
                        conn.last_push = Some(Instant::now());
                    }
                    Err(e) => match on_write_failure {
                        WriteFailure::Continue => warn!(error = %e, "Push failed"),
                        WriteFailure::Close => {
                            warn!(error = %e, "Push failed, closing connection");
                            conn.alive = false;
                        }
                    },
                }
            }
        }
    }

    info!(
        frames = conn.frames,
        open_secs = conn.opened_at.elapsed().as_secs(),
        "Push connection closed"
    );
    conn
}
