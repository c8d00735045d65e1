//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_core::ClientId;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::transport::{Transport, TransportError};

/// A registered client.
pub struct Connection {
    /// Unique connection ID.
    pub id: ClientId,
    transport: Arc<dyn Transport>,
    /// When this connection was registered.
    pub connected_at: Instant,
    /// Wall-clock registration time, for reporting.
    pub connected_at_utc: DateTime<Utc>,
    last_heartbeat: Mutex<Instant>,
    message_count: AtomicU64,
    bytes_sent: AtomicU64,
    last_metrics_request: Mutex<Option<Instant>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("message_count", &self.message_count())
            .field("bytes_sent", &self.bytes_sent())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Serializable view of a connection.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionInfo {
    /// Connection ID.
    pub id: ClientId,
    /// Registration time.
    pub connected_at: DateTime<Utc>,
    /// Seconds since the last heartbeat.
    pub heartbeat_age_secs: f64,
    /// Frames delivered.
    pub message_count: u64,
    /// Bytes delivered.
    pub bytes_sent: u64,
}

impl Connection {
    /// Create a connection around `transport`.
    pub fn new(id: ClientId, transport: Arc<dyn Transport>) -> Self {
        let now = Instant::now();
        Self {
            id,
            transport,
            connected_at: now,
            connected_at_utc: Utc::now(),
            last_heartbeat: Mutex::new(now),
            message_count: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            last_metrics_request: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Queue a frame. Counters move only on success.
    pub fn send(&self, text: Arc<String>) -> Result<(), TransportError> {
        let len = text.len() as u64;
        self.transport.send_text(text)?;
        let _ = self.message_count.fetch_add(1, Ordering::Relaxed);
        let _ = self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    /// Close the underlying transport.
    pub async fn close(&self, code: u16, reason: &str) {
        self.transport.close(code, reason).await;
    }

    /// Refresh the heartbeat.
    pub fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Time since the last heartbeat.
    pub fn heartbeat_elapsed(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Frames delivered so far.
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Bytes delivered so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Claim the per-connection metrics slot.
    ///
    /// Returns `true` (and records the claim) when at least `min_gap` has
    /// passed since the previous successful claim.
    pub fn try_claim_metrics_slot(&self, min_gap: Duration) -> bool {
        let now = Instant::now();
        let mut last = self.last_metrics_request.lock();
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < min_gap => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Whether `transport` is the one this connection wraps.
    pub fn uses_transport(&self, transport: &Arc<dyn Transport>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.transport), Arc::as_ptr(transport))
    }

    /// Resolves once the registry has dropped this connection.
    pub fn closed(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Whether the registry has dropped this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Snapshot for reporting.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            connected_at: self.connected_at_utc,
            heartbeat_age_secs: self.heartbeat_elapsed().as_secs_f64(),
            message_count: self.message_count(),
            bytes_sent: self.bytes_sent(),
        }
    }
}
