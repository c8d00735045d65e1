//! The seam between the connection registry and a concrete socket.
//!
//! The registry never touches a socket directly. It talks to a
//! [`Transport`], which for live clients is a [`ChannelTransport`] feeding a
//! single writer task per socket, so frames to one client stay in order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// How long a close frame may wait for queue space.
const CLOSE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Transport failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The outbound queue is full.
    #[error("outbound queue is full")]
    Full,
    /// The peer or writer has gone away.
    #[error("transport is closed")]
    Closed,
    /// The connection could not be accepted.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// A bidirectional text channel to one client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Complete any pending handshake. The default accepts immediately.
    async fn accept(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Queue a text frame without waiting.
    fn send_text(&self, text: Arc<String>) -> Result<(), TransportError>;

    /// Close with a WebSocket close code and reason. Best-effort.
    async fn close(&self, code: u16, reason: &str);
}

/// A frame for the writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame.
    Text(Arc<String>),
    /// Close frame; the writer stops after sending it.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// [`Transport`] backed by a bounded `mpsc` queue.
pub struct ChannelTransport {
    tx: mpsc::Sender<Outbound>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its writer task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn send_text(&self, text: Arc<String>) -> Result<(), TransportError> {
        self.tx.try_send(Outbound::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Full,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    async fn close(&self, code: u16, reason: &str) {
        let frame = Outbound::Close {
            code,
            reason: reason.to_string(),
        };
        let _ = tokio::time::timeout(CLOSE_SEND_TIMEOUT, self.tx.send(frame)).await;
    }
}
