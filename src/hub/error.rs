//! Hub error taxonomy
//!
//! Every failure here is scoped to a single connection or payload. None of
//! them stop the hub.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Errors raised while accepting, reading from or writing to a connection
#[derive(Debug, Error)]
pub enum HubError {
    /// The HTTP to WebSocket handshake failed; the peer was never registered
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(#[source] WsError),

    /// An inbound read failed
    #[error("Read failed: {0}")]
    Read(#[source] WsError),

    /// An outbound write failed during fan-out
    #[error("Write failed: {0}")]
    Write(#[source] WsError),

    /// The peer closed the connection or the stream ended
    #[error("Connection closed by peer")]
    Disconnected,

    /// The write half was closed after a failed fan-out write
    #[error("Connection evicted after a failed write")]
    Evicted,

    /// A configured read or write deadline elapsed
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// The dispatcher is gone and the queue no longer accepts payloads
    #[error("Broadcast queue closed")]
    QueueClosed,
}

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

impl HubError {
    /// Whether this error ends a connection without anything going wrong
    pub fn is_disconnect(&self) -> bool {
        matches!(self, HubError::Disconnected)
    }
}
