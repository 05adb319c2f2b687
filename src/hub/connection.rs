//! Connection handles
//!
//! A connection is registered as a boxed [`Broadcastable`]: the write side of a
//! peer that the dispatcher can push payloads into. The read side stays with the
//! connection's handler task.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use uuid::Uuid;

use super::{HubError, HubResult};

/// Identity of a registered connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque message relayed verbatim to every connection
///
/// Text and binary frames keep their kind on the way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Extract a payload from a data frame. Control frames carry none.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Payload::Text(text)),
            Message::Binary(data) => Some(Payload::Binary(data)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
        }
    }

    /// Build the frame that carries this payload on the wire
    pub fn to_message(&self) -> Message {
        match self {
            Payload::Text(text) => Message::Text(text.clone()),
            Payload::Binary(data) => Message::Binary(data.clone()),
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    /// Whether the payload carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(data)
    }
}

/// Lifecycle of a single connection
///
/// Transitions only move forward; a closed connection never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Open)
                | (ConnectionState::Open, ConnectionState::Closing)
                | (ConnectionState::Closing, ConnectionState::Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Write capability the registry holds for each member
///
/// The dispatcher only ever talks to connections through this trait, so the
/// transport behind it can be swapped without touching the registry.
#[async_trait]
pub trait Broadcastable: Send {
    /// Write one payload. A failure means the connection is dead.
    async fn send(&mut self, payload: &Payload) -> HubResult<()>;

    /// Close the underlying transport. Called at most once, by whoever
    /// removed the connection from the registry.
    async fn close(&mut self);
}

/// Boxed connection as stored in the registry
pub type BoxedConnection = Box<dyn Broadcastable>;

/// Close a connection, giving up after `limit` if one is set
pub(crate) async fn close_within(conn: &mut BoxedConnection, limit: Option<Duration>) {
    match limit {
        Some(limit) => {
            if timeout(limit, conn.close()).await.is_err() {
                debug!("Close did not complete within {:?}", limit);
            }
        }
        None => conn.close().await,
    }
}

/// Resolves once the registered write half has been closed or dropped.
/// The read side treats this as the end of the connection.
pub type ClosedSignal = oneshot::Receiver<()>;

/// Write half of an upgraded WebSocket
pub struct WsConnection<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    closed_tx: Option<oneshot::Sender<()>>,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a new write half and the signal its reader waits on
    pub fn new(sink: SplitSink<WebSocketStream<S>, Message>) -> (Self, ClosedSignal) {
        let (closed_tx, closed_rx) = oneshot::channel();
        let conn = Self {
            sink,
            closed_tx: Some(closed_tx),
        };
        (conn, closed_rx)
    }
}

#[async_trait]
impl<S> Broadcastable for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, payload: &Payload) -> HubResult<()> {
        self.sink
            .send(payload.to_message())
            .await
            .map_err(HubError::Write)
    }

    async fn close(&mut self) {
        if let Some(closed_tx) = self.closed_tx.take() {
            let _ = closed_tx.send(());
        }
        if let Err(e) = self.sink.close().await {
            debug!("Error closing WebSocket sink: {}", e);
        }
    }
}
