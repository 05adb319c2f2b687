//! WebSocket connection handler
//!
//! One handler runs per upgraded connection. It registers the write half with
//! the hub, forwards every inbound payload to the broadcast queue, and evicts
//! the connection on the first read failure.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use crate::hub::{ClosedSignal, ConnectionState, Hub, HubError, HubResult, Payload, WsConnection};

/// Handles a single WebSocket connection
pub struct ConnectionHandler {
    hub: Arc<Hub>,
    peer_addr: SocketAddr,
    state: ConnectionState,
}

impl ConnectionHandler {
    /// Create a handler for a connection that has just been upgraded
    pub fn new(hub: Arc<Hub>, peer_addr: SocketAddr) -> Self {
        Self {
            hub,
            peer_addr,
            state: ConnectionState::Connecting,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serve the connection until its first read failure
    ///
    /// A clean disconnect returns `Ok(())`. Either way the connection has left
    /// the registry and its transport is closed when this returns.
    pub async fn run<S>(mut self, ws_stream: WebSocketStream<S>) -> HubResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_sender, mut ws_receiver) = ws_stream.split();
        let (conn, mut closed) = WsConnection::new(ws_sender);
        let id = self.hub.register(Box::new(conn)).await;
        self.advance(ConnectionState::Open);
        info!("Connection {} open for {}", id, self.peer_addr);

        let reason = self.forward_payloads(&mut ws_receiver, &mut closed).await;

        self.advance(ConnectionState::Closing);
        if self.hub.evict(id).await {
            debug!("Handler closed connection {}", id);
        }
        drop(ws_receiver);
        self.advance(ConnectionState::Closed);

        if reason.is_disconnect() {
            info!("Connection {} from {} closed", id, self.peer_addr);
            Ok(())
        } else {
            Err(reason)
        }
    }

    /// Read loop. Only returns once the connection can no longer be read,
    /// or once the dispatcher has closed its write half.
    async fn forward_payloads<S>(
        &self,
        ws_receiver: &mut SplitStream<WebSocketStream<S>>,
        closed: &mut ClosedSignal,
    ) -> HubError
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let message = tokio::select! {
                biased;
                _ = &mut *closed => return HubError::Evicted,
                result = self.read_message(ws_receiver) => match result {
                    Ok(message) => message,
                    Err(e) => return e,
                },
            };

            let Some(payload) = Payload::from_message(message) else {
                continue;
            };

            debug!("Received {} bytes from {}", payload.len(), self.peer_addr);
            tokio::select! {
                biased;
                _ = &mut *closed => return HubError::Evicted,
                result = self.hub.enqueue(payload) => {
                    if let Err(e) = result {
                        return e;
                    }
                }
            }
        }
    }

    async fn read_message<S>(&self, ws_receiver: &mut SplitStream<WebSocketStream<S>>) -> HubResult<Message>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let next = match self.hub.read_timeout() {
            Some(limit) => timeout(limit, ws_receiver.next())
                .await
                .map_err(|_| HubError::Timeout {
                    op: "read",
                    after: limit,
                })?,
            None => ws_receiver.next().await,
        };

        match next {
            Some(Ok(Message::Close(_))) => {
                info!("Client {} requested close", self.peer_addr);
                Err(HubError::Disconnected)
            }
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(HubError::Read(e)),
            None => Err(HubError::Disconnected),
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(self.state.can_transition_to(next));
        debug!("{}: {} -> {}", self.peer_addr, self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use futures_util::SinkExt;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::Role;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    async fn ws_pair() -> (WebSocketStream<tokio::io::DuplexStream>, WebSocketStream<tokio::io::DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    async fn wait_for_connections(hub: &Hub, count: usize) {
        timeout(Duration::from_secs(2), async {
            while hub.connection_count().await != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry never reached expected size");
    }

    #[test]
    fn test_handler_starts_connecting() {
        let (hub, _dispatcher) = Hub::new(&HubConfig::default());
        let handler = ConnectionHandler::new(Arc::new(hub), peer());
        assert_eq!(handler.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_sender_receives_own_payload() {
        let (hub, dispatcher) = Hub::new(&HubConfig::default());
        let hub = Arc::new(hub);
        tokio::spawn(dispatcher.run());

        let (server, mut client) = ws_pair().await;
        let handler = tokio::spawn(ConnectionHandler::new(Arc::clone(&hub), peer()).run(server));
        wait_for_connections(&hub, 1).await;

        client.send(Message::Text("echo".to_string())).await.unwrap();
        let reply = timeout(Duration::from_secs(2), client.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(reply, Message::Text("echo".to_string()));

        client.close(None).await.unwrap();
        let result = timeout(Duration::from_secs(2), handler).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_control_frames_are_not_broadcast() {
        let (hub, dispatcher) = Hub::new(&HubConfig::default());
        let hub = Arc::new(hub);
        tokio::spawn(dispatcher.run());

        let (server, mut client) = ws_pair().await;
        tokio::spawn(ConnectionHandler::new(Arc::clone(&hub), peer()).run(server));
        wait_for_connections(&hub, 1).await;

        client.send(Message::Pong(vec![1, 2])).await.unwrap();
        client.send(Message::Binary(vec![9, 9])).await.unwrap();

        let reply = timeout(Duration::from_secs(2), client.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(reply, Message::Binary(vec![9, 9]));
    }

    #[tokio::test]
    async fn test_dropped_peer_is_evicted() {
        let (hub, _dispatcher) = Hub::new(&HubConfig::default());
        let hub = Arc::new(hub);

        let (server, client) = ws_pair().await;
        let handler = tokio::spawn(ConnectionHandler::new(Arc::clone(&hub), peer()).run(server));
        wait_for_connections(&hub, 1).await;

        drop(client);
        let _ = timeout(Duration::from_secs(2), handler).await.unwrap().unwrap();
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_read_timeout_evicts_idle_peer() {
        let config = HubConfig::default().with_read_timeout(Some(Duration::from_millis(50)));
        let (hub, _dispatcher) = Hub::new(&config);
        let hub = Arc::new(hub);

        let (server, _client) = ws_pair().await;
        let handler = tokio::spawn(ConnectionHandler::new(Arc::clone(&hub), peer()).run(server));

        let result = timeout(Duration::from_secs(2), handler).await.unwrap().unwrap();
        assert!(matches!(result, Err(HubError::Timeout { op: "read", .. })));
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_write_ends_read_loop() {
        let config = HubConfig::default().with_write_timeout(Some(Duration::from_millis(50)));
        let (hub, dispatcher) = Hub::new(&config);
        let hub = Arc::new(hub);
        tokio::spawn(dispatcher.run());

        // Tiny buffers and a client that never reads: the echo cannot be written
        let (server_io, client_io) = tokio::io::duplex(64);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let handler = tokio::spawn(ConnectionHandler::new(Arc::clone(&hub), peer()).run(server));
        wait_for_connections(&hub, 1).await;

        client.send(Message::Text("x".repeat(500))).await.unwrap();

        let result = timeout(Duration::from_secs(2), handler)
            .await
            .expect("handler should stop once its connection is evicted")
            .unwrap();
        assert!(matches!(result, Err(HubError::Evicted)));
        assert_eq!(hub.connection_count().await, 0);
    }
}
