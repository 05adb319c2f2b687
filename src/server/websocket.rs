//! WebSocket server implementation
//!
//! Accepts TCP connections, performs the WebSocket handshake on the configured
//! path and hands each upgraded connection to its own [`ConnectionHandler`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{error, info, warn};

use super::ConnectionHandler;
use crate::config::ServerConfig;
use crate::hub::{Hub, HubError, HubResult};

/// WebSocket server bound to a listening socket
pub struct WebSocketServer {
    listener: TcpListener,
    config: ServerConfig,
    hub: Arc<Hub>,
}

impl WebSocketServer {
    /// Bind the listening socket
    pub async fn bind(config: ServerConfig, hub: Arc<Hub>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.socket_addr()).await?;
        Ok(Self {
            listener,
            config,
            hub,
        })
    }

    /// Address actually bound, useful when the configured port is 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the WebSocket server
    ///
    /// Accepts connections until the process exits. Failures on individual
    /// connections are logged and never stop the accept loop.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        info!("WebSocket server listening on ws://{}{}", addr, self.config.path);

        let path: Arc<str> = Arc::from(self.config.path.as_str());

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let hub = Arc::clone(&self.hub);
                    let path = Arc::clone(&path);

                    tokio::spawn(async move {
                        match handle_connection(stream, peer_addr, hub, &path).await {
                            Ok(()) => {}
                            Err(e @ HubError::Upgrade(_)) => {
                                warn!("Error upgrading connection from {}: {}", peer_addr, e);
                            }
                            Err(e) => {
                                warn!("Connection from {} dropped: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Upgrade and serve a single connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<Hub>,
    path: &str,
) -> HubResult<()> {
    info!("New connection from {}", peer_addr);
    let ws_stream = upgrade(stream, path).await?;
    ConnectionHandler::new(hub, peer_addr).run(ws_stream).await
}

/// Perform the handshake, accepting any origin but only the configured path
async fn upgrade(stream: TcpStream, path: &str) -> HubResult<WebSocketStream<TcpStream>> {
    let check_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == path {
            Ok(response)
        } else {
            Err(not_found(request.uri().path()))
        }
    };

    accept_hdr_async(stream, check_path)
        .await
        .map_err(HubError::Upgrade)
}

fn not_found(path: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("No WebSocket endpoint at {}", path)));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
