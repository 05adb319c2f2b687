//! Broadcast hub
//!
//! Tracks live connections and relays every inbound payload to all of them.
//! A [`Hub`] is built once at startup together with its [`Dispatcher`]; the hub
//! is shared by `Arc` with the server and every connection handler.

mod connection;
mod dispatcher;
mod error;
mod queue;
mod registry;
#[cfg(test)]
pub(crate) mod testing;

pub use connection::*;
pub use dispatcher::*;
pub use error::*;
pub use queue::*;
pub use registry::*;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::HubConfig;

/// Shared hub state: the connection registry and the producer side of the
/// broadcast queue
pub struct Hub {
    registry: Arc<Registry>,
    queue: QueueSender,
    read_timeout: Option<Duration>,
    close_timeout: Option<Duration>,
}

impl Hub {
    /// Create a hub and the dispatcher that serves it
    ///
    /// The dispatcher must be spawned for payloads to go anywhere. It stops
    /// once the hub (and every clone of its queue) has been dropped.
    pub fn new(config: &HubConfig) -> (Self, Dispatcher) {
        let registry = Arc::new(Registry::new());
        let (queue, receiver) = broadcast_queue(config.queue_capacity);
        let dispatcher = Dispatcher::new(Arc::clone(&registry), receiver, config.write_timeout);

        let hub = Self {
            registry,
            queue,
            read_timeout: config.read_timeout,
            close_timeout: config.write_timeout,
        };
        (hub, dispatcher)
    }

    /// Deadline applied to each inbound read, if any
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Register a freshly opened connection
    pub async fn register(&self, conn: BoxedConnection) -> ConnectionId {
        self.registry.register(conn).await
    }

    /// Remove a connection and close it under the registry lock
    ///
    /// The close gets the same deadline as a fan-out write. Returns `true` if
    /// this call performed the removal. If the dispatcher already evicted it,
    /// nothing is closed a second time.
    pub async fn evict(&self, id: ConnectionId) -> bool {
        let evicted = self.registry.evict(id, self.close_timeout).await;
        if !evicted {
            debug!("Connection {} already evicted", id);
        }
        evicted
    }

    /// Queue a payload for broadcast to every connection
    pub async fn enqueue(&self, payload: Payload) -> HubResult<()> {
        self.queue.enqueue(payload).await
    }

    /// Number of open connections
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }
}
