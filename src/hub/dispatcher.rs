//! Broadcast dispatcher
//!
//! A single task drains the outbound queue and writes each payload to every
//! registered connection while holding the registry lock. One consumer on one
//! FIFO queue means every connection sees payloads in enqueue order.
//!
//! Writes happen one after another inside the critical section, so a peer that
//! stops reading stalls delivery to all others until its write fails or the
//! configured write deadline expires.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{close_within, BoxedConnection, HubError, HubResult, Payload, QueueReceiver, Registry};

/// Outcome of one fan-out round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Connections the payload was written to
    pub delivered: usize,
    /// Connections whose write failed and were closed and removed
    pub evicted: usize,
}

/// Single consumer of the broadcast queue
pub struct Dispatcher {
    registry: Arc<Registry>,
    queue: QueueReceiver,
    write_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a new dispatcher over the hub's registry and queue
    pub(crate) fn new(
        registry: Arc<Registry>,
        queue: QueueReceiver,
        write_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            queue,
            write_timeout,
        }
    }

    /// Drain the queue until every producer is gone
    ///
    /// In the server this runs for the life of the process, since the hub
    /// keeps a sender alive.
    pub async fn run(mut self) {
        info!("Broadcast dispatcher started");
        while let Some(payload) = self.queue.recv().await {
            let report = self.fan_out(&payload).await;
            debug!(
                "Broadcast {} bytes to {} connections ({} evicted)",
                payload.len(),
                report.delivered,
                report.evicted
            );
        }
        info!("Broadcast queue closed, dispatcher stopping");
    }

    /// Write one payload to every registered connection
    ///
    /// A connection whose write fails is closed and removed before the next
    /// member is tried, and before the lock is released.
    pub async fn fan_out(&self, payload: &Payload) -> FanOutReport {
        let mut members = self.registry.lock().await;
        let targets: Vec<_> = members.keys().copied().collect();
        let mut report = FanOutReport::default();

        for id in targets {
            let Some(conn) = members.get_mut(&id) else {
                continue;
            };
            match self.write(conn, payload).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Error sending to connection {}: {}", id, e);
                    if let Some(mut conn) = members.remove(&id) {
                        close_within(&mut conn, self.write_timeout).await;
                    }
                    report.evicted += 1;
                }
            }
        }

        report
    }

    async fn write(&self, conn: &mut BoxedConnection, payload: &Payload) -> HubResult<()> {
        match self.write_timeout {
            Some(limit) => timeout(limit, conn.send(payload))
                .await
                .map_err(|_| HubError::Timeout {
                    op: "write",
                    after: limit,
                })?,
            None => conn.send(payload).await,
        }
    }
}
