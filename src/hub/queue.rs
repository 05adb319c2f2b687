//! Outbound broadcast queue
//!
//! Unbounded unless a capacity is configured. A bounded queue makes producers
//! wait for room instead of dropping payloads.

use tokio::sync::mpsc;

use super::{HubError, HubResult, Payload};

/// Producer side, cloned into every handler through the hub
#[derive(Debug, Clone)]
pub enum QueueSender {
    Unbounded(mpsc::UnboundedSender<Payload>),
    Bounded(mpsc::Sender<Payload>),
}

/// Consumer side, owned by the dispatcher
#[derive(Debug)]
pub enum QueueReceiver {
    Unbounded(mpsc::UnboundedReceiver<Payload>),
    Bounded(mpsc::Receiver<Payload>),
}

/// Create the outbound queue. `None` or `Some(0)` means unbounded.
pub fn broadcast_queue(capacity: Option<usize>) -> (QueueSender, QueueReceiver) {
    match capacity {
        Some(capacity) if capacity > 0 => {
            let (tx, rx) = mpsc::channel(capacity);
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
        _ => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
    }
}

impl QueueSender {
    /// Append a payload, waiting for room if the queue is bounded and full
    pub async fn enqueue(&self, payload: Payload) -> HubResult<()> {
        match self {
            QueueSender::Unbounded(tx) => tx.send(payload).map_err(|_| HubError::QueueClosed),
            QueueSender::Bounded(tx) => tx.send(payload).await.map_err(|_| HubError::QueueClosed),
        }
    }

    /// Whether producers can be made to wait for room
    pub fn is_bounded(&self) -> bool {
        matches!(self, QueueSender::Bounded(_))
    }
}

impl QueueReceiver {
    /// Next payload in FIFO order, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Payload> {
        match self {
            QueueReceiver::Unbounded(rx) => rx.recv().await,
            QueueReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_capacity_selects_queue_kind() {
        assert!(!broadcast_queue(None).0.is_bounded());
        assert!(!broadcast_queue(Some(0)).0.is_bounded());
        assert!(broadcast_queue(Some(8)).0.is_bounded());
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let (tx, mut rx) = broadcast_queue(None);
        for i in 0..100 {
            tx.enqueue(Payload::Text(i.to_string())).await.unwrap();
        }
        for i in 0..100 {
            assert_eq!(rx.recv().await, Some(Payload::Text(i.to_string())));
        }
    }

    #[tokio::test]
    async fn test_bounded_queue_blocks_producer_when_full() {
        let (tx, mut rx) = broadcast_queue(Some(1));
        tx.enqueue(Payload::from("first")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.enqueue(Payload::from("second"))).await;
        assert!(blocked.is_err());

        assert_eq!(rx.recv().await, Some(Payload::from("first")));
        tx.enqueue(Payload::from("third")).await.unwrap();
        assert_eq!(rx.recv().await, Some(Payload::from("third")));
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped() {
        let (tx, rx) = broadcast_queue(None);
        drop(rx);
        let result = tx.enqueue(Payload::from("late")).await;
        assert!(matches!(result, Err(HubError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_recv_ends_when_senders_dropped() {
        let (tx, mut rx) = broadcast_queue(Some(4));
        tx.enqueue(Payload::from("last")).await.unwrap();
        drop(tx);
        assert_eq!(rx.recv().await, Some(Payload::from("last")));
        assert_eq!(rx.recv().await, None);
    }
}
