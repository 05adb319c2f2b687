//! In-memory connections for exercising the hub without sockets

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::Error as WsError;

use super::{Broadcastable, HubError, HubResult, Payload};

/// How a mock connection responds to writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    Fail,
    Stall,
}

/// Observer side of a [`MockConnection`]
#[derive(Debug, Clone, Default)]
pub struct Probe {
    received: Arc<Mutex<Vec<Payload>>>,
    closes: Arc<AtomicUsize>,
}

impl Probe {
    pub fn received(&self) -> Vec<Payload> {
        self.received.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MockConnection {
    probe: Probe,
    behavior: Behavior,
}

impl MockConnection {
    pub fn new(behavior: Behavior) -> (Box<Self>, Probe) {
        let probe = Probe::default();
        let conn = Box::new(Self {
            probe: probe.clone(),
            behavior,
        });
        (conn, probe)
    }
}

#[async_trait]
impl Broadcastable for MockConnection {
    async fn send(&mut self, payload: &Payload) -> HubResult<()> {
        match self.behavior {
            Behavior::Accept => {
                self.probe.received.lock().unwrap().push(payload.clone());
                Ok(())
            }
            Behavior::Fail => Err(HubError::Write(WsError::ConnectionClosed)),
            Behavior::Stall => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        if self.behavior == Behavior::Stall {
            std::future::pending::<()>().await;
        }
    }
}
