//! Connection registry
//!
//! The authoritative set of live connections. A single async mutex guards the
//! set and is shared by handlers (register/unregister) and the dispatcher, which
//! holds it for the whole of each fan-out. Membership changes therefore never
//! interleave with a broadcast in progress.
//!
//! The lock is coarse: a slow peer holds up registration and
//! delivery for everyone until its write completes or times out.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{close_within, BoxedConnection, ConnectionId};

pub(crate) type Members = HashMap<ConnectionId, BoxedConnection>;

/// Lock-guarded set of open connections
pub struct Registry {
    members: Mutex<Members>,
}

impl Registry {
    /// Create a new, empty registry
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Add a connection and return the identity it is registered under
    pub async fn register(&self, conn: BoxedConnection) -> ConnectionId {
        let id = ConnectionId::new();
        let mut members = self.members.lock().await;
        members.insert(id, conn);
        debug!("Registered connection {} ({} open)", id, members.len());
        id
    }

    /// Remove a connection if present
    ///
    /// Returns the removed handle so the caller can close it. Removing an
    /// absent connection is a no-op and returns `None`.
    pub async fn unregister(&self, id: ConnectionId) -> Option<BoxedConnection> {
        let mut members = self.members.lock().await;
        let removed = members.remove(&id);
        if removed.is_some() {
            debug!("Unregistered connection {} ({} open)", id, members.len());
        }
        removed
    }

    /// Remove a connection and close it before releasing the lock
    ///
    /// The close is bounded by `close_timeout` when one is set. Returns `true`
    /// if this call removed the connection; an absent connection is left alone.
    pub async fn evict(&self, id: ConnectionId, close_timeout: Option<Duration>) -> bool {
        let mut members = self.members.lock().await;
        match members.remove(&id) {
            Some(mut conn) => {
                close_within(&mut conn, close_timeout).await;
                debug!("Evicted connection {} ({} open)", id, members.len());
                true
            }
            None => false,
        }
    }

    /// Identities of all current members, in no particular order
    pub async fn snapshot(&self) -> Vec<ConnectionId> {
        self.members.lock().await.keys().copied().collect()
    }

    /// Whether a connection is currently registered
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().await.contains_key(&id)
    }

    /// Number of registered connections
    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Whether no connection is registered
    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    /// Exclusive access to the member set for a fan-out round
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().await
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
