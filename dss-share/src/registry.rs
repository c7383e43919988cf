//! Live connection registry.
//!
//! Maps every attached connection id to the outbox feeding its socket
//! writer. An id is present exactly while its channel is open: the server
//! registers on accept and unregisters when the read loop ends, whether
//! the peer closed cleanly or the socket failed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::protocol::ConnectionId;

/// Pre-encoded frames queued for one connection's writer task.
pub type Outbox = mpsc::Sender<Arc<Vec<u8>>>;

/// Shared set of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    routes: RwLock<HashMap<ConnectionId, Outbox>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` live. Registering again replaces the route.
    pub async fn register(&self, id: ConnectionId, outbox: Outbox) {
        self.routes.write().await.insert(id, outbox);
    }

    /// Drop `id` from the live set. Returns whether it was present.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        self.routes.write().await.remove(id).is_some()
    }

    pub async fn is_live(&self, id: &ConnectionId) -> bool {
        self.routes.read().await.contains_key(id)
    }

    /// Outbox for `id`, if it is live.
    ///
    /// The sender is cloned so callers never hold the registry lock
    /// across an await.
    pub async fn route(&self, id: &ConnectionId) -> Option<Outbox> {
        self.routes.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }

    pub async fn live_ids(&self) -> Vec<ConnectionId> {
        self.routes.read().await.keys().cloned().collect()
    }
}
