//! Point-to-point event forwarding.
//!
//! `send:message` / `send:folder` from one connection become
//! `receive:message` / `receive:folder` on the connection named in the
//! payload's `to` field. Delivery is fire-and-forget: an unknown or closed
//! target, a target whose outbox is full, or the sender itself as target
//! is a silent drop, never an error to the sender.
//!
//! Forwarding never waits on the target, so a receiver that stops reading
//! cannot stall the sender's read loop.
//!
//! Ordering: a sender's read loop forwards its events one at a time into
//! the target's FIFO outbox, so events from one sender to one receiver
//! arrive in emission order. Nothing orders events across senders.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::{ConnectionId, Event, Folder, Message};
use crate::registry::ConnectionRegistry;

/// Outcome of one forwarding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the target's outbox
    Forwarded,
    /// Target not live, backlogged, or the sender itself
    Dropped,
}

/// Forwarding counters.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub forwarded: u64,
    pub dropped: u64,
    /// Subset of `dropped` lost to a full target outbox
    pub backlogged: u64,
    pub bytes_forwarded: u64,
}

#[derive(Default)]
struct AtomicRelayStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
    backlogged: AtomicU64,
    bytes_forwarded: AtomicU64,
}

/// Routes payloads to a single named target.
pub struct EventRelay {
    registry: Arc<ConnectionRegistry>,
    stats: AtomicRelayStats,
}

impl EventRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: AtomicRelayStats::default(),
        }
    }

    /// Forward a message verbatim from connection `sender` to `msg.to`.
    pub async fn relay_message(&self, sender: &ConnectionId, msg: Message) -> Delivery {
        let to = msg.to.clone();
        self.forward(sender, &to, Event::ReceiveMessage(msg)).await
    }

    /// Forward a whole folder verbatim from connection `sender` to `folder.to`.
    pub async fn relay_folder(&self, sender: &ConnectionId, folder: Folder) -> Delivery {
        let to = folder.to.clone();
        self.forward(sender, &to, Event::ReceiveFolder(folder)).await
    }

    async fn forward(&self, sender: &ConnectionId, to: &ConnectionId, event: Event) -> Delivery {
        if to == sender {
            log::debug!("Dropping {} addressed by {sender} to itself", event.name());
            return self.drop_event();
        }

        let Some(outbox) = self.registry.route(to).await else {
            log::debug!("Dropping {} for offline target {to}", event.name());
            return self.drop_event();
        };

        let frame = match event.encode() {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                log::warn!("Failed to encode {} for {to}: {e}", event.name());
                return self.drop_event();
            }
        };
        let len = frame.len() as u64;

        match outbox.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("Outbox of {to} is full, dropping {}", event.name());
                self.stats.backlogged.fetch_add(1, Ordering::Relaxed);
                return self.drop_event();
            }
            // Closed means the target disconnected after the lookup
            Err(TrySendError::Closed(_)) => {
                log::debug!("Target {to} closed before {} was queued", event.name());
                return self.drop_event();
            }
        }

        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_forwarded.fetch_add(len, Ordering::Relaxed);
        log::debug!("Forwarded {} from {sender} to {to} ({len} bytes)", event.name());
        Delivery::Forwarded
    }

    fn drop_event(&self) -> Delivery {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        Delivery::Dropped
    }

    /// Lock-free snapshot of the counters.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            forwarded: self.stats.forwarded.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            backlogged: self.stats.backlogged.load(Ordering::Relaxed),
            bytes_forwarded: self.stats.bytes_forwarded.load(Ordering::Relaxed),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
