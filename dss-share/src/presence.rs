//! Presence protocol: "is this connection currently attached?"
//!
//! Clients poll with `status:query(target)` on a fixed interval; the relay
//! answers the querying connection alone with `status:online` or
//! `status:offline`. Every query is answered independently from the
//! registry's current contents, so duplicates and bursts need no special
//! handling.

use crate::protocol::{ConnectionId, Event};
use crate::registry::ConnectionRegistry;

/// Presence answer for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    /// Decision rule. A connection is never online with respect to itself.
    pub fn resolve(querier: &ConnectionId, target: &ConnectionId, target_live: bool) -> Self {
        if target_live && target != querier {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == PresenceStatus::Online
    }

    /// Response event sent back to the querier.
    pub fn event(self) -> Event {
        match self {
            PresenceStatus::Online => Event::StatusOnline,
            PresenceStatus::Offline => Event::StatusOffline,
        }
    }

    pub fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::StatusOnline => Some(PresenceStatus::Online),
            Event::StatusOffline => Some(PresenceStatus::Offline),
            _ => None,
        }
    }
}

/// Answer a presence query against the live registry.
pub async fn answer(
    registry: &ConnectionRegistry,
    querier: &ConnectionId,
    target: &ConnectionId,
) -> PresenceStatus {
    let live = registry.is_live(target).await;
    PresenceStatus::resolve(querier, target, live)
}
