//! Wire protocol between peers and the relay.
//!
//! Every frame on the transport channel is one bincode-encoded [`Event`]
//! carried in a binary WebSocket message:
//! ```text
//! ┌──────────┬──────────────────────────────────────────┐
//! │ variant  │ payload (Message | Folder | id | none)   │
//! │ varint   │ variable                                 │
//! └──────────┴──────────────────────────────────────────┘
//! ```
//!
//! The relay never inspects payloads beyond decoding the frame; a
//! `send:*` event is re-emitted to its target as the matching `receive:*`
//! event with the payload untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier the relay assigns to a connection when it opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier (32 lowercase hex chars).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Short text message. Lives for exactly one relay hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    /// Display name of the sender
    pub name: String,
    pub to: ConnectionId,
    pub from: ConnectionId,
}

impl Message {
    pub fn new(
        name: impl Into<String>,
        text: impl Into<String>,
        to: ConnectionId,
        from: ConnectionId,
    ) -> Self {
        Self {
            text: text.into(),
            name: name.into(),
            to,
            from,
        }
    }
}

/// A single file in transportable form.
///
/// `body` is either a `data:` URI or raw decoded text, depending on the
/// declared media type. `size` is what the source reported, not `body.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub body: String,
    #[serde(rename = "type")]
    pub media_type: String,
    /// Unique key inside a local store
    pub name: String,
    pub size: u64,
}

/// Envelope for a bundle of files sent in one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Filename → archive
    pub files: BTreeMap<String, Archive>,
    /// Display name of the sender
    pub name: String,
    pub from: ConnectionId,
    pub to: ConnectionId,
}

impl Folder {
    pub fn new(name: impl Into<String>, from: ConnectionId, to: ConnectionId) -> Self {
        Self {
            files: BTreeMap::new(),
            name: name.into(),
            from,
            to,
        }
    }

    /// Add an archive under its own name.
    pub fn insert(&mut self, archive: Archive) -> Option<Archive> {
        self.files.insert(archive.name.clone(), archive)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of the reported sizes of every file.
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|a| a.size).sum()
    }
}

/// Transport channel event vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// First frame on every connection: the id the relay assigned
    Connected(ConnectionId),
    SendMessage(Message),
    ReceiveMessage(Message),
    SendFolder(Folder),
    ReceiveFolder(Folder),
    /// Presence request naming a target connection
    StatusQuery(ConnectionId),
    StatusOnline,
    StatusOffline,
}

impl Event {
    /// Event name as used on the channel.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected(_) => "connected",
            Event::SendMessage(_) => "send:message",
            Event::ReceiveMessage(_) => "receive:message",
            Event::SendFolder(_) => "send:folder",
            Event::ReceiveFolder(_) => "receive:folder",
            Event::StatusQuery(_) => "status:query",
            Event::StatusOnline => "status:online",
            Event::StatusOffline => "status:offline",
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ChannelError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ChannelError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ChannelError::Deserialization(e.to_string()))?;
        Ok(event)
    }
}

/// Transport channel failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("No target connection selected")]
    NoTarget,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    Timeout,
}
