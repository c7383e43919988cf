//! # dss-share: peer file & message drop over a stateless relay
//!
//! Two peers connected to the same relay exchange short text messages
//! and bundles of files by naming each other's connection id. The relay
//! keeps nothing but a map of live connections; the receiving side keeps
//! a durable history of the files it got.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐     WebSocket      ┌─────────────┐
//! │ PeerClient  │ ─── send:* ──────► │ RelayServer  │ ── receive:* ────► │ PeerClient  │
//! │ (sender)    │     Binary Proto   │  registry    │     Binary Proto   │ (receiver)  │
//! └──────┬──────┘                    │  presence    │                    └──────┬──────┘
//!        │                           └──────────────┘                           │
//!        ▼                                                                      ▼
//! ┌─────────────┐                                                       ┌─────────────┐
//! │ ingest      │ file → Archive                                        │ History     │
//! └─────────────┘                                                       │ ArchiveStore│
//!                                                                       └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Data model and binary wire protocol (bincode-encoded `Event`)
//! - [`registry`]: Live connection map
//! - [`presence`]: Online/offline answers
//! - [`relay`]: Forwarding of messages and folders to a named target
//! - [`server`]: WebSocket relay server
//! - [`client`]: WebSocket peer client with presence polling
//! - [`ingest`]: File to transportable archive conversion
//! - [`storage`]: RocksDB archive store
//! - [`history`]: Received-file persistence and replay

pub mod protocol;
pub mod registry;
pub mod presence;
pub mod relay;
pub mod server;
pub mod client;
pub mod ingest;
pub mod storage;
pub mod history;

// Re-exports for convenience
pub use protocol::{Archive, ChannelError, ConnectionId, Event, Folder, Message};
pub use registry::{ConnectionRegistry, Outbox};
pub use presence::PresenceStatus;
pub use relay::{Delivery, EventRelay, RelayStats};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use client::{ClientConfig, ConnectionState, PeerClient, PeerEvent};
pub use ingest::{
    classify, data_uri, decode_data_uri, ingest, ingest_all, ingest_with_progress,
    BodyEncoding, FileHandle, IngestError,
};
pub use storage::{ArchiveStore, StoreConfig, StoreError, StoreName};
pub use history::{FolderReceipt, History, HistoryEntry, PreviewKind};
