//! Local durable storage for received archives.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   receive:folder   ┌──────────────┐
//! │ PeerClient  │ ─────────────────► │ History      │
//! └─────────────┘                    └──────┬───────┘
//!                                           │ put / iter (blocking pool)
//!                                           ▼
//!                                    ┌──────────────┐
//!                                    │ ArchiveStore │  RocksDB at `dss/`
//!                                    └──────┬───────┘
//!                                           │ column families
//!                        ┌──────────────────┴─────────────────┐
//!                        │ CF "messages": keyed by name        │
//!                        │ CF "files"   : keyed by name        │
//!                        └─────────────────────────────────────┘
//! ```
//!
//! Both stores are add-only: a second record under an existing name is
//! rejected and the first one kept.

pub mod archive;

pub use archive::{ArchiveStore, StoreConfig, StoreError, StoreName};
