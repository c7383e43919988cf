//! Received-file history.
//!
//! Wraps the [`ArchiveStore`] for the async client side: a received
//! folder is persisted file by file into the `files` store, and the
//! whole store can be replayed with a [`PreviewKind`] per archive so a
//! front end knows how to render it.
//!
//! Store calls are synchronous RocksDB I/O and run on the blocking pool.

use std::sync::Arc;

use crate::protocol::{Archive, Folder};
use crate::storage::{ArchiveStore, StoreError, StoreName};

/// How an archive should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    /// Offered as a named download link (documents, executables)
    Download,
    Video,
    Audio,
    Image,
    /// Shown inline as text
    Text,
}

impl PreviewKind {
    /// Pick the preview for a declared media type. Unknown types render as text.
    pub fn for_type(media_type: &str) -> Self {
        let media_type = media_type.trim().to_ascii_lowercase();
        let essence = media_type.split(';').next().unwrap_or_default().trim();

        match essence {
            "application/pdf"
            | "application/x-msdownload"
            | "application/vnd.microsoft.portable-executable" => PreviewKind::Download,
            t if t.starts_with("video/") => PreviewKind::Video,
            t if t.starts_with("audio/") => PreviewKind::Audio,
            t if t.starts_with("image/") => PreviewKind::Image,
            _ => PreviewKind::Text,
        }
    }
}

/// One replayed archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub preview: PreviewKind,
    pub archive: Archive,
}

impl From<Archive> for HistoryEntry {
    fn from(archive: Archive) -> Self {
        Self {
            preview: PreviewKind::for_type(&archive.media_type),
            archive,
        }
    }
}

/// Outcome of persisting a received folder.
#[derive(Debug, Default)]
pub struct FolderReceipt {
    /// Names stored, in folder order
    pub stored: Vec<String>,
    /// Names that failed, with the reason (usually a duplicate)
    pub rejected: Vec<(String, StoreError)>,
}

impl FolderReceipt {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Names rejected because a record with that name already existed.
    pub fn duplicates(&self) -> impl Iterator<Item = &str> {
        self.rejected.iter().filter_map(|(name, e)| match e {
            StoreError::Constraint { .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Async facade over the shared archive store.
#[derive(Clone)]
pub struct History {
    store: Arc<ArchiveStore>,
}

impl History {
    pub fn new(store: Arc<ArchiveStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ArchiveStore> {
        &self.store
    }

    /// Persist every archive of a received folder into `files`.
    ///
    /// A failing archive is recorded in the receipt and does not stop
    /// the rest.
    pub async fn receive_folder(&self, folder: Folder) -> Result<FolderReceipt, StoreError> {
        let store = self.store.clone();
        let from = folder.from.clone();

        let receipt = tokio::task::spawn_blocking(move || {
            let mut receipt = FolderReceipt::default();
            for (name, archive) in folder.files {
                match store.put(StoreName::Files, &archive) {
                    Ok(()) => receipt.stored.push(name),
                    Err(e) => {
                        log::warn!("Not storing {name}: {e}");
                        receipt.rejected.push((name, e));
                    }
                }
            }
            receipt
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?;

        log::info!(
            "Folder from {from}: {} stored, {} rejected",
            receipt.stored.len(),
            receipt.rejected.len()
        );
        Ok(receipt)
    }

    /// Persist a single archive into `store`.
    pub async fn record(&self, store: StoreName, archive: Archive) -> Result<(), StoreError> {
        let db = self.store.clone();
        tokio::task::spawn_blocking(move || db.put(store, &archive))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Every stored file in key order, with its preview kind.
    pub async fn replay(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        self.replay_store(StoreName::Files).await
    }

    pub async fn replay_store(&self, store: StoreName) -> Result<Vec<HistoryEntry>, StoreError> {
        let db = self.store.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<HistoryEntry>, StoreError> {
            db.iter(store)?
                .map(|archive| archive.map(HistoryEntry::from))
                .collect()
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreConfig;

    fn archive(name: &str, media_type: &str, body: &str) -> Archive {
        Archive {
            body: body.to_string(),
            media_type: media_type.to_string(),
            name: name.to_string(),
            size: body.len() as u64,
        }
    }

    fn history(dir: &tempfile::TempDir) -> History {
        let store =
            ArchiveStore::open_initialized(StoreConfig::for_testing(dir.path().join("dss"))).unwrap();
        History::new(Arc::new(store))
    }

    #[test]
    fn test_preview_kind_dispatch() {
        assert_eq!(PreviewKind::for_type("application/pdf"), PreviewKind::Download);
        assert_eq!(PreviewKind::for_type("application/x-msdownload"), PreviewKind::Download);
        assert_eq!(PreviewKind::for_type("video/mp4"), PreviewKind::Video);
        assert_eq!(PreviewKind::for_type("video/webm"), PreviewKind::Video);
        assert_eq!(PreviewKind::for_type("audio/mpeg"), PreviewKind::Audio);
        assert_eq!(PreviewKind::for_type("image/png"), PreviewKind::Image);
        assert_eq!(PreviewKind::for_type("IMAGE/JPEG"), PreviewKind::Image);
        assert_eq!(PreviewKind::for_type("text/plain; charset=utf-8"), PreviewKind::Text);
        assert_eq!(PreviewKind::for_type("application/json"), PreviewKind::Text);
        assert_eq!(PreviewKind::for_type(""), PreviewKind::Text);
    }

    #[tokio::test]
    async fn test_receive_folder_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        let mut folder = Folder::new("A", "abc".into(), "xyz".into());
        folder.insert(archive("notes.txt", "text/plain", "hello"));
        folder.insert(archive("dot.png", "image/png", "data:image/png;base64,AA=="));

        let receipt = history.receive_folder(folder).await.unwrap();
        assert!(receipt.is_complete());
        assert_eq!(receipt.stored, vec!["dot.png", "notes.txt"]);

        let entries = history.replay().await.unwrap();
        let kinds: Vec<(&str, PreviewKind)> = entries
            .iter()
            .map(|e| (e.archive.name.as_str(), e.preview))
            .collect();
        assert_eq!(
            kinds,
            vec![("dot.png", PreviewKind::Image), ("notes.txt", PreviewKind::Text)]
        );
    }

    #[tokio::test]
    async fn test_duplicate_in_second_folder_does_not_abort_rest() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        let mut first = Folder::new("A", "abc".into(), "xyz".into());
        first.insert(archive("a.txt", "text/plain", "original"));
        history.receive_folder(first).await.unwrap();

        let mut second = Folder::new("A", "abc".into(), "xyz".into());
        second.insert(archive("a.txt", "text/plain", "replacement"));
        second.insert(archive("b.txt", "text/plain", "new"));

        let receipt = history.receive_folder(second).await.unwrap();
        assert!(!receipt.is_complete());
        assert_eq!(receipt.stored, vec!["b.txt"]);
        assert_eq!(receipt.duplicates().collect::<Vec<_>>(), vec!["a.txt"]);

        let entries = history.replay().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].archive.body, "original");
    }

    #[tokio::test]
    async fn test_record_into_messages_store() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        history
            .record(StoreName::Messages, archive("m1", "text/plain", "hi"))
            .await
            .unwrap();

        assert!(history.replay().await.unwrap().is_empty());
        let messages = history.replay_store(StoreName::Messages).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].archive.body, "hi");
    }

    #[tokio::test]
    async fn test_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);
        assert!(history.replay().await.unwrap().is_empty());
    }
}
