//! File ingestion: raw file handles → transportable [`Archive`]s.
//!
//! The declared media type picks the body encoding:
//!
//! | Media type                                       | Body                       |
//! |--------------------------------------------------|----------------------------|
//! | `image/*`, `video/*`, `audio/*`                  | `data:<type>;base64,…`     |
//! | `application/pdf`, Windows executables           | `data:<type>;base64,…`     |
//! | `text/plain`                                     | decoded UTF-8 text         |
//! | anything else                                    | text if valid UTF-8, else data URI |
//!
//! Content is read in chunks; after each chunk the caller's progress
//! callback gets `floor(loaded / size * 100)`, clamped to 100.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::try_join_all;
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::Archive;

const READ_CHUNK: usize = 64 * 1024;

/// Upper bound on the buffer reserved up front from the reported size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// How an archive body is produced from file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    /// Base64 data URI embedding the media type
    DataUri,
    /// Raw decoded text
    Text,
}

/// Ordered media type rules; the first match wins.
static RULES: LazyLock<Vec<(Regex, BodyEncoding)>> = LazyLock::new(|| {
    [
        (r"(?i)^(?:image|video|audio)/", BodyEncoding::DataUri),
        (
            r"(?i)^application/(?:pdf|x-msdownload|vnd\.microsoft\.portable-executable)$",
            BodyEncoding::DataUri,
        ),
        (r"(?i)^text/plain(?:;|$)", BodyEncoding::Text),
    ]
    .into_iter()
    .map(|(pattern, encoding)| (Regex::new(pattern).expect("static media rule"), encoding))
    .collect()
});

/// Encoding rule for a declared media type, if any rule matches.
pub fn classify(media_type: &str) -> Option<BodyEncoding> {
    RULES
        .iter()
        .find(|(rule, _)| rule.is_match(media_type.trim()))
        .map(|(_, encoding)| *encoding)
}

/// Ingestion failures. No partial archive is ever produced.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// A readable file with the metadata its source declared.
pub struct FileHandle<R> {
    pub name: String,
    pub media_type: String,
    /// Size reported by the source; drives progress and `Archive::size`
    pub size: u64,
    reader: R,
}

impl<R> FileHandle<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, size: u64, reader: R) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size,
            reader,
        }
    }
}

impl<'a> FileHandle<&'a [u8]> {
    /// In-memory file; size is the slice length.
    pub fn from_bytes(name: impl Into<String>, media_type: impl Into<String>, bytes: &'a [u8]) -> Self {
        Self::new(name, media_type, bytes.len() as u64, bytes)
    }
}

impl FileHandle<tokio::fs::File> {
    /// Open a file on disk. The name is the path's final component.
    pub async fn open(path: impl AsRef<Path>, media_type: impl Into<String>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let open_err = |source| IngestError::Open {
            path: path.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::open(path).await.map_err(open_err)?;
        let size = file.metadata().await.map_err(open_err)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self::new(name, media_type, size, file))
    }
}

/// Progress percentage for `loaded` of `total` bytes.
fn progress_percent(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    Some((loaded.saturating_mul(100) / total).min(100) as u8)
}

/// Read a file handle into an archive.
pub async fn ingest<R>(handle: FileHandle<R>) -> Result<Archive, IngestError>
where
    R: AsyncRead + Unpin,
{
    ingest_with_progress(handle, |_| {}).await
}

/// Read a file handle into an archive, reporting progress as it goes.
///
/// Reports are non-decreasing and within `[0, 100]`; the last one is not
/// guaranteed to be exactly 100 (e.g. when the source under-reported).
pub async fn ingest_with_progress<R, P>(
    mut handle: FileHandle<R>,
    mut on_progress: P,
) -> Result<Archive, IngestError>
where
    R: AsyncRead + Unpin,
    P: FnMut(u8),
{
    let mut content = Vec::with_capacity(handle.size.min(MAX_PREALLOC) as usize);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut last_reported = 0u8;

    loop {
        let n = handle
            .reader
            .read(&mut chunk)
            .await
            .map_err(|source| IngestError::Read {
                name: handle.name.clone(),
                source,
            })?;
        if n == 0 {
            break;
        }
        content.extend_from_slice(&chunk[..n]);

        if let Some(pct) = progress_percent(content.len() as u64, handle.size) {
            last_reported = last_reported.max(pct);
            on_progress(last_reported);
        }
    }

    let body = encode_body(&handle.media_type, content);
    log::debug!(
        "Ingested {} ({}, {} bytes reported)",
        handle.name,
        handle.media_type,
        handle.size
    );

    Ok(Archive {
        body,
        media_type: handle.media_type,
        name: handle.name,
        size: handle.size,
    })
}

/// Ingest several files concurrently into a folder's `files` map.
///
/// `on_progress` receives the file name with each report. The first
/// failure fails the whole batch.
pub async fn ingest_all<R, P>(
    handles: Vec<FileHandle<R>>,
    on_progress: P,
) -> Result<BTreeMap<String, Archive>, IngestError>
where
    R: AsyncRead + Unpin,
    P: Fn(&str, u8),
{
    let on_progress = &on_progress;
    let archives = try_join_all(handles.into_iter().map(|handle| async move {
        let name = handle.name.clone();
        ingest_with_progress(handle, |pct| on_progress(&name, pct)).await
    }))
    .await?;

    Ok(archives
        .into_iter()
        .map(|archive| (archive.name.clone(), archive))
        .collect())
}

fn encode_body(media_type: &str, content: Vec<u8>) -> String {
    match classify(media_type) {
        Some(BodyEncoding::DataUri) => data_uri(media_type, &content),
        Some(BodyEncoding::Text) => decode_text(&content),
        None if std::str::from_utf8(&content).is_ok() => decode_text(&content),
        None => data_uri(media_type, &content),
    }
}

fn decode_text(content: &[u8]) -> String {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    String::from_utf8_lossy(content).into_owned()
}

/// Build a base64 `data:` URI.
pub fn data_uri(media_type: &str, content: &[u8]) -> String {
    let media_type = match media_type.trim() {
        "" => FALLBACK_MEDIA_TYPE,
        declared => declared,
    };
    format!("data:{media_type};base64,{}", STANDARD.encode(content))
}

/// Split a base64 `data:` URI back into media type and content.
pub fn decode_data_uri(body: &str) -> Option<(String, Vec<u8>)> {
    let rest = body.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    let content = STANDARD.decode(payload).ok()?;
    Some((media_type.to_string(), content))
}
