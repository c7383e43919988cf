//! RocksDB-backed archive store.
//!
//! Column families:
//! - `messages`: archives keyed by `name`
//! - `files`: archives keyed by `name`
//!
//! Values are bincode-encoded [`Archive`]s, LZ4 compressed (data URI
//! bodies are base64 and shrink well). Keys are the raw UTF-8 name, so
//! iteration follows RocksDB's bytewise ascending order.
//!
//! Opening never creates column families; [`ArchiveStore::ensure_schema`]
//! does that explicitly and is safe to call on every startup.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode, IteratorMode,
    Options, SingleThreaded, WriteOptions, DEFAULT_COLUMN_FAMILY_NAME,
};
use thiserror::Error;

use crate::protocol::Archive;

/// The two object stores inside the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreName {
    Messages,
    Files,
}

impl StoreName {
    pub const ALL: [StoreName; 2] = [StoreName::Messages, StoreName::Files];

    pub fn as_str(self) -> &'static str {
        match self {
            StoreName::Messages => "messages",
            StoreName::Files => "files",
        }
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dss"),
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small buffers, synced writes).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_writes: true,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024, // 1MB
        }
    }
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record {name:?} already exists in {store}")]
    Constraint { store: StoreName, name: String },

    #[error("Store {0} not initialized")]
    MissingSchema(StoreName),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Durable, add-only archive store.
pub struct ArchiveStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serialises the exists-check + insert in `put`
    write_lock: Mutex<()>,
}

impl ArchiveStore {
    /// Open (or create) the database with whatever column families it
    /// already has.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        // A database that does not exist yet only has the default family
        let existing = if config.path.join("CURRENT").exists() {
            DBWithThreadMode::<SingleThreaded>::list_cf(&db_opts, &config.path)?
        } else {
            vec![DEFAULT_COLUMN_FAMILY_NAME.to_string()]
        };

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = existing
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    /// Open and make sure both stores exist.
    pub fn open_initialized(config: StoreConfig) -> Result<Self, StoreError> {
        let mut store = Self::open(config)?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create any missing store. Returns whether anything was created.
    pub fn ensure_schema(&mut self) -> Result<bool, StoreError> {
        let mut created = false;
        for store in StoreName::ALL {
            if self.db.cf_handle(store.as_str()).is_none() {
                let opts = Self::cf_options(&self.config);
                self.db.create_cf(store.as_str(), &opts)?;
                log::info!("Created store {store} in {}", self.config.path.display());
                created = true;
            }
        }
        Ok(created)
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();
        // Values are already LZ4 compressed
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts
    }

    /// Insert an archive keyed by its name.
    ///
    /// Fails with [`StoreError::Constraint`] if the name is taken; the
    /// stored record is left untouched.
    pub fn put(&self, store: StoreName, archive: &Archive) -> Result<(), StoreError> {
        let cf = self.cf(store)?;
        let value = encode_record(archive)?;
        let key = archive.name.as_bytes();

        let _guard = self.write_lock.lock();
        if self.db.get_pinned_cf(cf, key)?.is_some() {
            return Err(StoreError::Constraint {
                store,
                name: archive.name.clone(),
            });
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.put_cf_opt(cf, key, value, &write_opts)?;

        log::debug!("Stored {} in {store} ({} bytes reported)", archive.name, archive.size);
        Ok(())
    }

    /// Look up one archive by name.
    pub fn get(&self, store: StoreName, name: &str) -> Result<Option<Archive>, StoreError> {
        let cf = self.cf(store)?;
        match self.db.get_pinned_cf(cf, name.as_bytes())? {
            Some(value) => decode_record(&value).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, store: StoreName, name: &str) -> Result<bool, StoreError> {
        let cf = self.cf(store)?;
        Ok(self.db.get_pinned_cf(cf, name.as_bytes())?.is_some())
    }

    /// Lazily iterate a store in ascending key order.
    ///
    /// Each call opens a fresh cursor over a consistent view; concurrent
    /// writes are neither blocked nor observed.
    pub fn iter(
        &self,
        store: StoreName,
    ) -> Result<impl Iterator<Item = Result<Archive, StoreError>> + '_, StoreError> {
        let cf = self.cf(store)?;
        Ok(self
            .db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item?;
                decode_record(&value)
            }))
    }

    /// Number of records in a store (walks the store).
    pub fn count(&self, store: StoreName) -> Result<usize, StoreError> {
        let cf = self.cf(store)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, store: StoreName) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(store.as_str())
            .ok_or(StoreError::MissingSchema(store))
    }
}

fn encode_record(archive: &Archive) -> Result<Vec<u8>, StoreError> {
    let bytes = bincode::serde::encode_to_vec(archive, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

fn decode_record(value: &[u8]) -> Result<Archive, StoreError> {
    let bytes = lz4_flex::decompress_size_prepended(value)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    let (archive, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(archive)
}
