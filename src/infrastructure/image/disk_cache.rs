//! Disk-based image store for persistence across sessions.
//!
//! Each entry is one `<digest>.img` file: a 4-byte magic, the write time as
//! big-endian milliseconds since the epoch, then the raw payload.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace, warn};

use crate::domain::entities::{CacheKey, PersistedEntry};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::PersistentStorePort;

use super::unavailable_store::UnavailableStore;

/// Default retention horizon (7 days).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

const ENTRY_MAGIC: &[u8; 4] = b"IMC1";
const HEADER_LEN: usize = 12;
const ENTRY_EXTENSION: &str = "img";

/// Disk-backed persistent store of raw image bytes.
#[derive(Debug)]
pub struct DiskImageCache {
    cache_dir: PathBuf,
    retention: chrono::Duration,
}

impl DiskImageCache {
    /// Opens (creating if needed) a store in `cache_dir` and sweeps expired entries.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the directory cannot be created or written.
    pub async fn open(cache_dir: PathBuf, retention: Duration) -> StoreResult<Self> {
        fs::create_dir_all(&cache_dir).await.map_err(|e| {
            StoreError::unavailable(format!(
                "failed to create cache dir {}: {e}",
                cache_dir.display()
            ))
        })?;

        probe_writable(&cache_dir).await?;

        let cache = Self {
            cache_dir,
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        };

        match cache.sweep_expired().await {
            Ok(removed) if removed > 0 => debug!(removed, "Swept expired entries on open"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Initial sweep failed"),
        }

        Ok(cache)
    }

    /// Opens a store in the default location (`<cache dir>/imgcache/images`).
    ///
    /// # Errors
    /// Returns error if the directory cannot be determined, created, or written.
    pub async fn default_location(retention: Duration) -> StoreResult<Self> {
        let cache_dir = default_cache_dir()
            .ok_or_else(|| StoreError::unavailable("no cache directory for this platform"))?;
        Self::open(cache_dir, retention).await
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{ENTRY_EXTENSION}", key.digest()))
    }

    /// Reads an entry regardless of its age.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or decoded.
    pub async fn read_entry(&self, key: &CacheKey) -> StoreResult<Option<PersistedEntry>> {
        let path = self.entry_path(key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(format!("failed to read {}: {e}", path.display()))),
        };
        decode_entry(key.clone(), Bytes::from(data)).map(Some)
    }

    /// Writes an entry atomically (temp file + rename).
    ///
    /// # Errors
    /// Returns error if the file cannot be created, written, or persisted.
    pub async fn write_entry(&self, entry: &PersistedEntry) -> StoreResult<()> {
        let path = self.entry_path(&entry.key);
        let dir = self.cache_dir.clone();
        let header = encode_header(entry.stored_at);
        let payload = entry.payload.clone();
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = tempfile::NamedTempFile::new_in(&dir)?;
            file.write_all(&header)?;
            file.write_all(&payload)?;
            file.flush()?;
            file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::io(format!("write task panicked: {e}")))?
        .map_err(|e| StoreError::io(format!("failed to write {}: {e}", path.display())))?;

        debug!(key = %entry.key, path = %path.display(), size = entry.payload.len(), "Stored image on disk");
        Ok(())
    }

    /// Removes an entry.
    pub async fn evict(&self, key: &CacheKey) {
        let path = self.entry_path(key);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to evict from disk store");
            }
        } else {
            debug!(key = %key, "Evicted from disk store");
        }
    }

    /// Checks if an entry file exists (expired or not).
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.entry_path(key)).await.unwrap_or(false)
    }

    /// Returns the number of entry files.
    pub async fn len(&self) -> usize {
        self.entry_files().await.map_or(0, |files| files.len())
    }

    /// Returns true if the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn entry_files(&self) -> StoreResult<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| StoreError::io(format!("failed to read cache dir: {e}")))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(format!("failed to read entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    async fn sweep_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let mut removed = 0usize;

        for path in self.entry_files().await? {
            let expired = match read_stored_at(&path).await {
                Ok(stored_at) => now.signed_duration_since(stored_at) > self.retention,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Dropping unreadable store entry");
                    true
                }
            };

            if !expired {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    trace!(path = %path.display(), "Removed expired store entry");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove expired entry"),
            }
        }

        Ok(removed)
    }
}

#[async_trait]
impl PersistentStorePort for DiskImageCache {
    fn is_available(&self) -> bool {
        true
    }

    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        match self.read_entry(key).await {
            Ok(Some(entry)) if entry.is_expired(self.retention, Utc::now()) => {
                trace!(key = %key, "Disk store entry expired");
                self.evict(key).await;
                None
            }
            Ok(Some(entry)) => {
                trace!(key = %key, "Disk store hit");
                Some(entry.payload)
            }
            Ok(None) => {
                trace!(key = %key, "Disk store miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable disk store entry");
                self.evict(key).await;
                None
            }
        }
    }

    async fn put(&self, entry: PersistedEntry) -> StoreResult<()> {
        self.write_entry(&entry).await
    }

    async fn sweep(&self) -> StoreResult<usize> {
        let removed = self.sweep_expired().await?;
        debug!(removed, "Disk store sweep complete");
        Ok(removed)
    }

    async fn clear(&self) -> StoreResult<()> {
        for path in self.entry_files().await? {
            if fs::remove_file(&path).await.is_err() {
                warn!(path = %path.display(), "Failed to remove store file");
            }
        }
        debug!("Cleared disk store");
        Ok(())
    }
}

/// Opens the disk store, degrading to [`UnavailableStore`] when that fails.
///
/// `cache_dir` overrides the platform default location.
pub async fn open_persistent_store(
    cache_dir: Option<PathBuf>,
    retention: Duration,
) -> Arc<dyn PersistentStorePort> {
    let opened = match cache_dir.or_else(default_cache_dir) {
        Some(dir) => DiskImageCache::open(dir, retention).await,
        None => Err(StoreError::unavailable("no cache directory for this platform")),
    };

    match opened {
        Ok(store) => {
            debug!(path = %store.cache_dir().display(), "Persistent store ready");
            Arc::new(store)
        }
        Err(e) => {
            warn!(kind = %e.kind(), error = %e, "Persistent store unavailable, caching in memory only");
            Arc::new(UnavailableStore::new(e.to_string()))
        }
    }
}

async fn probe_writable(dir: &Path) -> StoreResult<()> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || tempfile::tempfile_in(&dir).map(drop))
        .await
        .map_err(|e| StoreError::unavailable(format!("probe task panicked: {e}")))?
        .map_err(|e| StoreError::unavailable(format!("cache dir is not writable: {e}")))
}

async fn read_stored_at(path: &Path) -> StoreResult<DateTime<Utc>> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| StoreError::io(format!("failed to open {}: {e}", path.display())))?;
    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .await
        .map_err(|e| StoreError::corrupted(format!("short header in {}: {e}", path.display())))?;
    decode_header(&header)
}

fn encode_header(stored_at: DateTime<Utc>) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(ENTRY_MAGIC);
    header[4..].copy_from_slice(&stored_at.timestamp_millis().to_be_bytes());
    header
}

fn decode_header(header: &[u8]) -> StoreResult<DateTime<Utc>> {
    if header.len() < HEADER_LEN || &header[..4] != ENTRY_MAGIC {
        return Err(StoreError::corrupted("missing entry header"));
    }
    let mut millis = [0u8; 8];
    millis.copy_from_slice(&header[4..HEADER_LEN]);
    DateTime::from_timestamp_millis(i64::from_be_bytes(millis))
        .ok_or_else(|| StoreError::corrupted("timestamp out of range"))
}

fn decode_entry(key: CacheKey, data: Bytes) -> StoreResult<PersistedEntry> {
    let stored_at = decode_header(&data)?;
    Ok(PersistedEntry {
        key,
        payload: data.slice(HEADER_LEN..),
        stored_at,
    })
}

/// Returns the default cache directory path.
fn default_cache_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "linuxmobile", "imgcache")
        .map(|dirs| dirs.cache_dir().join("images"))
}
