//! Domain types for loaded images and their cache state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CacheKey;
use crate::domain::errors::LoadErrorKind;

/// Locally usable image resource held by the memory tier.
///
/// Releasing a handle marks it revoked; the memory cache releases handles it
/// evicts or clears, and holders should re-request the image afterwards.
pub struct ImageHandle {
    key: CacheKey,
    bytes: Bytes,
    content_type: Option<String>,
    dimensions: Option<(u32, u32)>,
    released: AtomicBool,
}

impl ImageHandle {
    /// Creates a handle over raw image bytes.
    #[must_use]
    pub fn new(key: CacheKey, bytes: Bytes, content_type: Option<String>) -> Self {
        Self {
            key,
            bytes,
            content_type,
            dimensions: None,
            released: AtomicBool::new(false),
        }
    }

    /// Sets the decoded dimensions.
    #[must_use]
    pub const fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }

    /// Key this handle was loaded for.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Raw image bytes.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Declared or sniffed media type.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Width and height, if the image could be probed.
    #[must_use]
    pub const fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Revokes the handle.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    /// Returns true once the owning cache has let go of this handle.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageHandle")
            .field("key", &self.key)
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .field("dimensions", &self.dimensions)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Loaded from the in-memory LRU cache.
    MemoryCache,
    /// Loaded from the persistent store.
    PersistentStore,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::PersistentStore => write!(f, "store"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A successfully loaded image.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Key the image was loaded for.
    pub key: CacheKey,
    /// Shared handle to the image data.
    pub handle: Arc<ImageHandle>,
    /// Tier that satisfied the load.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Creates a loaded image record.
    #[must_use]
    pub const fn new(key: CacheKey, handle: Arc<ImageHandle>, source: ImageSource) -> Self {
        Self {
            key,
            handle,
            source,
        }
    }
}

/// Terminal failure bookkeeping for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Attempts made in the failed sequence.
    pub attempt_count: u32,
    /// When the last attempt finished.
    pub last_attempt_at: DateTime<Utc>,
    /// Classification of the last error.
    pub last_error_kind: LoadErrorKind,
}

/// Load state of a key as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadStatus {
    /// Nothing known about the key.
    #[default]
    Idle,
    /// An attempt sequence is running.
    Loading,
    /// The image is resident in memory.
    Succeeded,
    /// The last sequence failed; a manual retry is possible.
    Failed(FailureRecord),
}

impl LoadStatus {
    /// Returns true if the image is ready.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if a load is in progress.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true if the last load failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Durable blob record owned by the persistent store.
#[derive(Debug, Clone)]
pub struct PersistedEntry {
    /// Key of the entry.
    pub key: CacheKey,
    /// Raw image bytes.
    pub payload: Bytes,
    /// Write time, compared against the retention horizon.
    pub stored_at: DateTime<Utc>,
}

impl PersistedEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(key: CacheKey, payload: Bytes) -> Self {
        Self {
            key,
            payload,
            stored_at: Utc::now(),
        }
    }

    /// Overrides the write time.
    #[must_use]
    pub const fn stored_at(mut self, stored_at: DateTime<Utc>) -> Self {
        self.stored_at = stored_at;
        self
    }

    /// Returns true if the entry is older than `retention` at `now`.
    #[must_use]
    pub fn is_expired(&self, retention: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.stored_at) > retention
    }
}
