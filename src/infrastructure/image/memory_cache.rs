//! In-memory LRU image cache implementation.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, ImageHandle};

/// Default maximum number of images to cache in memory.
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// Bounded LRU cache of image handles.
///
/// Handles are released when evicted, replaced, or cleared. Never held across
/// an await point, so a plain mutex suffices.
pub struct MemoryImageCache {
    cache: Mutex<LruCache<CacheKey, Arc<ImageHandle>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the specified capacity (at least one entry).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }

    /// Returns the handle for `key`, promoting it to most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ImageHandle>> {
        let mut cache = self.cache.lock();
        if let Some(handle) = cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(Arc::clone(handle))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Peeks at a handle without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<ImageHandle>> {
        self.cache.lock().peek(key).cloned()
    }

    /// Returns true if `key` is resident, without promoting it.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.lock().contains(key)
    }

    /// Inserts a handle, evicting and releasing the least recently used one when full.
    pub fn put(&self, key: CacheKey, handle: Arc<ImageHandle>) {
        let mut cache = self.cache.lock();
        let replacing = cache.contains(&key);
        if let Some((old_key, old_handle)) = cache.push(key, Arc::clone(&handle)) {
            if !Arc::ptr_eq(&old_handle, &handle) {
                old_handle.release();
            }
            if replacing {
                debug!(key = %old_key, "Replaced image in memory cache");
            } else {
                debug!(key = %old_key, "Evicted least recently used image");
            }
        }
    }

    /// Removes and releases the handle for `key`.
    pub fn evict(&self, key: &CacheKey) {
        if let Some(handle) = self.cache.lock().pop(key) {
            handle.release();
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    /// Releases every handle and empties the cache.
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        for (_, handle) in cache.iter() {
            handle.release();
        }
        cache.clear();
        debug!("Cleared memory image cache");
    }

    /// Returns the number of resident images.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> MemoryCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        MemoryCacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Statistics about memory cache performance.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryCacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
}

impl std::fmt::Display for MemoryCacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn handle(url: &str) -> (CacheKey, Arc<ImageHandle>) {
        let key = CacheKey::from_url(url);
        let handle = Arc::new(ImageHandle::new(
            key.clone(),
            Bytes::from_static(b"img"),
            Some("image/png".to_string()),
        ));
        (key, handle)
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = MemoryImageCache::new(10);
        let (key, img) = handle("https://example.com/1.png");

        cache.put(key.clone(), img);
        let retrieved = cache.get(&key);

        assert!(retrieved.is_some_and(|h| h.len() == 3));
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryImageCache::new(10);
        assert!(cache.get(&CacheKey::from_url("https://example.com/none.png")).is_none());
    }

    #[test]
    fn test_eviction_releases_least_recently_used() {
        let cache = MemoryImageCache::new(2);
        let (k1, h1) = handle("https://example.com/1.png");
        let (k2, h2) = handle("https://example.com/2.png");
        let (k3, h3) = handle("https://example.com/3.png");

        cache.put(k1.clone(), Arc::clone(&h1));
        cache.put(k2.clone(), Arc::clone(&h2));
        cache.put(k3.clone(), Arc::clone(&h3));

        assert!(cache.peek(&k1).is_none());
        assert!(h1.is_released());
        assert!(!h2.is_released());
        assert!(!h3.is_released());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = MemoryImageCache::new(2);
        let (k1, h1) = handle("https://example.com/1.png");
        let (k2, h2) = handle("https://example.com/2.png");
        let (k3, h3) = handle("https://example.com/3.png");

        cache.put(k1.clone(), h1);
        cache.put(k2.clone(), Arc::clone(&h2));
        assert!(cache.get(&k1).is_some());
        cache.put(k3.clone(), h3);

        assert!(cache.contains(&k1));
        assert!(!cache.contains(&k2));
        assert!(h2.is_released());
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryImageCache::new(2);
        let (k1, h1) = handle("https://example.com/1.png");
        let (k2, h2) = handle("https://example.com/2.png");
        let (k3, h3) = handle("https://example.com/3.png");

        cache.put(k1.clone(), h1);
        cache.put(k2, h2);
        let _ = cache.peek(&k1);
        cache.put(k3, h3);

        assert!(cache.peek(&k1).is_none());
    }

    #[test]
    fn test_replacing_same_handle_keeps_it_live() {
        let cache = MemoryImageCache::new(2);
        let (key, img) = handle("https://example.com/1.png");

        cache.put(key.clone(), Arc::clone(&img));
        cache.put(key.clone(), Arc::clone(&img));

        assert!(!img.is_released());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_releases_all() {
        let cache = MemoryImageCache::new(4);
        let (k1, h1) = handle("https://example.com/1.png");
        let (k2, h2) = handle("https://example.com/2.png");
        cache.put(k1, Arc::clone(&h1));
        cache.put(k2, Arc::clone(&h2));

        cache.clear();

        assert!(cache.is_empty());
        assert!(h1.is_released());
        assert!(h2.is_released());
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::new(10);
        let (key, img) = handle("https://example.com/1.png");
        cache.put(key.clone(), img);

        let _ = cache.get(&key);
        let _ = cache.get(&CacheKey::from_url("https://example.com/missing.png"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }
}
