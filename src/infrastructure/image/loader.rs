//! Async image loading orchestrator.
//!
//! Implements a three-tier lookup: Memory -> Persistent store -> Network, with
//! per-key request deduplication and exponential-backoff retries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::Shared;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{
    CacheKey, FailureRecord, ImageHandle, ImageSource, LoadStatus, LoadedImage, PersistedEntry,
};
use crate::domain::errors::{FetchError, LoadError, LoadErrorKind};
use crate::domain::ports::{FetchResponse, ImageFetcherPort, PersistentStorePort};
use crate::domain::services::RetryPolicy;

use super::disk_cache::open_persistent_store;
use super::http_fetcher::HttpImageFetcher;
use super::memory_cache::{MemoryCacheStats, MemoryImageCache};

/// Configuration for the image loader and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageLoaderConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Backoff base delay in milliseconds.
    pub base_retry_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Per-attempt network timeout in milliseconds.
    pub load_timeout_ms: u64,
    /// Distance from the viewport at which lazy loads trigger.
    pub viewport_margin_px: u32,
    /// Minimum visible fraction of an element (within the margin) that triggers a load.
    pub viewport_threshold: f64,
    /// URLs per prefetch batch.
    pub prefetch_batch_size: usize,
    /// Pause between prefetch batches in milliseconds.
    pub prefetch_batch_delay_ms: u64,
    /// Maximum images in memory cache.
    pub memory_cache_capacity: usize,
    /// Persistent store retention horizon in milliseconds.
    pub persistent_retention_ms: u64,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 10_000,
            load_timeout_ms: 20_000,
            viewport_margin_px: 200,
            viewport_threshold: 0.01,
            prefetch_batch_size: 3,
            prefetch_batch_delay_ms: 100,
            memory_cache_capacity: 50,
            persistent_retention_ms: 7 * 24 * 3600 * 1000,
        }
    }
}

impl ImageLoaderConfig {
    /// Returns the retry policy described by this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_retry_delay_ms),
            Duration::from_millis(self.max_retry_delay_ms),
        )
    }

    /// Per-attempt network timeout.
    #[must_use]
    pub const fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Pause between prefetch batches.
    #[must_use]
    pub const fn prefetch_batch_delay(&self) -> Duration {
        Duration::from_millis(self.prefetch_batch_delay_ms)
    }

    /// Persistent store retention horizon.
    #[must_use]
    pub const fn persistent_retention(&self) -> Duration {
        Duration::from_millis(self.persistent_retention_ms)
    }

    /// Sets the number of retries after the first attempt.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the backoff base and ceiling in milliseconds.
    #[must_use]
    pub const fn with_retry_delays(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.base_retry_delay_ms = base_ms;
        self.max_retry_delay_ms = max_ms;
        self
    }

    /// Sets the per-attempt timeout in milliseconds.
    #[must_use]
    pub const fn with_load_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.load_timeout_ms = timeout_ms;
        self
    }

    /// Sets the memory cache capacity.
    #[must_use]
    pub const fn with_memory_cache_capacity(mut self, capacity: usize) -> Self {
        self.memory_cache_capacity = capacity;
        self
    }

    /// Sets the prefetch batch size and the pause between batches.
    #[must_use]
    pub const fn with_prefetch(mut self, batch_size: usize, batch_delay_ms: u64) -> Self {
        self.prefetch_batch_size = batch_size;
        self.prefetch_batch_delay_ms = batch_delay_ms;
        self
    }
}

/// Snapshot of loader state for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Images resident in memory.
    pub memory_count: usize,
    /// Keys with a running attempt sequence.
    pub in_flight_count: usize,
    /// Keys whose last sequence failed.
    pub failed_count: usize,
    /// Failed keys, sorted.
    pub failed_keys: Vec<String>,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in memory, {} loading, {} failed",
            self.memory_count, self.in_flight_count, self.failed_count
        )
    }
}

type LoadOutcome = Result<LoadedImage, LoadError>;
type SharedCompletion = Shared<oneshot::Receiver<LoadOutcome>>;

/// Pending completion shared by every caller of one key.
struct InFlightRequest {
    ticket: u64,
    completion: SharedCompletion,
}

enum Admission {
    Resolved(LoadedImage),
    Pending(SharedCompletion),
}

/// Orchestrates image loading from memory, persistent store, and network.
///
/// Cheap to clone; clones share caches and in-flight state.
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    config: ImageLoaderConfig,
    retry_policy: RetryPolicy,
    memory_cache: MemoryImageCache,
    store: Arc<dyn PersistentStorePort>,
    fetcher: Arc<dyn ImageFetcherPort>,
    in_flight: Mutex<HashMap<CacheKey, InFlightRequest>>,
    failures: Mutex<HashMap<CacheKey, FailureRecord>>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
    next_ticket: AtomicU64,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.inner.config)
            .field("persistent", &self.inner.store.is_available())
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader over the given store and fetcher.
    #[must_use]
    pub fn new(
        config: ImageLoaderConfig,
        store: Arc<dyn PersistentStorePort>,
        fetcher: Arc<dyn ImageFetcherPort>,
    ) -> Self {
        let inner = LoaderInner {
            retry_policy: config.retry_policy(),
            memory_cache: MemoryImageCache::new(config.memory_cache_capacity),
            store,
            fetcher,
            in_flight: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            pending_writes: Mutex::new(Vec::new()),
            next_ticket: AtomicU64::new(0),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Creates a loader with an HTTP fetcher and a disk store.
    ///
    /// The store lives in `cache_dir` (or the platform cache directory) and
    /// degrades to memory-only caching if it cannot be opened.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub async fn with_defaults(
        config: ImageLoaderConfig,
        cache_dir: Option<PathBuf>,
    ) -> Result<Self, FetchError> {
        let fetcher = Arc::new(HttpImageFetcher::new(config.load_timeout())?);
        let store = open_persistent_store(cache_dir, config.persistent_retention()).await;
        Ok(Self::new(config, store, fetcher))
    }

    /// Returns the loader configuration.
    #[must_use]
    pub fn config(&self) -> &ImageLoaderConfig {
        &self.inner.config
    }

    /// Returns true if the persistent tier is active.
    #[must_use]
    pub fn has_persistent_store(&self) -> bool {
        self.inner.store.is_available()
    }

    /// Loads an image, checking caches first.
    ///
    /// Concurrent calls for the same normalized URL share one attempt sequence
    /// and observe the same outcome. The sequence runs on its own task, so it
    /// settles even if every caller stops waiting.
    ///
    /// # Errors
    /// Returns the terminal error once retries are exhausted.
    pub async fn load(&self, url: &str) -> Result<LoadedImage, LoadError> {
        let key = CacheKey::from_url(url);
        match self.admit(&key) {
            Admission::Resolved(loaded) => Ok(loaded),
            Admission::Pending(completion) => completion
                .await
                .unwrap_or_else(|_| Err(LoadError::aborted(key.as_str()))),
        }
    }

    /// Forgets any failure and in-flight state for `url`, then loads it from scratch.
    ///
    /// # Errors
    /// Returns the terminal error once retries are exhausted.
    pub async fn retry(&self, url: &str) -> Result<LoadedImage, LoadError> {
        let key = CacheKey::from_url(url);
        self.inner.failures.lock().remove(&key);
        if self.inner.in_flight.lock().remove(&key).is_some() {
            debug!(key = %key, "Detached running load for manual retry");
        }
        info!(key = %key, "Manual retry requested");
        self.load(url).await
    }

    /// Returns the memory-resident handle for `url` without promoting it.
    #[must_use]
    pub fn peek(&self, url: &str) -> Option<Arc<ImageHandle>> {
        self.inner.memory_cache.peek(&CacheKey::from_url(url))
    }

    /// Returns the load state of `url`.
    #[must_use]
    pub fn status(&self, url: &str) -> LoadStatus {
        self.status_of(&CacheKey::from_url(url))
    }

    /// Returns the load state of `key`.
    #[must_use]
    pub fn status_of(&self, key: &CacheKey) -> LoadStatus {
        if self.inner.in_flight.lock().contains_key(key) {
            return LoadStatus::Loading;
        }
        if self.inner.memory_cache.contains(key) {
            return LoadStatus::Succeeded;
        }
        self.inner
            .failures
            .lock()
            .get(key)
            .cloned()
            .map_or(LoadStatus::Idle, LoadStatus::Failed)
    }

    /// Returns the number of running attempt sequences.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Returns a snapshot of cache and failure state.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        let mut failed_keys: Vec<String> = self
            .inner
            .failures
            .lock()
            .keys()
            .map(|key| key.as_str().to_string())
            .collect();
        failed_keys.sort();

        CacheStats {
            memory_count: self.inner.memory_cache.len(),
            in_flight_count: self.in_flight_count(),
            failed_count: failed_keys.len(),
            failed_keys,
        }
    }

    /// Returns memory cache hit/miss statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> MemoryCacheStats {
        self.inner.memory_cache.stats()
    }

    /// Clears both cache tiers and all failure records.
    ///
    /// Running loads are left alone and will repopulate the caches when they settle.
    pub async fn clear_cache(&self) {
        self.inner.memory_cache.clear();
        self.inner.failures.lock().clear();
        if let Err(e) = self.inner.store.clear().await {
            warn!(kind = %e.kind(), error = %e, "Failed to clear persistent store");
        }
        info!("Cleared all image caches");
    }

    /// Waits for background store writes started so far.
    pub async fn flush(&self) {
        let writes = std::mem::take(&mut *self.inner.pending_writes.lock());
        for write in writes {
            if let Err(e) = write.await {
                error!(error = %e, "Store write task panicked");
            }
        }
    }

    /// Removes persistent entries past the retention horizon.
    pub async fn sweep_store(&self) -> usize {
        match self.inner.store.sweep().await {
            Ok(removed) => {
                info!(removed, "Swept persistent store");
                removed
            }
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "Persistent store sweep failed");
                0
            }
        }
    }

    /// Joins a running sequence, serves from memory, or starts a new sequence.
    ///
    /// The in-flight check and insert happen under one lock acquisition.
    fn admit(&self, key: &CacheKey) -> Admission {
        let mut in_flight = self.inner.in_flight.lock();

        if let Some(request) = in_flight.get(key) {
            trace!(key = %key, "Joining in-flight load");
            return Admission::Pending(request.completion.clone());
        }

        if let Some(handle) = self.inner.memory_cache.get(key) {
            return Admission::Resolved(LoadedImage::new(
                key.clone(),
                handle,
                ImageSource::MemoryCache,
            ));
        }

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let completion = rx.shared();
        in_flight.insert(
            key.clone(),
            InFlightRequest {
                ticket,
                completion: completion.clone(),
            },
        );
        drop(in_flight);

        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        tokio::spawn(async move {
            let outcome = inner.resolve(&key, ticket).await;
            inner.finish(&key, ticket);
            let _ = tx.send(outcome);
        });

        Admission::Pending(completion)
    }
}

impl LoaderInner {
    /// Runs the store lookup and the network retry loop for one key.
    ///
    /// Shared state is only written while `ticket` still owns the key.
    async fn resolve(&self, key: &CacheKey, ticket: u64) -> LoadOutcome {
        if let Some(payload) = self.store.get(key).await {
            let handle = materialize(key.clone(), payload, None).await;
            let handle = self.publish(key, ticket, handle);
            debug!(key = %key, source = %ImageSource::PersistentStore, "Image loaded");
            return Ok(LoadedImage::new(
                key.clone(),
                handle,
                ImageSource::PersistentStore,
            ));
        }

        let mut attempt: u32 = 0;
        loop {
            match self.fetch_once(key).await {
                Ok(response) => return Ok(self.complete(key, ticket, response).await),
                Err(e) if self.retry_policy.should_retry(attempt) => {
                    let delay = self.retry_policy.delay_for(attempt);
                    warn!(
                        key = %key,
                        attempt = attempt + 1,
                        kind = %e.kind(),
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Image fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    let attempts = attempt + 1;
                    let in_flight = self.in_flight.lock();
                    if owns(&in_flight, key, ticket) {
                        self.failures.lock().insert(
                            key.clone(),
                            FailureRecord {
                                attempt_count: attempts,
                                last_attempt_at: Utc::now(),
                                last_error_kind: e.kind(),
                            },
                        );
                    }
                    drop(in_flight);
                    error!(key = %key, attempts, kind = %e.kind(), error = %e, "Image load failed");
                    return Err(LoadError::exhausted(key.as_str(), attempts, e));
                }
            }
        }
    }

    /// One bounded network attempt, validated for status and media type.
    async fn fetch_once(&self, key: &CacheKey) -> Result<FetchResponse, FetchError> {
        let timeout = self.config.load_timeout();
        trace!(key = %key, "Downloading image from network");

        let response = tokio::time::timeout(timeout, self.fetcher.fetch(key.as_str()))
            .await
            .map_err(|_| FetchError::timeout(timeout))??;

        if !response.is_success() {
            return Err(FetchError::bad_status(response.status));
        }
        if !response.declares_image() {
            return Err(FetchError::invalid_content_type(
                response.content_type.as_deref(),
            ));
        }
        Ok(response)
    }

    /// Writes a fetched image back to both tiers.
    async fn complete(&self, key: &CacheKey, ticket: u64, response: FetchResponse) -> LoadedImage {
        let FetchResponse {
            content_type, body, ..
        } = response;

        let store = Arc::clone(&self.store);
        let entry = PersistedEntry::new(key.clone(), body.clone());
        let write = tokio::spawn(async move {
            let key = entry.key.clone();
            if let Err(e) = store.put(entry).await {
                warn!(key = %key, kind = %e.kind(), error = %e, "Failed to persist image");
            }
        });
        {
            let mut writes = self.pending_writes.lock();
            writes.retain(|handle| !handle.is_finished());
            writes.push(write);
        }

        let handle = materialize(key.clone(), body, content_type).await;
        let handle = self.publish(key, ticket, handle);

        debug!(key = %key, source = %ImageSource::Network, size = handle.len(), "Image loaded");
        LoadedImage::new(key.clone(), handle, ImageSource::Network)
    }

    /// Makes `handle` resident and clears the failure record for `key`.
    ///
    /// A sequence detached by a manual retry leaves memory alone and hands
    /// out the resident handle instead, so the retry's handle stays live.
    fn publish(&self, key: &CacheKey, ticket: u64, handle: Arc<ImageHandle>) -> Arc<ImageHandle> {
        let in_flight = self.in_flight.lock();
        if owns(&in_flight, key, ticket) {
            self.memory_cache.put(key.clone(), Arc::clone(&handle));
            self.failures.lock().remove(key);
            return handle;
        }
        drop(in_flight);

        trace!(key = %key, "Detached load settled");
        self.memory_cache.peek(key).unwrap_or(handle)
    }

    /// Drops the in-flight entry, unless a manual retry already replaced it.
    fn finish(&self, key: &CacheKey, ticket: u64) {
        let mut in_flight = self.in_flight.lock();
        if owns(&in_flight, key, ticket) {
            in_flight.remove(key);
        }
    }
}

fn owns(in_flight: &HashMap<CacheKey, InFlightRequest>, key: &CacheKey, ticket: u64) -> bool {
    in_flight
        .get(key)
        .is_some_and(|request| request.ticket == ticket)
}

/// Builds a handle, probing format and dimensions off the async runtime.
///
/// Probe failures are logged and yield a handle without dimensions.
async fn materialize(key: CacheKey, body: Bytes, content_type: Option<String>) -> Arc<ImageHandle> {
    let probe_body = body.clone();
    let probed = tokio::task::spawn_blocking(move || probe_image(&probe_body)).await;

    match probed {
        Ok(Ok((format, width, height))) => {
            let content_type = content_type.or_else(|| Some(format.to_mime_type().to_string()));
            Arc::new(ImageHandle::new(key, body, content_type).with_dimensions(width, height))
        }
        Ok(Err(e)) => {
            warn!(key = %key, kind = %LoadErrorKind::DecodeFailure, error = %e, "Could not probe image");
            Arc::new(ImageHandle::new(key, body, content_type))
        }
        Err(e) => {
            error!(key = %key, kind = %LoadErrorKind::DecodeFailure, error = %e, "Probe task panicked");
            Arc::new(ImageHandle::new(key, body, content_type))
        }
    }
}

fn probe_image(bytes: &[u8]) -> image::ImageResult<(image::ImageFormat, u32, u32)> {
    let format = image::guess_format(bytes)?;
    let (width, height) =
        image::ImageReader::with_format(std::io::Cursor::new(bytes), format).into_dimensions()?;
    Ok((format, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::{
        MockImageFetcher, MockOutcome, MockPersistentStore, image_response,
    };
    use futures_util::future::join_all;
    use tokio::time::Instant;
    use tokio_test::{assert_pending, assert_ready};

    const DROPBOX_URL: &str = "https://www.dropbox.com/s/abc123/pic.png?dl=0";
    const DIRECT_URL: &str = "https://dl.dropboxusercontent.com/s/abc123/pic.png";
    const PLAIN_URL: &str = "https://example.com/cat.png";

    fn loader_with(
        config: ImageLoaderConfig,
        fetcher: &Arc<MockImageFetcher>,
        store: &Arc<MockPersistentStore>,
    ) -> ImageLoader {
        ImageLoader::new(config, store.clone(), fetcher.clone())
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(width, height)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_dropbox_link_end_to_end() {
        let fetcher = Arc::new(MockImageFetcher::serving_images());
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let first = loader.load(DROPBOX_URL).await.unwrap();
        assert_eq!(first.source, ImageSource::Network);
        assert_eq!(first.key.as_str(), DIRECT_URL);
        assert_eq!(fetcher.urls(), vec![DIRECT_URL.to_string()]);

        loader.flush().await;
        assert!(store.contains(&first.key));
        assert_eq!(loader.status(DROPBOX_URL), LoadStatus::Succeeded);

        let second = loader.load(DROPBOX_URL).await.unwrap();
        assert_eq!(second.source, ImageSource::MemoryCache);
        assert!(Arc::ptr_eq(&first.handle, &second.handle));
        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(store.get_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loads_share_one_fetch() {
        let fetcher = Arc::new(MockImageFetcher::new(MockOutcome::Delayed(
            Duration::from_millis(50),
            image_response(),
        )));
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let results = join_all((0..8).map(|_| loader.load(PLAIN_URL))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(store.get_count(), 1);
        assert_eq!(loader.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_caller_joins_pending_load() {
        let fetcher = Arc::new(MockImageFetcher::new(MockOutcome::Delayed(
            Duration::from_millis(50),
            image_response(),
        )));
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let mut first = tokio_test::task::spawn(loader.load(PLAIN_URL));
        assert_pending!(first.poll());
        assert!(loader.status(PLAIN_URL).is_loading());
        assert_eq!(loader.cache_stats().in_flight_count, 1);

        let second = loader.load(PLAIN_URL).await.unwrap();
        let first = assert_ready!(first.poll()).unwrap();

        assert!(Arc::ptr_eq(&first.handle, &second.handle));
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_key_is_attempted_max_retries_plus_one() {
        let fetcher = Arc::new(MockImageFetcher::new(MockOutcome::Fail(
            FetchError::network("connection reset"),
        )));
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let err = loader.load(PLAIN_URL).await.unwrap_err();

        assert_eq!(err.attempts(), 4);
        assert_eq!(err.kind(), Some(LoadErrorKind::NetworkError));
        assert_eq!(fetcher.call_count(), 4);

        let LoadStatus::Failed(record) = loader.status(PLAIN_URL) else {
            panic!("expected failed status");
        };
        assert_eq!(record.attempt_count, 4);
        assert_eq!(record.last_error_kind, LoadErrorKind::NetworkError);

        let stats = loader.cache_stats();
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.failed_keys, vec![PLAIN_URL.to_string()]);
        assert_eq!(stats.in_flight_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retry_delays_are_capped() {
        let fetcher = Arc::new(MockImageFetcher::new(MockOutcome::Fail(
            FetchError::network("connection reset"),
        )));
        let store = Arc::new(MockPersistentStore::new());
        let config = ImageLoaderConfig::default()
            .with_max_retries(4)
            .with_retry_delays(100, 250);
        let loader = loader_with(config, &fetcher, &store);

        let _ = loader.load(PLAIN_URL).await;

        let times = fetcher.call_times();
        assert_eq!(times.len(), 5);
        for pair in times.windows(2).skip(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(250) && gap < Duration::from_millis(260), "gap was {gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_spaced_by_backoff() {
        let fetcher = Arc::new(MockImageFetcher::new(MockOutcome::Fail(
            FetchError::network("connection reset"),
        )));
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let _ = loader.load(PLAIN_URL).await;

        let times = fetcher.call_times();
        assert_eq!(times.len(), 4);
        for (k, pair) in times.windows(2).enumerate() {
            let gap = pair[1] - pair[0];
            let base = Duration::from_millis(1000 * 2_u64.pow(u32::try_from(k).unwrap()));
            assert!(gap >= base, "gap {k} was {gap:?}");
            assert!(gap <= base.mul_f64(1.3).min(Duration::from_secs(10)), "gap {k} was {gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_timeouts_then_success() {
        let fetcher = Arc::new(MockImageFetcher::with_script(
            vec![MockOutcome::Hang, MockOutcome::Hang, MockOutcome::Hang],
            MockOutcome::Respond(image_response()),
        ));
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let started = Instant::now();
        let loaded = loader.load(PLAIN_URL).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(fetcher.call_count(), 4);
        assert!(elapsed >= Duration::from_secs(60 + 1 + 2 + 4));
        assert!(elapsed <= Duration::from_millis(60_000 + 1300 + 2600 + 5200));
        assert_eq!(loader.status(PLAIN_URL), LoadStatus::Succeeded);
        assert_eq!(loader.cache_stats().failed_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_image_response_fails_after_retries() {
        let fetcher = Arc::new(MockImageFetcher::new(MockOutcome::Respond(
            FetchResponse::new(200, Some("text/html"), Bytes::from_static(b"<html>")),
        )));
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let err = loader.load(PLAIN_URL).await.unwrap_err();

        assert_eq!(err.kind(), Some(LoadErrorKind::InvalidContentType));
        assert_eq!(fetcher.call_count(), 4);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_status_without_retries() {
        let fetcher = Arc::new(MockImageFetcher::new(MockOutcome::Respond(
            FetchResponse::new(404, Some("image/png"), Bytes::new()),
        )));
        let store = Arc::new(MockPersistentStore::new());
        let config = ImageLoaderConfig::default().with_max_retries(0);
        let loader = loader_with(config, &fetcher, &store);

        let err = loader.load(PLAIN_URL).await.unwrap_err();

        assert_eq!(err.kind(), Some(LoadErrorKind::BadStatus));
        assert_eq!(err.attempts(), 1);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_store_hit_skips_network() {
        let fetcher = Arc::new(MockImageFetcher::serving_images());
        let store = Arc::new(MockPersistentStore::with_entry(PLAIN_URL, b"stored-bytes"));
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let loaded = loader.load(PLAIN_URL).await.unwrap();
        assert_eq!(loaded.source, ImageSource::PersistentStore);
        assert_eq!(loaded.handle.bytes().as_ref(), b"stored-bytes");
        assert_eq!(fetcher.call_count(), 0);

        let again = loader.load(PLAIN_URL).await.unwrap();
        assert_eq!(again.source, ImageSource::MemoryCache);
        assert_eq!(store.get_count(), 1);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retry_after_failure() {
        let fetcher = Arc::new(MockImageFetcher::with_script(
            vec![
                MockOutcome::Fail(FetchError::bad_status(503)),
                MockOutcome::Fail(FetchError::bad_status(503)),
                MockOutcome::Fail(FetchError::bad_status(503)),
                MockOutcome::Fail(FetchError::bad_status(503)),
            ],
            MockOutcome::Respond(image_response()),
        ));
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        assert!(loader.load(PLAIN_URL).await.is_err());
        assert!(loader.status(PLAIN_URL).is_failed());

        let loaded = loader.retry(PLAIN_URL).await.unwrap();

        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(fetcher.call_count(), 5);
        assert!(loader.status(PLAIN_URL).is_ready());
        assert!(loader.cache_stats().failed_keys.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_during_load_ignores_late_failure() {
        let fetcher = Arc::new(MockImageFetcher::with_script(
            vec![MockOutcome::Delayed(
                Duration::from_millis(100),
                FetchResponse::new(500, Some("image/png"), Bytes::new()),
            )],
            MockOutcome::Respond(image_response()),
        ));
        let store = Arc::new(MockPersistentStore::new());
        let config = ImageLoaderConfig::default().with_max_retries(0);
        let loader = loader_with(config, &fetcher, &store);

        let mut first = tokio_test::task::spawn(loader.load(PLAIN_URL));
        assert_pending!(first.poll());

        let retried = loader.retry(PLAIN_URL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(assert_ready!(first.poll()).is_err());

        assert_eq!(fetcher.call_count(), 2);
        assert_eq!(loader.status(PLAIN_URL), LoadStatus::Succeeded);
        assert!(!retried.handle.is_released());
        let stats = loader.cache_stats();
        assert_eq!(stats.failed_count, 0);
        assert_eq!(stats.memory_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_during_load_keeps_retried_handle() {
        let fetcher = Arc::new(MockImageFetcher::with_script(
            vec![MockOutcome::Delayed(Duration::from_millis(100), image_response())],
            MockOutcome::Respond(image_response()),
        ));
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let mut first = tokio_test::task::spawn(loader.load(PLAIN_URL));
        assert_pending!(first.poll());

        let retried = loader.retry(PLAIN_URL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let first = assert_ready!(first.poll()).unwrap();

        assert_eq!(fetcher.call_count(), 2);
        assert!(!retried.handle.is_released());
        assert!(!first.handle.is_released());
        let resident = loader.peek(PLAIN_URL).unwrap();
        assert!(Arc::ptr_eq(&resident, &retried.handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_key_is_not_poisoned() {
        let fetcher = Arc::new(MockImageFetcher::with_script(
            vec![MockOutcome::Fail(FetchError::network("offline"))],
            MockOutcome::Respond(image_response()),
        ));
        let store = Arc::new(MockPersistentStore::new());
        let config = ImageLoaderConfig::default().with_max_retries(0);
        let loader = loader_with(config, &fetcher, &store);

        assert!(loader.load(PLAIN_URL).await.is_err());
        assert!(loader.load(PLAIN_URL).await.is_ok());
        assert_eq!(loader.status(PLAIN_URL), LoadStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_clear_cache_releases_handles() {
        let fetcher = Arc::new(MockImageFetcher::serving_images());
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let loaded = loader.load(PLAIN_URL).await.unwrap();
        loader.flush().await;
        loader.clear_cache().await;

        assert!(loaded.handle.is_released());
        assert!(loader.peek(PLAIN_URL).is_none());
        assert!(!store.contains(&loaded.key));
        assert_eq!(loader.cache_stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_memory_eviction_falls_back_to_store() {
        let fetcher = Arc::new(MockImageFetcher::serving_images());
        let store = Arc::new(MockPersistentStore::new());
        let config = ImageLoaderConfig::default().with_memory_cache_capacity(1);
        let loader = loader_with(config, &fetcher, &store);

        let first = loader.load("https://example.com/1.png").await.unwrap();
        loader.load("https://example.com/2.png").await.unwrap();
        loader.flush().await;

        assert!(first.handle.is_released());
        let reloaded = loader.load("https://example.com/1.png").await.unwrap();
        assert_eq!(reloaded.source, ImageSource::PersistentStore);
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_probes_dimensions() {
        let fetcher = Arc::new(MockImageFetcher::new(MockOutcome::Respond(
            FetchResponse::new(200, Some("image/png"), png_bytes(2, 3)),
        )));
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let loaded = loader.load(PLAIN_URL).await.unwrap();

        assert_eq!(loaded.handle.dimensions(), Some((2, 3)));
        assert_eq!(loaded.handle.content_type(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_still_usable() {
        let fetcher = Arc::new(MockImageFetcher::serving_images());
        let store = Arc::new(MockPersistentStore::new());
        let loader = loader_with(ImageLoaderConfig::default(), &fetcher, &store);

        let loaded = loader.load(PLAIN_URL).await.unwrap();

        assert_eq!(loaded.handle.dimensions(), None);
        assert!(!loaded.handle.is_empty());
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: ImageLoaderConfig = toml::from_str("max_retries = 5\nload_timeout_ms = 1000").unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.load_timeout(), Duration::from_secs(1));
        assert_eq!(config.prefetch_batch_size, 3);
        assert_eq!(config.memory_cache_capacity, 50);
        assert_eq!(config.persistent_retention(), Duration::from_secs(7 * 24 * 3600));
    }
}
