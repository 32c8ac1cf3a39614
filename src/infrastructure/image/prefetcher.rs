//! Background prefetching in small idle-time batches.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::entities::{CacheKey, LoadStatus};
use crate::domain::ports::IdlePort;

use super::idle::LoaderIdle;
use super::loader::ImageLoader;

/// Outcome of one prefetch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    /// Size of each dispatched batch, in order.
    pub batches: Vec<usize>,
    /// Loads that succeeded.
    pub succeeded: usize,
    /// Loads that failed; failures never surface beyond this count.
    pub failed: usize,
    /// URLs skipped as duplicates or already resident, loading, or failed.
    pub skipped: usize,
}

impl std::fmt::Display for PrefetchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} batches, {} loaded, {} failed, {} skipped",
            self.batches.len(),
            self.succeeded,
            self.failed,
            self.skipped
        )
    }
}

/// Warms the caches with images the user is likely to need soon.
#[derive(Clone)]
pub struct Prefetcher {
    loader: ImageLoader,
    idle: Arc<dyn IdlePort>,
    batch_size: usize,
    batch_delay: Duration,
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("batch_size", &self.batch_size)
            .field("batch_delay", &self.batch_delay)
            .finish_non_exhaustive()
    }
}

impl Prefetcher {
    /// Creates a prefetcher that yields to foreground loads of `loader`.
    #[must_use]
    pub fn new(loader: ImageLoader) -> Self {
        let idle = Arc::new(LoaderIdle::with_defaults(loader.clone()));
        Self::with_idle(loader, idle)
    }

    /// Creates a prefetcher with a custom idle signal.
    #[must_use]
    pub fn with_idle(loader: ImageLoader, idle: Arc<dyn IdlePort>) -> Self {
        let config = loader.config();
        let batch_size = config.prefetch_batch_size.max(1);
        let batch_delay = config.prefetch_batch_delay();
        Self {
            loader,
            idle,
            batch_size,
            batch_delay,
        }
    }

    /// Keeps the first occurrence of each key that has never been attempted.
    #[must_use]
    pub fn candidates<S: AsRef<str>>(&self, urls: &[S]) -> Vec<CacheKey> {
        let mut seen = HashSet::new();
        urls.iter()
            .map(|url| CacheKey::from_url(url.as_ref()))
            .filter(|key| seen.insert(key.clone()))
            .filter(|key| self.loader.status_of(key) == LoadStatus::Idle)
            .collect()
    }

    /// Loads `urls` in batches, waiting for an idle slice before each batch.
    pub async fn run<S: AsRef<str>>(&self, urls: &[S]) -> PrefetchReport {
        let queue = self.candidates(urls);
        let mut report = PrefetchReport {
            skipped: urls.len() - queue.len(),
            ..PrefetchReport::default()
        };

        for (index, batch) in queue.chunks(self.batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.batch_delay).await;
            }
            self.idle.idle().await;

            debug!(batch = index, size = batch.len(), "Prefetching batch");
            let results = join_all(batch.iter().map(|key| self.loader.load(key.as_str()))).await;

            for (key, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => report.succeeded += 1,
                    Err(e) => {
                        debug!(key = %key, error = %e, "Prefetch failed");
                        report.failed += 1;
                    }
                }
            }
            report.batches.push(batch.len());
        }

        info!(
            batches = report.batches.len(),
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Prefetch finished"
        );
        report
    }

    /// Starts a prefetch run in the background.
    pub fn prefetch(&self, urls: Vec<String>) -> JoinHandle<PrefetchReport> {
        let prefetcher = self.clone();
        tokio::spawn(async move { prefetcher.run(&urls).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::FetchError;
    use crate::domain::ports::mocks::{
        MockImageFetcher, MockOutcome, MockPersistentStore, image_response,
    };
    use crate::infrastructure::image::{FixedDelayIdle, ImageLoaderConfig};

    fn urls(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("https://example.com/{i}.png"))
            .collect()
    }

    fn setup(fetcher: &Arc<MockImageFetcher>, config: ImageLoaderConfig) -> (ImageLoader, Prefetcher) {
        let loader = ImageLoader::new(config, Arc::new(MockPersistentStore::new()), fetcher.clone());
        let prefetcher = Prefetcher::with_idle(loader.clone(), Arc::new(FixedDelayIdle::default()));
        (loader, prefetcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_sized_and_spaced() {
        let fetcher = Arc::new(MockImageFetcher::serving_images());
        let (loader, prefetcher) = setup(&fetcher, ImageLoaderConfig::default());
        let mut list = urls(8);
        loader.load(&list[0]).await.unwrap();
        list.push(list[3].clone());

        let report = prefetcher.run(&list).await;

        assert_eq!(report.batches, vec![3, 3, 1]);
        assert_eq!(report.succeeded, 7);
        assert_eq!(report.skipped, 2);

        let times = fetcher.call_times();
        assert_eq!(times.len(), 8);
        let prefetched = &times[1..];
        assert!(prefetched[3] - prefetched[2] >= Duration::from_millis(100));
        assert!(prefetched[6] - prefetched[5] >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_swallowed() {
        let fetcher = Arc::new(MockImageFetcher::with_script(
            vec![MockOutcome::Fail(FetchError::network("offline"))],
            MockOutcome::Respond(image_response()),
        ));
        let config = ImageLoaderConfig::default().with_max_retries(0);
        let (loader, prefetcher) = setup(&fetcher, config);

        let report = prefetcher.run(&urls(2)).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(loader.cache_stats().failed_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_keys_are_skipped() {
        let fetcher = Arc::new(MockImageFetcher::with_script(
            vec![MockOutcome::Fail(FetchError::bad_status(404))],
            MockOutcome::Respond(image_response()),
        ));
        let config = ImageLoaderConfig::default().with_max_retries(0);
        let (loader, prefetcher) = setup(&fetcher, config);
        let list = urls(1);
        assert!(loader.load(&list[0]).await.is_err());

        let report = prefetcher.run(&list).await;

        assert!(report.batches.is_empty());
        assert_eq!(report.skipped, 1);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_batch_size_and_background_run() {
        let fetcher = Arc::new(MockImageFetcher::serving_images());
        let config = ImageLoaderConfig::default().with_prefetch(2, 10);
        let (_loader, prefetcher) = setup(&fetcher, config);

        let report = prefetcher.prefetch(urls(5)).await.unwrap();

        assert_eq!(report.batches, vec![2, 2, 1]);
        assert_eq!(fetcher.call_count(), 5);
    }

    #[tokio::test]
    async fn test_candidates_normalize_before_dedup() {
        let fetcher = Arc::new(MockImageFetcher::serving_images());
        let (_loader, prefetcher) = setup(&fetcher, ImageLoaderConfig::default());

        let keys = prefetcher.candidates(&[
            "https://www.dropbox.com/s/abc/pic.png?dl=0",
            "https://dl.dropboxusercontent.com/s/abc/pic.png",
        ]);

        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].as_str(), "https://dl.dropboxusercontent.com/s/abc/pic.png");
    }
}
