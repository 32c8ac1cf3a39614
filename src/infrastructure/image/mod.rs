//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction
//! - Disk store for persistence across sessions
//! - Deduplicating load pipeline with retries
//! - Visibility-driven scheduling and idle-time prefetching

pub mod disk_cache;
pub mod http_fetcher;
pub mod idle;
pub mod loader;
pub mod memory_cache;
pub mod prefetcher;
pub mod scheduler;
pub mod unavailable_store;
pub mod viewport_tracker;

pub use disk_cache::{DEFAULT_RETENTION, DiskImageCache, open_persistent_store};
pub use http_fetcher::HttpImageFetcher;
pub use idle::{DEFAULT_IDLE_FALLBACK, FixedDelayIdle, LoaderIdle};
pub use loader::{CacheStats, ImageLoader, ImageLoaderConfig};
pub use memory_cache::{DEFAULT_CACHE_SIZE, MemoryCacheStats, MemoryImageCache};
pub use prefetcher::{PrefetchReport, Prefetcher};
pub use scheduler::{ImageLoadedEvent, LoadMode, VisibilityScheduler};
pub use unavailable_store::UnavailableStore;
pub use viewport_tracker::{ImmediateVisibility, ViewportTracker};
