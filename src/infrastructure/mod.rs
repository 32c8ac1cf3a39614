//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (caching, loading, scheduling, prefetching).
pub mod image;

pub use config::{AppConfig, CliArgs, Command, ConfigStore, LogLevel};
pub use image::{
    CacheStats, DiskImageCache, HttpImageFetcher, ImageLoadedEvent, ImageLoader,
    ImageLoaderConfig, LoadMode, MemoryImageCache, PrefetchReport, Prefetcher, ViewportTracker,
    VisibilityScheduler,
};
