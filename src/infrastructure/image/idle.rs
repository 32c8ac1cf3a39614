//! Idle-time signals for background prefetching.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

use crate::domain::ports::IdlePort;

use super::loader::ImageLoader;

/// Delay used when no real idle facility exists.
pub const DEFAULT_IDLE_FALLBACK: Duration = Duration::from_millis(50);

/// Treats every fixed delay as an idle slice.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelayIdle {
    delay: Duration,
}

impl FixedDelayIdle {
    /// Creates a signal that waits `delay` each time.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedDelayIdle {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_FALLBACK)
    }
}

#[async_trait]
impl IdlePort for FixedDelayIdle {
    async fn idle(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

/// Idle once the loader has no running loads, or after `max_wait` at the latest.
#[derive(Debug, Clone)]
pub struct LoaderIdle {
    loader: ImageLoader,
    poll_interval: Duration,
    max_wait: Duration,
}

impl LoaderIdle {
    /// Creates an idle signal polling `loader` every `poll_interval`.
    #[must_use]
    pub const fn new(loader: ImageLoader, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            loader,
            poll_interval,
            max_wait,
        }
    }

    /// Polls at the fallback interval and waits at most one second.
    #[must_use]
    pub const fn with_defaults(loader: ImageLoader) -> Self {
        Self::new(loader, DEFAULT_IDLE_FALLBACK, Duration::from_secs(1))
    }
}

#[async_trait]
impl IdlePort for LoaderIdle {
    async fn idle(&self) {
        let deadline = Instant::now() + self.max_wait;
        while self.loader.in_flight_count() > 0 {
            if Instant::now() >= deadline {
                trace!("Loader still busy, proceeding anyway");
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
