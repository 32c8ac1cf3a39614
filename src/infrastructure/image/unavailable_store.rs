//! Stub persistent store used when no storage facility is usable.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::domain::entities::{CacheKey, PersistedEntry};
use crate::domain::errors::StoreResult;
use crate::domain::ports::PersistentStorePort;

/// Store that holds nothing and accepts everything.
/// Keeps the loader on memory-only caching.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    /// Creates a stub, remembering why the real store could not be opened.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why the persistent tier is disabled.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl PersistentStorePort for UnavailableStore {
    fn is_available(&self) -> bool {
        false
    }

    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        trace!(key = %key, "Persistent store disabled - treating as miss");
        None
    }

    async fn put(&self, entry: PersistedEntry) -> StoreResult<()> {
        trace!(key = %entry.key, "Persistent store disabled - dropping write");
        Ok(())
    }

    async fn sweep(&self) -> StoreResult<usize> {
        Ok(0)
    }

    async fn clear(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_is_silent() {
        let store = UnavailableStore::new("read-only filesystem");
        let key = CacheKey::from_url("https://example.com/a.png");

        assert!(!store.is_available());
        assert!(
            store
                .put(PersistedEntry::new(key.clone(), Bytes::from_static(b"x")))
                .await
                .is_ok()
        );
        assert!(store.get(&key).await.is_none());
        assert_eq!(store.sweep().await.ok(), Some(0));
        assert!(store.clear().await.is_ok());
        assert_eq!(store.reason(), "read-only filesystem");
    }
}
