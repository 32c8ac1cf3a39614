//! Port definition for the durable image tier.

use bytes::Bytes;

use crate::domain::entities::{CacheKey, PersistedEntry};
use crate::domain::errors::StoreResult;

/// Port for the persistent blob store.
///
/// Backends that cannot reach their storage facility report
/// `is_available() == false` and behave as an always-empty store.
#[async_trait::async_trait]
pub trait PersistentStorePort: Send + Sync {
    /// Returns whether the backing facility is usable.
    fn is_available(&self) -> bool;

    /// Returns the payload for `key`; expired entries are absent.
    async fn get(&self, key: &CacheKey) -> Option<Bytes>;

    /// Stores an entry, replacing any previous one for the key.
    async fn put(&self, entry: PersistedEntry) -> StoreResult<()>;

    /// Deletes entries older than the retention horizon, returning how many were removed.
    async fn sweep(&self) -> StoreResult<usize>;

    /// Deletes every entry.
    async fn clear(&self) -> StoreResult<()>;
}
