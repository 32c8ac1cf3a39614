//! Port definition for idle-time scheduling.

/// Port for waiting until the system has spare capacity for background work.
#[async_trait::async_trait]
pub trait IdlePort: Send + Sync {
    /// Resolves at the start of the next idle slice.
    async fn idle(&self);
}
