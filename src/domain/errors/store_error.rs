//! Persistent store error types.

use thiserror::Error;

use super::LoadErrorKind;

/// Result type for persistent store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by persistent store backends.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum StoreError {
    #[error("persistent store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("store I/O error: {message}")]
    Io { message: String },

    #[error("corrupted store entry: {message}")]
    Corrupted { message: String },
}

impl StoreError {
    /// Creates unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Creates I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates corrupted entry error.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Store failures never fail a load; they all degrade to memory-only caching.
    #[must_use]
    pub const fn kind(&self) -> LoadErrorKind {
        LoadErrorKind::StorageUnavailable
    }
}
