//! Image load error types.

use serde::Serialize;
use thiserror::Error;

/// Classification of everything that can go wrong while loading an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorKind {
    /// The fetch did not complete within the load timeout.
    Timeout,
    /// Connection, DNS, TLS, or body read failure.
    NetworkError,
    /// The server answered with a non-success status.
    BadStatus,
    /// The response did not declare an image media type.
    InvalidContentType,
    /// The persistent store could not be used; loading continues memory-only.
    StorageUnavailable,
    /// The payload could not be probed; the handle is still usable.
    DecodeFailure,
}

impl LoadErrorKind {
    /// Returns whether the kind consumes the retry budget.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::NetworkError | Self::BadStatus | Self::InvalidContentType
        )
    }
}

impl std::fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::NetworkError => write!(f, "network_error"),
            Self::BadStatus => write!(f, "bad_status"),
            Self::InvalidContentType => write!(f, "invalid_content_type"),
            Self::StorageUnavailable => write!(f, "storage_unavailable"),
            Self::DecodeFailure => write!(f, "decode_failure"),
        }
    }
}

/// Failure of a single network attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum FetchError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("unexpected HTTP status {status}")]
    BadStatus { status: u16 },

    #[error("response is not an image (content type: {})", content_type.as_deref().unwrap_or("none"))]
    InvalidContentType { content_type: Option<String> },
}

impl FetchError {
    /// Creates timeout error.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: after.as_millis() as u64,
        }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates bad status error.
    #[must_use]
    pub const fn bad_status(status: u16) -> Self {
        Self::BadStatus { status }
    }

    /// Creates invalid content type error.
    #[must_use]
    pub fn invalid_content_type(content_type: Option<&str>) -> Self {
        Self::InvalidContentType {
            content_type: content_type.map(String::from),
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub const fn kind(&self) -> LoadErrorKind {
        match self {
            Self::Timeout { .. } => LoadErrorKind::Timeout,
            Self::Network { .. } => LoadErrorKind::NetworkError,
            Self::BadStatus { .. } => LoadErrorKind::BadStatus,
            Self::InvalidContentType { .. } => LoadErrorKind::InvalidContentType,
        }
    }
}

/// Terminal outcome of a failed load, shared by every caller of the key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("giving up on {key} after {attempts} attempts: {source}")]
    RetriesExhausted {
        key: String,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("load task for {key} ended without a result")]
    Aborted { key: String },
}

impl LoadError {
    /// Creates retries exhausted error.
    #[must_use]
    pub fn exhausted(key: impl Into<String>, attempts: u32, source: FetchError) -> Self {
        Self::RetriesExhausted {
            key: key.into(),
            attempts,
            source,
        }
    }

    /// Creates aborted error.
    #[must_use]
    pub fn aborted(key: impl Into<String>) -> Self {
        Self::Aborted { key: key.into() }
    }

    /// Returns the kind of the last attempt's error, if any attempt ran.
    #[must_use]
    pub const fn kind(&self) -> Option<LoadErrorKind> {
        match self {
            Self::RetriesExhausted { source, .. } => Some(source.kind()),
            Self::Aborted { .. } => None,
        }
    }

    /// Returns the number of attempts made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::RetriesExhausted { attempts, .. } => *attempts,
            Self::Aborted { .. } => 0,
        }
    }
}
