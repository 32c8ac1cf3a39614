//! Cache key derived from a normalized URL.

use serde::Serialize;

use crate::domain::services::normalize_url;

/// Normalized URL identifying one cached image across both tiers.
///
/// Two inputs that normalize to the same URL yield equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key for `url`, normalizing it first.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        Self(normalize_url(url))
    }

    /// Returns the normalized URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a filesystem-safe digest of the key.
    #[must_use]
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(url: &str) -> Self {
        Self::from_url(url)
    }
}
