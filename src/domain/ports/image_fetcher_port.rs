//! Port definition for fetching image bytes over the network.

use bytes::Bytes;

use crate::domain::errors::FetchError;

/// Raw response of a single fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Declared `Content-Type`, if any.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Bytes,
}

impl FetchResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.map(String::from),
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns true if the declared media type is `image/*`.
    #[must_use]
    pub fn declares_image(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|media| media.trim().to_ascii_lowercase().starts_with("image/"))
        })
    }
}

/// Port for single-request network fetches.
///
/// Implementations report transport failures only; status and content type
/// are validated by the caller.
#[async_trait::async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Fetches `url`.
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}
