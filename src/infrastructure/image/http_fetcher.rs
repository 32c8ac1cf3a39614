//! HTTP adapter for the image fetcher port.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::domain::errors::FetchError;
use crate::domain::ports::{FetchResponse, ImageFetcherPort};

const USER_AGENT: &str = concat!("imgcache/", env!("CARGO_PKG_VERSION"));

/// Fetches images with a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpImageFetcher {
    /// Creates a fetcher whose requests abort after `timeout`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl ImageFetcherPort for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        trace!(url = %url, "Sending image request");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(self.timeout)
            } else {
                FetchError::network(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(self.timeout)
            } else {
                FetchError::network(format!("Failed to read body: {e}"))
            }
        })?;

        Ok(FetchResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        assert!(HttpImageFetcher::new(Duration::from_secs(20)).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let fetcher = HttpImageFetcher::new(Duration::from_secs(5)).unwrap();
        let result = fetcher.fetch("http://127.0.0.1:9/image.png").await;
        assert!(matches!(result, Err(FetchError::Network { .. } | FetchError::Timeout { .. })));
    }
}
