//! Key-set loading.
//!
//! [`KeySetLoader`] is the registry's only window onto the network: one call,
//! one fetch of the published key-set document, no retries and no state. All
//! caching and throttling policy lives in [`KeyRegistry`](crate::KeyRegistry).
//!
//! [`HttpKeySetLoader`] is the production implementation: a single `GET`
//! against the configured JWKS URL with request and connect timeouts.

use std::time::Duration;

use async_trait::async_trait;

use crate::{error::LoadError, keyset::KeySet};

/// Default request timeout for key-set fetches (10 seconds).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for key-set fetches (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches the authoritative key-set document.
///
/// Implementations must be stateless with respect to caching: each call
/// performs one fetch and reports its outcome. Connection failures, timeouts,
/// non-success responses and malformed documents are all reported as
/// [`LoadError`].
#[async_trait]
pub trait KeySetLoader: Send + Sync {
    /// Downloads and decodes the key set.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the endpoint cannot be reached, times out,
    /// answers with a non-success status, or serves a body that is not a
    /// key-set document.
    async fn load(&self) -> Result<KeySet, LoadError>;
}

/// [`KeySetLoader`] that fetches the key set over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpKeySetLoader {
    url: String,
    client: reqwest::Client,
}

impl HttpKeySetLoader {
    /// Creates a loader for `url` with the default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Internal`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, LoadError> {
        Self::with_timeouts(url, DEFAULT_FETCH_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Creates a loader for `url` with explicit request and connect timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Internal`] if the HTTP client cannot be built.
    pub fn with_timeouts(
        url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| LoadError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(url, client))
    }

    /// Creates a loader that reuses an existing HTTP client.
    #[must_use]
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self { url: url.into(), client }
    }

    /// The endpoint this loader fetches.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySetLoader for HttpKeySetLoader {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn load(&self) -> Result<KeySet, LoadError> {
        let response = self.client.get(&self.url).send().await.map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::status(status.as_u16(), &self.url));
        }

        let body = response.bytes().await.map_err(map_transport_error)?;
        let key_set: KeySet = serde_json::from_slice(&body)
            .map_err(|e| LoadError::parse_with_source("response is not a JWKS document", e))?;

        tracing::debug!(key_count = key_set.keys.len(), "key set downloaded");
        Ok(key_set)
    }
}

fn map_transport_error(err: reqwest::Error) -> LoadError {
    if err.is_timeout() {
        LoadError::timeout()
    } else if err.is_decode() {
        LoadError::parse_with_source("failed to read response body", err)
    } else {
        LoadError::connection_with_source("key set request failed", err)
    }
}
