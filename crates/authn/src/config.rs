//! Configuration for IAP assertion verification.
//!
//! This module provides [`IapAuthConfig`], which names the key-set endpoint,
//! the refresh throttle and the claim checks, and wires them into a ready
//! [`SignatureVerifier`].

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    clock::SystemClock,
    error::{AuthError, Result},
    loader::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_FETCH_TIMEOUT, HttpKeySetLoader},
    registry::{DEFAULT_MIN_RETRY_INTERVAL, KeyRegistry},
    verifier::{DEFAULT_LEEWAY, IAP_JWT_HEADER, SignatureVerifier},
};

/// Endpoint Google publishes IAP signing keys at, in JWK format.
pub const DEFAULT_JWKS_URL: &str = "https://www.gstatic.com/iap/verify/public_key-jwk";

/// Configuration for IAP assertion verification.
///
/// Every field has a default, so an empty document deserializes to a
/// working configuration against Google's production endpoint. Durations
/// are written in humantime form (`"60s"`, `"2m"`).
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use iap_authn::IapAuthConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IapAuthConfig::builder()
///     .expected_audience("/projects/123/apps/my-app")
///     .min_retry_interval(Duration::from_secs(120))
///     .build()?;
///
/// let verifier = config.into_verifier()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IapAuthConfig {
    /// URL of the JWKS document.
    #[serde(default = "default_jwks_url")]
    pub(crate) jwks_url: String,

    /// Minimum time between key-set downloads.
    #[serde(with = "humantime_serde", default = "default_min_retry_interval")]
    pub(crate) min_retry_interval: Duration,

    /// Request timeout for a key-set download.
    #[serde(with = "humantime_serde", default = "default_fetch_timeout")]
    pub(crate) fetch_timeout: Duration,

    /// Connection timeout for a key-set download.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect_timeout: Duration,

    /// Request header carrying the assertion.
    #[serde(default = "default_header_name")]
    pub(crate) header_name: String,

    /// Required `aud` claim, if any.
    #[serde(default)]
    pub(crate) expected_audience: Option<String>,

    /// Clock skew tolerated on `exp` and `iat`.
    #[serde(with = "humantime_serde", default = "default_leeway")]
    pub(crate) leeway: Duration,
}

fn default_jwks_url() -> String {
    DEFAULT_JWKS_URL.to_string()
}

fn default_min_retry_interval() -> Duration {
    DEFAULT_MIN_RETRY_INTERVAL
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_header_name() -> String {
    IAP_JWT_HEADER.to_string()
}

fn default_leeway() -> Duration {
    DEFAULT_LEEWAY
}

impl Default for IapAuthConfig {
    fn default() -> Self {
        Self {
            jwks_url: default_jwks_url(),
            min_retry_interval: default_min_retry_interval(),
            fetch_timeout: default_fetch_timeout(),
            connect_timeout: default_connect_timeout(),
            header_name: default_header_name(),
            expected_audience: None,
            leeway: default_leeway(),
        }
    }
}

#[bon::bon]
impl IapAuthConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `jwks_url` - Key-set endpoint (default: Google's IAP JWK endpoint).
    /// * `min_retry_interval` - Download throttle (default: 60 seconds).
    /// * `fetch_timeout` - Request timeout (default: 10 seconds).
    /// * `connect_timeout` - Connection timeout (default: 5 seconds).
    /// * `header_name` - Assertion header (default: `x-goog-iap-jwt-assertion`).
    /// * `expected_audience` - Required `aud` claim (default: not enforced).
    /// * `leeway` - Clock skew on `exp`/`iat` (default: 30 seconds).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if:
    /// - `jwks_url` is not an `http://` or `https://` URL
    /// - `header_name` is empty
    /// - `fetch_timeout` is zero
    /// - `expected_audience` is set but empty
    #[builder]
    pub fn new(
        #[builder(into, default = default_jwks_url())] jwks_url: String,
        #[builder(default = DEFAULT_MIN_RETRY_INTERVAL)] min_retry_interval: Duration,
        #[builder(default = DEFAULT_FETCH_TIMEOUT)] fetch_timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(into, default = default_header_name())] header_name: String,
        #[builder(into)] expected_audience: Option<String>,
        #[builder(default = DEFAULT_LEEWAY)] leeway: Duration,
    ) -> Result<Self> {
        let config = Self {
            jwks_url,
            min_retry_interval,
            fetch_timeout,
            connect_timeout,
            header_name,
            expected_audience,
            leeway,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the field constraints listed on [`new`](Self::new).
    ///
    /// Deserialized configurations skip the builder; [`into_verifier`](Self::into_verifier)
    /// runs this check for them.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.jwks_url.starts_with("https://") || self.jwks_url.starts_with("http://")) {
            return Err(AuthError::config(format!(
                "jwks_url must be an http(s) URL, got '{}'",
                self.jwks_url
            )));
        }

        if self.header_name.is_empty() {
            return Err(AuthError::config("header_name cannot be empty"));
        }

        if self.fetch_timeout.is_zero() {
            return Err(AuthError::config("fetch_timeout must be non-zero"));
        }

        if self.expected_audience.as_deref().is_some_and(str::is_empty) {
            return Err(AuthError::config("expected_audience cannot be empty when set"));
        }

        Ok(())
    }

    /// Returns the key-set endpoint.
    #[must_use]
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Returns the download throttle.
    #[must_use]
    pub fn min_retry_interval(&self) -> Duration {
        self.min_retry_interval
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the request header carrying the assertion.
    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Returns the required audience, if any.
    #[must_use]
    pub fn expected_audience(&self) -> Option<&str> {
        self.expected_audience.as_deref()
    }

    /// Returns the tolerated clock skew.
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Builds the HTTP loader, key registry and verifier this configuration
    /// describes, on the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn into_verifier(self) -> Result<SignatureVerifier> {
        self.validate()?;

        let loader = HttpKeySetLoader::with_timeouts(
            &self.jwks_url,
            self.fetch_timeout,
            self.connect_timeout,
        )
        .map_err(|e| AuthError::config(e.to_string()))?;
        let clock = Arc::new(SystemClock);
        let registry = Arc::new(KeyRegistry::with_min_retry_interval(
            Arc::new(loader),
            clock.clone(),
            self.min_retry_interval,
        ));

        let verifier = SignatureVerifier::new(registry, clock).with_leeway(self.leeway);
        Ok(match self.expected_audience {
            Some(audience) => verifier.with_expected_audience(audience),
            None => verifier,
        })
    }
}
