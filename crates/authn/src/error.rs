//! Authentication error types.
//!
//! This module defines the errors that can occur while verifying an IAP
//! assertion ([`AuthError`]) and while downloading the published key set
//! ([`LoadError`]).
//!
//! Every verification failure is reported as an [`AuthError`]; callers that
//! only need a yes/no answer use
//! [`SignatureVerifier::validate`](crate::SignatureVerifier::validate), which
//! collapses all of them to `false`.

use std::sync::Arc;

use thiserror::Error;

/// Boxed error used as the `#[source]` of [`LoadError`] variants.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Authentication errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`: new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Malformed JWT - cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// No token was presented.
    #[error("Missing token")]
    MissingToken,

    /// Token header carries no `alg`.
    #[error("JWT header missing 'alg' field")]
    MissingAlgorithm,

    /// Token header carries no `kid`.
    #[error("JWT header missing 'kid' field")]
    MissingKeyId,

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Key ID is syntactically unacceptable.
    #[error("Invalid key id: {0}")]
    InvalidKeyId(String),

    /// No published key carries this key ID.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key ID that was not found.
        kid: String,
    },

    /// The published key is bound to a different algorithm than the token claims.
    #[error(
        "Algorithm mismatch for key {kid}: key is published for {key_algorithm}, token claims {token_algorithm}"
    )]
    AlgorithmMismatch {
        /// Key ID of the published key.
        kid: String,
        /// Algorithm recorded on the published key (`"<none>"` when absent).
        key_algorithm: String,
        /// Algorithm claimed in the token header.
        token_algorithm: String,
    },

    /// Invalid public key material.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token `iat` lies in the future.
    #[error("Token issued in the future")]
    TokenIssuedInFuture,

    /// Audience doesn't match expected value.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// Required claim is missing.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// The key set could not be downloaded.
    ///
    /// Only surfaced by [`KeyRegistry::warm`](crate::KeyRegistry::warm); lookups
    /// log load failures and carry on with the cached key set.
    #[error("Key set load failed: {0}")]
    KeySetLoad(
        /// The underlying loader error.
        #[source]
        LoadError,
    ),

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// Creates an [`AuthError::InvalidTokenFormat`].
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates an [`AuthError::UnsupportedAlgorithm`].
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates an [`AuthError::InvalidKeyId`].
    pub fn invalid_key_id(message: impl Into<String>) -> Self {
        Self::InvalidKeyId(message.into())
    }

    /// Creates an [`AuthError::KeyNotFound`].
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates an [`AuthError::AlgorithmMismatch`].
    pub fn algorithm_mismatch(
        kid: impl Into<String>,
        key_algorithm: impl Into<String>,
        token_algorithm: impl Into<String>,
    ) -> Self {
        Self::AlgorithmMismatch {
            kid: kid.into(),
            key_algorithm: key_algorithm.into(),
            token_algorithm: token_algorithm.into(),
        }
    }

    /// Creates an [`AuthError::InvalidPublicKey`].
    pub fn invalid_public_key(message: impl Into<String>) -> Self {
        Self::InvalidPublicKey(message.into())
    }

    /// Creates an [`AuthError::InvalidAudience`].
    pub fn invalid_audience(message: impl Into<String>) -> Self {
        Self::InvalidAudience(message.into())
    }

    /// Creates an [`AuthError::MissingClaim`].
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates an [`AuthError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short, stable label for the failure kind, used as a log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTokenFormat(_) => "invalid_token_format",
            Self::MissingToken => "missing_token",
            Self::MissingAlgorithm => "missing_algorithm",
            Self::MissingKeyId => "missing_key_id",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::InvalidKeyId(_) => "invalid_key_id",
            Self::KeyNotFound { .. } => "key_not_found",
            Self::AlgorithmMismatch { .. } => "algorithm_mismatch",
            Self::InvalidPublicKey(_) => "invalid_public_key",
            Self::InvalidSignature => "invalid_signature",
            Self::TokenExpired => "token_expired",
            Self::TokenIssuedInFuture => "token_issued_in_future",
            Self::InvalidAudience(_) => "invalid_audience",
            Self::MissingClaim(_) => "missing_claim",
            Self::KeySetLoad(_) => "key_set_load",
            Self::Config(_) => "config",
        }
    }
}

impl From<LoadError> for AuthError {
    fn from(err: LoadError) -> Self {
        AuthError::KeySetLoad(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors raised while downloading or decoding the published key set.
///
/// The registry treats every variant the same way (keep the cached key set,
/// log, carry on); the variants exist so logs and tests can tell a network
/// outage from a bad document.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// Connection or transport failure.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// The fetch exceeded its time limit.
    #[error("Operation timeout")]
    Timeout,

    /// The endpoint answered with a non-success status.
    #[error("Unexpected HTTP status {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Endpoint that was queried.
        url: String,
    },

    /// The response body is not a key-set document.
    #[error("Malformed key set: {message}")]
    Parse {
        /// Description of the decoding error.
        message: String,
        /// The underlying decoding error.
        #[source]
        source: Option<BoxError>,
    },

    /// Anything else (client construction, injected failures).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl LoadError {
    /// Creates a [`LoadError::Connection`] without a source.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a [`LoadError::Connection`] wrapping its cause.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a [`LoadError::Timeout`].
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a [`LoadError::Status`].
    pub fn status(status: u16, url: impl Into<String>) -> Self {
        Self::Status { status, url: url.into() }
    }

    /// Creates a [`LoadError::Parse`] without a source.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into(), source: None }
    }

    /// Creates a [`LoadError::Parse`] wrapping its cause.
    pub fn parse_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Parse { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a [`LoadError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_token_format("test");
        assert_eq!(err.to_string(), "Invalid token format: test");

        let err = AuthError::MissingKeyId;
        assert_eq!(err.to_string(), "JWT header missing 'kid' field");

        let err = AuthError::missing_claim("email");
        assert_eq!(err.to_string(), "Missing claim: email");
    }

    #[test]
    fn test_algorithm_mismatch_display_names_both_algorithms() {
        let err = AuthError::algorithm_mismatch("k1", "ES256", "ES384");
        let rendered = err.to_string();
        assert!(rendered.contains("k1"));
        assert!(rendered.contains("ES256"));
        assert!(rendered.contains("ES384"));
    }

    #[test]
    fn test_kind_labels_are_distinct_for_security_relevant_failures() {
        let not_found = AuthError::key_not_found("k1");
        let mismatch = AuthError::algorithm_mismatch("k1", "ES256", "RS256");
        assert_eq!(not_found.kind(), "key_not_found");
        assert_eq!(mismatch.kind(), "algorithm_mismatch");
        assert_ne!(not_found.kind(), mismatch.kind());
    }

    #[test]
    fn test_load_error_display() {
        assert_eq!(LoadError::timeout().to_string(), "Operation timeout");
        assert_eq!(
            LoadError::status(503, "https://keys.example.com").to_string(),
            "Unexpected HTTP status 503 from https://keys.example.com"
        );
        assert_eq!(LoadError::parse("no keys array").to_string(), "Malformed key set: no keys array");
    }

    #[test]
    fn test_key_set_load_preserves_source_chain() {
        use std::error::Error;

        let inner = LoadError::timeout();
        let load_err = LoadError::connection_with_source("connection failed", inner);
        let auth_err = AuthError::from(load_err);

        // Level 1: AuthError → LoadError
        let level_1 = auth_err.source().expect("level 1 source");
        assert_eq!(level_1.to_string(), "Connection error: connection failed");

        // Level 2: LoadError → inner error
        let level_2 = level_1.source().expect("level 2 source");
        assert_eq!(level_2.to_string(), "Operation timeout");
    }
}
