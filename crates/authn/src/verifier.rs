//! IAP assertion verification.
//!
//! [`SignatureVerifier`] checks a parsed token's header, resolves its key
//! through the shared [`KeyRegistry`] and verifies the signature. Every
//! failure is fail-closed: the boolean [`validate`](SignatureVerifier::validate)
//! answers `false`, and [`verify`](SignatureVerifier::verify) reports which
//! check failed.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use iap_authn::{HttpKeySetLoader, KeyRegistry, SignatureVerifier, SystemClock};
//!
//! # async fn example(header_value: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
//! let loader = HttpKeySetLoader::new("https://www.gstatic.com/iap/verify/public_key-jwk")?;
//! let registry = Arc::new(KeyRegistry::new(Arc::new(loader), Arc::new(SystemClock)));
//! let verifier = SignatureVerifier::new(registry, Arc::new(SystemClock))
//!     .with_expected_audience("/projects/123/apps/my-app");
//!
//! if let Some(claims) = verifier.authenticate(header_value).await {
//!     println!("authenticated {}", claims.email);
//! }
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use crate::{
    clock::Clock,
    error::AuthError,
    registry::KeyRegistry,
    token::{IapClaims, SignedToken},
    validation::{validate_algorithm, validate_kid},
};

/// Request header IAP puts its signed assertion in.
pub const IAP_JWT_HEADER: &str = "x-goog-iap-jwt-assertion";

/// Default clock skew tolerated on `exp` and `iat` (30 seconds).
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(30);

/// Verifies IAP assertions against keys held by a [`KeyRegistry`].
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    registry: Arc<KeyRegistry>,
    clock: Arc<dyn Clock>,
    expected_audience: Option<String>,
    leeway: Duration,
}

impl SignatureVerifier {
    /// Creates a verifier backed by `registry`, checking token times against
    /// `clock`. No audience is enforced until
    /// [`with_expected_audience`](Self::with_expected_audience) is called.
    #[must_use]
    pub fn new(registry: Arc<KeyRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock, expected_audience: None, leeway: DEFAULT_LEEWAY }
    }

    /// Requires the `aud` claim to equal `audience`.
    #[must_use]
    pub fn with_expected_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    /// Sets the clock skew tolerated on `exp` and `iat`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// The registry keys are resolved from.
    #[must_use]
    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Verifies the signature of a parsed token.
    ///
    /// Header checks run before the registry is consulted, so a token
    /// without `alg` or `kid`, or with a forbidden algorithm, never triggers
    /// a key-set download.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `token` is `None` ([`AuthError::MissingToken`])
    /// - The header has no `alg` or no `kid` ([`AuthError::MissingAlgorithm`],
    ///   [`AuthError::MissingKeyId`])
    /// - The algorithm is forbidden or unknown ([`AuthError::UnsupportedAlgorithm`])
    /// - The `kid` is malformed ([`AuthError::InvalidKeyId`])
    /// - Key resolution fails (see [`KeyRegistry::lookup`])
    /// - The signature does not verify ([`AuthError::InvalidSignature`])
    #[tracing::instrument(
        skip(self, token),
        fields(
            alg = token.and_then(|t| t.algorithm.as_deref()),
            kid = token.and_then(|t| t.key_id.as_deref()),
        )
    )]
    pub async fn verify(&self, token: Option<&SignedToken>) -> Result<(), AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let algorithm = token.algorithm.as_deref().ok_or(AuthError::MissingAlgorithm)?;
        let kid = token.key_id.as_deref().ok_or(AuthError::MissingKeyId)?;

        let parsed_algorithm = validate_algorithm(algorithm)?;
        validate_kid(kid)?;

        let key = self.registry.lookup(kid, algorithm).await?;

        match jsonwebtoken::crypto::verify(
            &token.signature,
            token.signing_input.as_bytes(),
            &key,
            parsed_algorithm,
        ) {
            Ok(true) => {
                tracing::debug!("signature verified");
                Ok(())
            },
            Ok(false) => Err(AuthError::InvalidSignature),
            Err(err) => {
                tracing::debug!(error = %err, "signature check errored");
                Err(AuthError::InvalidSignature)
            },
        }
    }

    /// Returns `true` only if the token's signature verifies.
    ///
    /// Any failure, including an absent token, yields `false`; the failure
    /// kind is logged at warn.
    pub async fn validate(&self, token: Option<&SignedToken>) -> bool {
        match self.verify(token).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(kind = err.kind(), error = %err, "token rejected");
                false
            },
        }
    }

    /// Parses and fully verifies a raw assertion, returning its claims.
    ///
    /// On top of [`verify`](Self::verify) this checks `exp` and `iat`
    /// against the clock (with leeway), the IAP issuer and, if configured,
    /// the audience.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as an [`AuthError`].
    pub async fn verify_assertion(&self, raw: &str) -> Result<IapClaims, AuthError> {
        let token = SignedToken::parse(raw)?;
        self.verify(Some(&token)).await?;

        let claims = token.claims()?;
        claims.check_times(self.clock.now(), self.leeway)?;
        claims.check_issuer_and_audience(self.expected_audience.as_deref())?;
        Ok(claims)
    }

    /// Authenticates the value of the [`IAP_JWT_HEADER`] request header.
    ///
    /// Returns the verified claims, or `None` if the header is absent or the
    /// assertion fails any check.
    pub async fn authenticate(&self, assertion: Option<&str>) -> Option<IapClaims> {
        let raw = assertion?;
        match self.verify_assertion(raw).await {
            Ok(claims) => {
                tracing::debug!(email = %claims.email, "assertion authenticated");
                Some(claims)
            },
            Err(err) => {
                tracing::warn!(kind = err.kind(), error = %err, "assertion rejected");
                None
            },
        }
    }
}
