//! Compact JWS parsing and IAP claims.
//!
//! [`SignedToken::parse`] splits an assertion into its three segments and
//! decodes the header, without verifying anything. The header fields are
//! kept as `Option`s so the verifier can tell a missing `alg` or `kid` apart
//! from a malformed token. Claims are only decoded after the signature has
//! been checked.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Issuer IAP writes into every assertion.
pub const IAP_ISSUER: &str = "https://cloud.google.com/iap";

/// A compact JWS split into its parts, header decoded, nothing verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    /// `alg` header value, if present.
    pub algorithm: Option<String>,
    /// `kid` header value, if present.
    pub key_id: Option<String>,
    /// `header.payload`, the bytes the signature covers.
    pub signing_input: String,
    /// Base64url signature segment.
    pub signature: String,
    /// Base64url payload segment.
    pub payload: String,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<String>,
}

impl SignedToken {
    /// Parses a compact JWS (`header.payload.signature`).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTokenFormat`] if the token does not have
    /// exactly three segments or the header is not base64url-encoded JSON.
    pub fn parse(compact: &str) -> Result<Self, AuthError> {
        let mut parts = compact.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::invalid_token_format("JWT must have 3 parts separated by dots"));
        };

        let header_bytes = URL_SAFE_NO_PAD.decode(header).map_err(|e| {
            AuthError::invalid_token_format(format!("Failed to decode JWT header: {e}"))
        })?;
        let raw: RawHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
            AuthError::invalid_token_format(format!("Failed to parse JWT header: {e}"))
        })?;

        Ok(Self {
            algorithm: raw.alg,
            key_id: raw.kid,
            signing_input: format!("{header}.{payload}"),
            signature: signature.to_owned(),
            payload: payload.to_owned(),
        })
    }

    /// Decodes the payload as IAP claims.
    ///
    /// This does not verify anything; call it only on a token whose
    /// signature has been checked.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTokenFormat`] if the payload is not
    /// base64url-encoded JSON with numeric `exp` and `iat`, and
    /// [`AuthError::MissingClaim`] if `iss`, `sub`, `aud` or `email` is empty.
    pub fn claims(&self) -> Result<IapClaims, AuthError> {
        let payload_bytes = URL_SAFE_NO_PAD.decode(&self.payload).map_err(|e| {
            AuthError::invalid_token_format(format!("Failed to decode JWT payload: {e}"))
        })?;

        let claims: IapClaims = serde_json::from_slice(&payload_bytes).map_err(|e| {
            AuthError::invalid_token_format(format!("Failed to parse JWT claims: {e}"))
        })?;

        if claims.iss.is_empty() {
            return Err(AuthError::missing_claim("iss"));
        }
        if claims.sub.is_empty() {
            return Err(AuthError::missing_claim("sub"));
        }
        if claims.aud.is_empty() {
            return Err(AuthError::missing_claim("aud"));
        }
        if claims.email.is_empty() {
            return Err(AuthError::missing_claim("email"));
        }

        Ok(claims)
    }
}

/// Claims carried by an IAP assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IapClaims {
    /// Issuer, `https://cloud.google.com/iap` for genuine assertions.
    #[serde(default)]
    pub iss: String,
    /// Stable identifier of the authenticated user.
    #[serde(default)]
    pub sub: String,
    /// Audience: the backend service or App Engine application.
    #[serde(default)]
    pub aud: String,
    /// Email address of the authenticated user.
    #[serde(default)]
    pub email: String,
    /// Expiration time (seconds since the epoch).
    pub exp: i64,
    /// Issued-at time (seconds since the epoch).
    pub iat: i64,
    /// Hosted domain, for users in a Google Workspace organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd: Option<String>,
}

impl IapClaims {
    /// Checks `exp` and `iat` against `now`, allowing `leeway` of clock skew.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenExpired`] once `now` is past `exp + leeway`
    /// and [`AuthError::TokenIssuedInFuture`] if `iat` is later than
    /// `now + leeway`.
    pub fn check_times(&self, now: DateTime<Utc>, leeway: Duration) -> Result<(), AuthError> {
        let now = now.timestamp();
        let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);

        if self.exp.saturating_add(leeway) <= now {
            return Err(AuthError::TokenExpired);
        }
        if self.iat > now.saturating_add(leeway) {
            return Err(AuthError::TokenIssuedInFuture);
        }
        Ok(())
    }

    /// Checks the issuer is IAP and, if `expected_audience` is set, the
    /// audience matches it exactly.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidAudience`] on an audience mismatch and
    /// [`AuthError::InvalidTokenFormat`] on a foreign issuer.
    pub fn check_issuer_and_audience(
        &self,
        expected_audience: Option<&str>,
    ) -> Result<(), AuthError> {
        if self.iss != IAP_ISSUER {
            return Err(AuthError::invalid_token_format(format!(
                "unexpected issuer '{}'",
                self.iss
            )));
        }

        if let Some(expected) = expected_audience
            && self.aud != expected
        {
            return Err(AuthError::invalid_audience(format!(
                "expected '{}', got '{}'",
                expected, self.aud
            )));
        }

        Ok(())
    }
}
