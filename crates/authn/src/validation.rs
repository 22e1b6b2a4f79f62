//! JWT header validation.
//!
//! This module provides security checks for the header fields a token uses to
//! select its verification key, ensuring only approved asymmetric algorithms
//! and well-formed key IDs reach the key registry.
//!
//! # Security
//!
//! These validators implement security best practices:
//! - Strict algorithm checks to prevent algorithm substitution attacks
//! - Only asymmetric algorithms are allowed
//! - Symmetric algorithms and "none" are always rejected
//! - Key IDs are bounded before they are used as cache keys or logged

use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted for security reasons.
///
/// These algorithms are blocked because:
/// - `none`: No signature verification (trivially bypassable)
/// - `HS256`, `HS384`, `HS512`: Symmetric algorithms (a published public key must never double as
///   an HMAC secret)
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted JWT algorithms.
///
/// IAP signs its assertions with ES256. The remaining asymmetric algorithms
/// are accepted so the registry can serve any JWKS endpoint; a key still
/// only verifies tokens claiming the exact algorithm it is published for.
pub const ACCEPTED_ALGORITHMS: &[&str] =
    &["ES256", "ES384", "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "EdDSA"];

/// Maximum accepted length of a `kid` header value, in bytes.
pub const MAX_KID_LENGTH: usize = 256;

/// Validate JWT algorithm against security policies.
///
/// This function enforces strict algorithm security per RFC 8725:
/// - ALWAYS rejects symmetric algorithms (HS256, HS384, HS512)
/// - ALWAYS rejects "none" algorithm
/// - Only accepts names in [`ACCEPTED_ALGORITHMS`]
///
/// # Arguments
///
/// * `alg` - The algorithm from the JWT header
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if:
/// - Algorithm is symmetric (HS256, HS384, HS512)
/// - Algorithm is "none"
/// - Algorithm is not in [`ACCEPTED_ALGORITHMS`]
///
/// # Examples
///
/// ```
/// use iap_authn::validation::validate_algorithm;
///
/// // ES256 is accepted
/// let result = validate_algorithm("ES256");
/// assert!(result.is_ok());
///
/// // Symmetric algorithm rejected
/// let result = validate_algorithm("HS256");
/// assert!(result.is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<Algorithm, AuthError> {
    // Check against forbidden algorithms
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    // Check if in accepted list
    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list"
        )));
    }

    Algorithm::from_str(alg).map_err(|_| {
        AuthError::unsupported_algorithm(format!("Algorithm '{alg}' is not recognized"))
    })
}

/// Validate a `kid` header value before it is used for key lookup.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKeyId`] if the key ID is empty, longer than
/// [`MAX_KID_LENGTH`] bytes, or contains control characters.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::invalid_key_id("kid is empty"));
    }
    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::invalid_key_id(format!(
            "kid exceeds {MAX_KID_LENGTH} bytes ({} bytes)",
            kid.len()
        )));
    }
    if kid.chars().any(char::is_control) {
        return Err(AuthError::invalid_key_id("kid contains control characters"));
    }
    Ok(())
}
