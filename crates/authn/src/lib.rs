//! # IAP Authentication
//!
//! Verification of the signed assertions Google's Identity-Aware Proxy adds
//! to every request it forwards.
//!
//! This crate provides:
//! - **Key registry**: in-memory copy of IAP's published signing keys, refreshed on a key-ID miss
//!   and throttled to one download per retry interval
//! - **Signature verification**: header checks, key resolution and signature checks with a
//!   fail-closed outcome
//! - **Algorithm validation**: security checks for JWT algorithms
//!
//! ## Features
//!
//! - Only asymmetric algorithms are supported; a key only verifies tokens claiming the exact
//!   algorithm it is published for
//! - Symmetric algorithms (HS256, etc.) and `none` are explicitly rejected
//! - Unknown key IDs cannot make the registry hammer the key endpoint
//!
//! ## Example
//!
//! ```no_run
//! use iap_authn::{IAP_JWT_HEADER, IapAuthConfig};
//!
//! # async fn example(header_value: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = IapAuthConfig::builder()
//!     .expected_audience("/projects/123/apps/my-app")
//!     .build()?
//!     .into_verifier()?;
//!
//! // `header_value` is the request's `x-goog-iap-jwt-assertion` header
//! match verifier.authenticate(header_value).await {
//!     Some(claims) => println!("authenticated {}", claims.email),
//!     None => println!("rejected request without a valid {IAP_JWT_HEADER}"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Time source for the refresh throttle.
pub mod clock;
/// Verifier configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Published key-set documents and key material.
pub mod keyset;
/// Key-set download.
pub mod loader;
/// Throttled signing key registry.
pub mod registry;
/// Test helpers (feature `testutil`).
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic, missing_docs)]
pub mod testutil;
/// Compact token parsing and IAP claims.
pub mod token;
/// Algorithm and key ID validation.
pub mod validation;
/// Signature verification.
pub mod verifier;

// Re-export key types for convenience
pub use clock::{Clock, SystemClock};
pub use config::{DEFAULT_JWKS_URL, IapAuthConfig};
pub use error::{AuthError, LoadError, Result};
pub use keyset::{KeyEntry, KeySet};
pub use loader::{HttpKeySetLoader, KeySetLoader};
pub use registry::{DEFAULT_MIN_RETRY_INTERVAL, KeyRegistry};
pub use token::{IAP_ISSUER, IapClaims, SignedToken};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm, validate_kid};
pub use verifier::{DEFAULT_LEEWAY, IAP_JWT_HEADER, SignatureVerifier};
