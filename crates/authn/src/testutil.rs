//! Shared test utilities for IAP assertion testing.
//!
//! This module provides helpers for generating signing key pairs together
//! with their published key-set entries, signing assertions, crafting raw
//! JWT strings (for attack testing), a scriptable [`MockKeySetLoader`] and a
//! steppable [`ManualClock`]. It is feature-gated behind `testutil` to
//! prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! iap-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use iap_authn::testutil::{generate_es256_keypair, sign_token};
//! ```

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use rand_core::OsRng;
use ring::{
    rand::SystemRandom,
    signature::{
        ECDSA_P256_SHA256_FIXED_SIGNING, ECDSA_P384_SHA384_FIXED_SIGNING, EcdsaKeyPair,
        EcdsaSigningAlgorithm, KeyPair,
    },
};
use serde_json::json;

use crate::{
    clock::Clock,
    error::LoadError,
    keyset::{KeyEntry, KeySet},
    loader::KeySetLoader,
    token::IAP_ISSUER,
};

/// A freshly generated signing key and the key-set entry that publishes it.
#[derive(Clone)]
pub struct TestKeyPair {
    /// Key ID written into signed tokens and the published entry.
    pub kid: String,
    /// Algorithm the key signs with.
    pub algorithm: Algorithm,
    /// Private half, for [`sign_token`].
    pub encoding_key: EncodingKey,
    /// Public half, as the JWKS endpoint would serve it.
    pub entry: KeyEntry,
}

/// Generates a P-256 key pair published for `ES256`.
///
/// Each call generates a fresh random key pair.
///
/// # Panics
///
/// Panics if the system random source fails.
pub fn generate_es256_keypair(kid: &str) -> TestKeyPair {
    generate_ec_keypair(kid, Algorithm::ES256, &ECDSA_P256_SHA256_FIXED_SIGNING, "P-256", 32)
}

/// Generates a P-384 key pair published for `ES384`.
///
/// # Panics
///
/// Panics if the system random source fails.
pub fn generate_es384_keypair(kid: &str) -> TestKeyPair {
    generate_ec_keypair(kid, Algorithm::ES384, &ECDSA_P384_SHA384_FIXED_SIGNING, "P-384", 48)
}

fn generate_ec_keypair(
    kid: &str,
    algorithm: Algorithm,
    signing: &'static EcdsaSigningAlgorithm,
    curve: &str,
    coordinate_len: usize,
) -> TestKeyPair {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(signing, &rng).expect("generate EC key");
    let key_pair =
        EcdsaKeyPair::from_pkcs8(signing, pkcs8.as_ref(), &rng).expect("parse generated EC key");

    // Uncompressed SEC1 point: 0x04 || x || y
    let point = key_pair.public_key().as_ref();
    let x = &point[1..=coordinate_len];
    let y = &point[1 + coordinate_len..];

    let entry = KeyEntry {
        key_id: Some(kid.to_string()),
        algorithm: Some(format!("{algorithm:?}")),
        kty: "EC".into(),
        key_use: Some("sig".into()),
        crv: Some(curve.into()),
        x: Some(URL_SAFE_NO_PAD.encode(x)),
        y: Some(URL_SAFE_NO_PAD.encode(y)),
        ..KeyEntry::default()
    };

    TestKeyPair {
        kid: kid.to_string(),
        algorithm,
        encoding_key: EncodingKey::from_ec_der(pkcs8.as_ref()),
        entry,
    }
}

/// Generates an Ed25519 key pair published for `EdDSA`.
pub fn generate_ed25519_keypair(kid: &str) -> TestKeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key = signing_key.verifying_key().to_bytes();

    let mut pkcs8_der = vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ];
    pkcs8_der.extend_from_slice(&signing_key.to_bytes());

    let entry = KeyEntry {
        key_id: Some(kid.to_string()),
        algorithm: Some("EdDSA".into()),
        kty: "OKP".into(),
        key_use: Some("sig".into()),
        crv: Some("Ed25519".into()),
        x: Some(URL_SAFE_NO_PAD.encode(public_key)),
        ..KeyEntry::default()
    };

    TestKeyPair {
        kid: kid.to_string(),
        algorithm: Algorithm::EdDSA,
        encoding_key: EncodingKey::from_ed_der(&pkcs8_der),
        entry,
    }
}

/// Signs `claims` with `pair`, setting `alg` and `kid` in the header.
///
/// # Panics
///
/// Panics if JWT encoding fails (should not happen with valid inputs).
pub fn sign_token(pair: &TestKeyPair, claims: &serde_json::Value) -> String {
    let mut header = Header::new(pair.algorithm);
    header.kid = Some(pair.kid.clone());
    jsonwebtoken::encode(&header, claims, &pair.encoding_key).expect("Failed to encode test JWT")
}

/// Builds IAP-shaped claims issued at `now`, expiring ten minutes later.
pub fn iap_claims(now: DateTime<Utc>, audience: &str) -> serde_json::Value {
    let now = now.timestamp();
    json!({
        "iss": IAP_ISSUER,
        "sub": "accounts.google.com:1234567890",
        "aud": audience,
        "email": "user@example.com",
        "exp": now + 600,
        "iat": now,
    })
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// [`KeySetLoader`] serving a scripted key set, counting every call.
///
/// Switch what it serves with [`set_key_set`](Self::set_key_set) and
/// [`fail`](Self::fail). An optional delay keeps each load in flight long
/// enough for concurrency tests to pile up behind it.
#[derive(Debug, Default)]
pub struct MockKeySetLoader {
    key_set: Mutex<Option<KeySet>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockKeySetLoader {
    /// Creates a loader that serves `key_set`.
    pub fn new(key_set: KeySet) -> Self {
        Self { key_set: Mutex::new(Some(key_set)), ..Self::default() }
    }

    /// Creates a loader whose every call fails.
    pub fn failing() -> Self {
        Self::default()
    }

    /// Makes each load take `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serves `key_set` from the next call on.
    pub fn set_key_set(&self, key_set: KeySet) {
        *self.key_set.lock() = Some(key_set);
    }

    /// Fails every call from the next one on.
    pub fn fail(&self) {
        *self.key_set.lock() = None;
    }

    /// Number of loads started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetLoader for MockKeySetLoader {
    async fn load(&self) -> Result<KeySet, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let served = self.key_set.lock().clone();
        served.ok_or_else(|| LoadError::connection("mock key set endpoint unavailable"))
    }
}

/// [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock reading 2024-01-01T00:00:00Z.
    ///
    /// # Panics
    ///
    /// Never in practice; the start instant is a valid timestamp.
    pub fn new() -> Self {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid start time");
        Self { now: Mutex::new(start) }
    }

    /// Moves the clock forward by `by`.
    ///
    /// # Panics
    ///
    /// Panics if `by` does not fit a `chrono::Duration`.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).expect("duration in range");
        *self.now.lock() += by;
    }

    /// Moves the clock backwards by `by`.
    ///
    /// # Panics
    ///
    /// Panics if `by` does not fit a `chrono::Duration`.
    pub fn rewind(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).expect("duration in range");
        *self.now.lock() -= by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Asserts that a [`Result<T, AuthError>`] is an `Err` matching the given [`AuthError`] variant.
///
/// Works with any `AuthError` variant and any `Ok` type; the result is
/// evaluated once. On failure, prints the expected variant and the actual
/// error (the `Ok` value is shown as `Ok(())`).
///
/// [`AuthError`]: crate::error::AuthError
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use iap_authn::assert_auth_error;
/// use iap_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            result.as_ref().map(|_| ()),
        );
    }};
    ($result:expr, $variant:ident, $msg:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            result.as_ref().map(|_| ()),
        );
    }};
}
