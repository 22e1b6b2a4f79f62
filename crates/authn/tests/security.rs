//! Security-focused verification tests.
//!
//! These tests drive the whole pipeline (registry, loader, verifier) against
//! common JWT attack vectors: missing header fields, algorithm substitution,
//! algorithm confusion, tampered signatures, key rotation and key-ID probing
//! of the key endpoint.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use iap_authn::{
    Clock, KeyRegistry, KeySet, SignatureVerifier, SignedToken, assert_auth_error,
    error::AuthError,
    testutil::{
        ManualClock, MockKeySetLoader, TestKeyPair, craft_raw_jwt, generate_ed25519_keypair,
        generate_es256_keypair, generate_es384_keypair, iap_claims, sign_token,
    },
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const AUDIENCE: &str = "/projects/42/apps/demo";

struct Harness {
    loader: Arc<MockKeySetLoader>,
    clock: Arc<ManualClock>,
    registry: Arc<KeyRegistry>,
    verifier: SignatureVerifier,
}

fn harness(pairs: &[&TestKeyPair]) -> Harness {
    let loader = Arc::new(MockKeySetLoader::new(key_set(pairs)));
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(KeyRegistry::new(loader.clone(), clock.clone()));
    let verifier = SignatureVerifier::new(registry.clone(), clock.clone());
    Harness { loader, clock, registry, verifier }
}

fn key_set(pairs: &[&TestKeyPair]) -> KeySet {
    KeySet { keys: pairs.iter().map(|p| p.entry.clone()).collect() }
}

fn signed(pair: &TestKeyPair, clock: &ManualClock) -> SignedToken {
    SignedToken::parse(&sign_token(pair, &iap_claims(clock.now(), AUDIENCE))).expect("parse")
}

// ---------------------------------------------------------------------------
// Header checks happen before any download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn absent_token_is_invalid_without_loader_call() {
    let h = harness(&[]);

    assert!(!h.verifier.validate(None).await);
    assert_auth_error!(h.verifier.verify(None).await, MissingToken);
    assert_eq!(h.loader.calls(), 0);
}

#[tokio::test]
async fn missing_or_null_algorithm_is_invalid_without_loader_call() {
    let h = harness(&[]);

    for header in [json!({"kid": "k1"}), json!({"alg": null, "kid": "k1"})] {
        let token = SignedToken::parse(&craft_raw_jwt(&header, &json!({}))).unwrap();
        assert!(!h.verifier.validate(Some(&token)).await);
        assert_auth_error!(h.verifier.verify(Some(&token)).await, MissingAlgorithm);
    }
    assert_eq!(h.loader.calls(), 0);
}

#[tokio::test]
async fn missing_or_null_key_id_is_invalid_without_loader_call() {
    let h = harness(&[]);

    for header in [json!({"alg": "ES256"}), json!({"alg": "ES256", "kid": null})] {
        let token = SignedToken::parse(&craft_raw_jwt(&header, &json!({}))).unwrap();
        assert!(!h.verifier.validate(Some(&token)).await);
        assert_auth_error!(h.verifier.verify(Some(&token)).await, MissingKeyId);
    }
    assert_eq!(h.loader.calls(), 0);
}

#[tokio::test]
async fn alg_none_rejected_without_loader_call() {
    let h = harness(&[]);

    let raw = craft_raw_jwt(&json!({"alg": "none", "kid": "k1"}), &json!({"sub": "admin"}));
    let token = SignedToken::parse(&raw).unwrap();

    assert_auth_error!(h.verifier.verify(Some(&token)).await, UnsupportedAlgorithm);
    assert_eq!(h.loader.calls(), 0);
}

#[tokio::test]
async fn hmac_with_public_key_as_secret_rejected() {
    // Algorithm confusion: sign with HS256 using the published key bytes as
    // the HMAC secret.
    let pair = generate_es256_keypair("k1");
    let h = harness(&[&pair]);

    let secret = URL_SAFE_NO_PAD.decode(pair.entry.x.as_deref().unwrap()).unwrap();
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".into());
    let raw = jsonwebtoken::encode(
        &header,
        &iap_claims(h.clock.now(), AUDIENCE),
        &EncodingKey::from_secret(&secret),
    )
    .unwrap();
    let token = SignedToken::parse(&raw).unwrap();

    assert!(!h.verifier.validate(Some(&token)).await);
    assert_auth_error!(h.verifier.verify(Some(&token)).await, UnsupportedAlgorithm);
    assert_eq!(h.loader.calls(), 0);
}

#[tokio::test]
async fn control_characters_in_kid_rejected_without_loader_call() {
    let h = harness(&[]);

    let raw = craft_raw_jwt(&json!({"alg": "ES256", "kid": "k1\r\nX-Injected: 1"}), &json!({}));
    let token = SignedToken::parse(&raw).unwrap();

    assert_auth_error!(h.verifier.verify(Some(&token)).await, InvalidKeyId);
    assert_eq!(h.loader.calls(), 0);
}

// ---------------------------------------------------------------------------
// Signature checks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cached_key_with_matching_algorithm_validates() {
    let pair = generate_es256_keypair("k1");
    let h = harness(&[&pair]);

    let token = signed(&pair, &h.clock);
    assert!(h.verifier.validate(Some(&token)).await);
    assert_eq!(h.loader.calls(), 1);
}

#[tokio::test]
async fn ed25519_key_validates() {
    let pair = generate_ed25519_keypair("ed-1");
    let h = harness(&[&pair]);

    let token = signed(&pair, &h.clock);
    assert!(h.verifier.validate(Some(&token)).await);
}

#[tokio::test]
async fn algorithm_substitution_rejected_before_signature_check() {
    // k1 is published for ES256. A token naming k1 but claiming ES384 must
    // be refused at key resolution, even though it is genuinely signed.
    let published = generate_es256_keypair("k1");
    let attacker = generate_es384_keypair("k1");
    let h = harness(&[&published]);

    let token = signed(&attacker, &h.clock);
    assert_eq!(token.algorithm.as_deref(), Some("ES384"));

    assert!(!h.verifier.validate(Some(&token)).await);
    let err = h.verifier.verify(Some(&token)).await.unwrap_err();
    match err {
        AuthError::AlgorithmMismatch { kid, key_algorithm, token_algorithm } => {
            assert_eq!(kid, "k1");
            assert_eq!(key_algorithm, "ES256");
            assert_eq!(token_algorithm, "ES384");
        },
        other => panic!("expected AlgorithmMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn tampered_signature_is_invalid() {
    let pair = generate_es256_keypair("k1");
    let h = harness(&[&pair]);

    let mut token = signed(&pair, &h.clock);
    let mut signature = URL_SAFE_NO_PAD.decode(&token.signature).unwrap();
    signature[10] ^= 0x01;
    token.signature = URL_SAFE_NO_PAD.encode(&signature);

    assert!(!h.verifier.validate(Some(&token)).await);
    assert_auth_error!(h.verifier.verify(Some(&token)).await, InvalidSignature);
}

#[tokio::test]
async fn signature_from_unpublished_key_with_known_kid_is_invalid() {
    let published = generate_es256_keypair("k1");
    let impostor = generate_es256_keypair("k1");
    let h = harness(&[&published]);

    let token = signed(&impostor, &h.clock);
    assert_auth_error!(h.verifier.verify(Some(&token)).await, InvalidSignature);
}

// ---------------------------------------------------------------------------
// Registry behaviour through the verifier
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resolve_downloads_once_then_serves_from_cache() {
    let pair = generate_es256_keypair("k1");
    let h = harness(&[&pair]);

    assert_eq!(h.registry.key_count(), 0);
    assert!(h.registry.resolve("k1", "ES256").await.is_some());
    assert_eq!(h.loader.calls(), 1);

    assert!(h.registry.resolve("k1", "ES256").await.is_some());
    assert_eq!(h.loader.calls(), 1);
}

#[tokio::test]
async fn unknown_key_becomes_resolvable_after_refresh() {
    let old = generate_es256_keypair("old");
    let new = generate_es256_keypair("new");
    let h = harness(&[&old]);

    assert!(h.verifier.validate(Some(&signed(&old, &h.clock))).await);

    // The endpoint starts publishing a new key.
    h.loader.set_key_set(key_set(&[&old, &new]));
    h.clock.advance(Duration::from_secs(61));

    assert!(h.verifier.validate(Some(&signed(&new, &h.clock))).await);
    assert_eq!(h.loader.calls(), 2);
}

#[tokio::test]
async fn probing_unknown_kids_is_throttled() {
    let pair = generate_es256_keypair("k1");
    let h = harness(&[&pair]);

    for i in 0..20 {
        assert!(h.registry.resolve(&format!("probe-{i}"), "ES256").await.is_none());
    }
    assert_eq!(h.loader.calls(), 1, "20 probes inside one interval must download once");

    h.clock.advance(Duration::from_secs(61));
    assert!(h.registry.resolve("probe-again", "ES256").await.is_none());
    assert_eq!(h.loader.calls(), 2);
}

#[tokio::test]
async fn rotated_out_key_stops_validating() {
    let old = generate_es256_keypair("old");
    let new = generate_es256_keypair("new");
    let h = harness(&[&old]);

    let old_token = signed(&old, &h.clock);
    assert!(h.verifier.validate(Some(&old_token)).await);

    h.loader.set_key_set(key_set(&[&new]));
    h.clock.advance(Duration::from_secs(61));
    assert!(h.verifier.validate(Some(&signed(&new, &h.clock))).await);

    assert!(!h.verifier.validate(Some(&old_token)).await);
    assert_auth_error!(h.verifier.verify(Some(&old_token)).await, KeyNotFound);
}

#[tokio::test]
async fn endpoint_outage_keeps_cached_keys_valid() {
    let pair = generate_es256_keypair("k1");
    let h = harness(&[&pair]);
    assert!(h.verifier.validate(Some(&signed(&pair, &h.clock))).await);

    h.loader.fail();
    h.clock.advance(Duration::from_secs(61));

    // A miss triggers a failing download...
    assert!(h.registry.resolve("unknown", "ES256").await.is_none());
    assert_eq!(h.registry.load_failures(), 1);

    // ...and the cached key still verifies.
    assert!(h.verifier.validate(Some(&signed(&pair, &h.clock))).await);
}

#[tokio::test]
async fn concurrent_verifications_share_one_download() {
    let pair = generate_es256_keypair("k1");
    let loader =
        Arc::new(MockKeySetLoader::new(key_set(&[&pair])).with_delay(Duration::from_millis(50)));
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(KeyRegistry::new(loader.clone(), clock.clone()));
    let verifier = Arc::new(SignatureVerifier::new(registry, clock.clone()));
    let token = Arc::new(signed(&pair, &clock));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let verifier = Arc::clone(&verifier);
            let token = Arc::clone(&token);
            tokio::spawn(async move { verifier.validate(Some(&token)).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.expect("task panicked"));
    }
    assert_eq!(loader.calls(), 1);
}

// ---------------------------------------------------------------------------
// Full assertion checks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_assertion_rejected() {
    let pair = generate_es256_keypair("k1");
    let h = harness(&[&pair]);

    let raw = sign_token(&pair, &iap_claims(h.clock.now(), AUDIENCE));
    h.clock.advance(Duration::from_secs(3600));

    assert_auth_error!(h.verifier.verify_assertion(&raw).await, TokenExpired);
    assert!(h.verifier.authenticate(Some(&raw)).await.is_none());
}

#[tokio::test]
async fn assertion_from_the_future_rejected() {
    let pair = generate_es256_keypair("k1");
    let h = harness(&[&pair]);

    let issued = h.clock.now() + chrono::Duration::minutes(5);
    let raw = sign_token(&pair, &iap_claims(issued, AUDIENCE));

    assert_auth_error!(h.verifier.verify_assertion(&raw).await, TokenIssuedInFuture);
}

#[tokio::test]
async fn assertion_for_another_app_rejected() {
    let pair = generate_es256_keypair("k1");
    let h = harness(&[&pair]);
    let verifier = h.verifier.clone().with_expected_audience(AUDIENCE);

    let raw = sign_token(&pair, &iap_claims(h.clock.now(), "/projects/7/apps/other"));
    assert_auth_error!(verifier.verify_assertion(&raw).await, InvalidAudience);

    let raw = sign_token(&pair, &iap_claims(h.clock.now(), AUDIENCE));
    let claims = verifier.authenticate(Some(&raw)).await.expect("authenticated");
    assert_eq!(claims.email, "user@example.com");
}

#[tokio::test]
async fn malformed_assertions_rejected() {
    let h = harness(&[]);

    for raw in ["", ".", "..", "...", "not-a-jwt", "a.b.c.d", "eyJhbGciOiJFUzI1NiJ9.e30"] {
        assert!(h.verifier.authenticate(Some(raw)).await.is_none(), "accepted {raw:?}");
    }
    assert_eq!(h.loader.calls(), 0);
}
