//! Published key-set document (JWKS, RFC 7517 §5).
//!
//! [`KeySet`] is the deserialized form of the document the key endpoint
//! serves. It only lives for the duration of a load: the registry flattens it
//! into a `kid → KeyEntry` map with [`KeySet::into_key_map`] and drops it.
//!
//! Key material stays in its published (base64url) form inside the cache and
//! is turned into a [`DecodingKey`] on demand by
//! [`KeyEntry::to_decoding_key`], which also binds the key type and curve to
//! the algorithm the caller intends to verify with.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, VerifyingKey};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Coordinate length in bytes of a P-256 point.
const P256_COORDINATE_LENGTH: usize = 32;

/// Coordinate length in bytes of a P-384 point.
const P384_COORDINATE_LENGTH: usize = 48;

/// A key-set document: `{"keys": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    /// Published keys, in document order.
    pub keys: Vec<KeyEntry>,
}

/// One published key.
///
/// Every field other than `kty` is optional at the document level; entries
/// that lack what a lookup needs are rejected later, when they are used.
/// Unknown members (`x5c`, `key_ops`, ...) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Key ID (`kid`).
    #[serde(rename = "kid", default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Algorithm the key is published for (`alg`).
    #[serde(rename = "alg", default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Key type: `EC`, `RSA` or `OKP`.
    pub kty: String,
    /// Intended use (`sig` / `enc`).
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Curve name for `EC` (`P-256`, `P-384`) and `OKP` (`Ed25519`) keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// Base64url x coordinate (`EC`) or public key (`OKP`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// Base64url y coordinate (`EC`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Base64url RSA modulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Base64url RSA public exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl KeySet {
    /// Flattens the document into a `kid → entry` map.
    ///
    /// Entries without a `kid` cannot be selected by a token and are dropped.
    /// Entries published for a use other than `sig` are dropped. When a `kid`
    /// appears more than once the first occurrence wins.
    #[must_use]
    pub fn into_key_map(self) -> HashMap<String, KeyEntry> {
        let mut keys = HashMap::with_capacity(self.keys.len());
        for entry in self.keys {
            let Some(kid) = entry.key_id.clone() else {
                tracing::debug!(kty = %entry.kty, "skipping published key without kid");
                continue;
            };
            if let Some(key_use) = entry.key_use.as_deref()
                && key_use != "sig"
            {
                tracing::debug!(kid = %kid, key_use, "skipping key not meant for signatures");
                continue;
            }
            if keys.contains_key(&kid) {
                tracing::warn!(kid = %kid, "duplicate kid in key set; keeping first occurrence");
                continue;
            }
            keys.insert(kid, entry);
        }
        keys
    }
}

impl KeyEntry {
    /// Returns the recorded algorithm, or `"<none>"` for logging.
    #[must_use]
    pub fn algorithm_label(&self) -> &str {
        self.algorithm.as_deref().unwrap_or("<none>")
    }

    /// Converts the published material into a key that can verify `algorithm`.
    ///
    /// The key type (and curve, for elliptic-curve keys) must be the one the
    /// algorithm requires, and the material must describe a valid public key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPublicKey`] if the key type does not fit
    /// the algorithm, a required member is missing, a member is not valid
    /// base64url, or the decoded point / modulus is not a usable public key.
    pub fn to_decoding_key(&self, algorithm: Algorithm) -> Result<DecodingKey, AuthError> {
        match algorithm {
            Algorithm::ES256 => self.ec_decoding_key("P-256", P256_COORDINATE_LENGTH),
            Algorithm::ES384 => self.ec_decoding_key("P-384", P384_COORDINATE_LENGTH),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => self.rsa_decoding_key(),
            Algorithm::EdDSA => self.okp_decoding_key(),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Err(
                AuthError::invalid_public_key("symmetric algorithms have no public key"),
            ),
        }
    }

    fn expect_kty(&self, kty: &str) -> Result<(), AuthError> {
        if self.kty != kty {
            return Err(AuthError::invalid_public_key(format!(
                "expected key type {kty}, got {}",
                self.kty
            )));
        }
        Ok(())
    }

    fn member<'a>(&self, value: &'a Option<String>, name: &str) -> Result<&'a str, AuthError> {
        value.as_deref().ok_or_else(|| {
            AuthError::invalid_public_key(format!("{} key missing '{name}'", self.kty))
        })
    }

    fn ec_decoding_key(
        &self,
        curve: &str,
        coordinate_length: usize,
    ) -> Result<DecodingKey, AuthError> {
        self.expect_kty("EC")?;
        let crv = self.member(&self.crv, "crv")?;
        if crv != curve {
            return Err(AuthError::invalid_public_key(format!(
                "expected curve {curve}, got {crv}"
            )));
        }
        let x = self.member(&self.x, "x")?;
        let y = self.member(&self.y, "y")?;

        let x_bytes = decode_coordinate(x, "x", coordinate_length)?;
        let y_bytes = decode_coordinate(y, "y", coordinate_length)?;

        // Uncompressed SEC1 encoding: 0x04 || x || y
        let mut sec1 = Vec::with_capacity(1 + 2 * coordinate_length);
        sec1.push(0x04);
        sec1.extend_from_slice(&x_bytes);
        sec1.extend_from_slice(&y_bytes);

        let on_curve = match coordinate_length {
            P256_COORDINATE_LENGTH => p256::PublicKey::from_sec1_bytes(&sec1).is_ok(),
            _ => p384::PublicKey::from_sec1_bytes(&sec1).is_ok(),
        };
        if !on_curve {
            return Err(AuthError::invalid_public_key(format!("point is not on curve {curve}")));
        }

        DecodingKey::from_ec_components(x, y)
            .map_err(|e| AuthError::invalid_public_key(format!("invalid EC key: {e}")))
    }

    fn rsa_decoding_key(&self) -> Result<DecodingKey, AuthError> {
        self.expect_kty("RSA")?;
        let n = self.member(&self.n, "n")?;
        let e = self.member(&self.e, "e")?;
        DecodingKey::from_rsa_components(n, e)
            .map_err(|err| AuthError::invalid_public_key(format!("invalid RSA key: {err}")))
    }

    fn okp_decoding_key(&self) -> Result<DecodingKey, AuthError> {
        self.expect_kty("OKP")?;
        let crv = self.member(&self.crv, "crv")?;
        if crv != "Ed25519" {
            return Err(AuthError::invalid_public_key(format!(
                "expected curve Ed25519, got {crv}"
            )));
        }
        let x = self.member(&self.x, "x")?;
        let bytes = decode_coordinate(x, "x", PUBLIC_KEY_LENGTH)?;
        let key_bytes: [u8; PUBLIC_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::invalid_public_key("failed to convert bytes"))?;
        VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| AuthError::invalid_public_key(format!("invalid Ed25519 key: {e}")))?;

        DecodingKey::from_ed_components(x)
            .map_err(|e| AuthError::invalid_public_key(e.to_string()))
    }
}

fn decode_coordinate(value: &str, name: &str, expected_len: usize) -> Result<Vec<u8>, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.as_bytes())
        .map_err(|e| AuthError::invalid_public_key(format!("base64 decode of '{name}': {e}")))?;
    if bytes.len() != expected_len {
        return Err(AuthError::invalid_public_key(format!(
            "'{name}': expected {expected_len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}
