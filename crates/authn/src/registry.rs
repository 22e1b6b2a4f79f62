//! Throttled registry of the proxy's published signing keys.
//!
//! This module provides [`KeyRegistry`], which keeps an in-memory copy of the
//! key set served by the JWKS endpoint and resolves public keys by key ID and
//! algorithm.
//!
//! # Architecture
//!
//! ```text
//! JWT arrives → extract kid, alg
//!              → check current snapshot
//!              → miss? download key set via KeySetLoader
//!                      (at most once per retry interval, coalesced)
//!              → swap in the new snapshot wholesale
//!              → check the key's published alg against the token's alg
//!              → convert key material to a DecodingKey
//! ```
//!
//! # Refresh Strategy
//!
//! - **Trigger**: only a `kid` miss triggers a download; hits never touch the network.
//! - **Throttle**: a download is attempted only if no download has succeeded yet, or the last
//!   successful one is older than the retry interval (default 60 seconds). Probing with unknown
//!   key IDs therefore costs the endpoint at most one request per interval.
//! - **Replacement**: a successful download replaces the whole key map and its timestamp in one
//!   atomic swap. Keys missing from the new document stop resolving immediately.
//! - **Failure**: a failed download leaves the map and the timestamp untouched and is only logged.
//!
//! # Concurrency
//!
//! Readers load an [`ArcSwap`] snapshot and never block. Downloads are
//! serialized behind an async mutex; callers that queue behind an in-flight
//! download reuse its result instead of issuing their own.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use iap_authn::{HttpKeySetLoader, KeyRegistry, SystemClock};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = HttpKeySetLoader::new("https://www.gstatic.com/iap/verify/public_key-jwk")?;
//! let registry = KeyRegistry::new(Arc::new(loader), Arc::new(SystemClock));
//!
//! let key = registry.resolve("0oeLcQ", "ES256").await;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use fail::fail_point;
use jsonwebtoken::DecodingKey;

use crate::{
    clock::Clock,
    error::{AuthError, LoadError},
    keyset::{KeyEntry, KeySet},
    loader::KeySetLoader,
    validation::validate_algorithm,
};

/// Default minimum time between key-set downloads (60 seconds).
pub const DEFAULT_MIN_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// One generation of downloaded keys.
///
/// The timestamp travels with the map so a reader can never observe a new
/// map with an old timestamp or the reverse.
#[derive(Debug, Default)]
struct KeyCache {
    keys: HashMap<String, KeyEntry>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Registry of the proxy's published public keys.
///
/// Owns the only copy of the downloaded key set. Inject it (behind an
/// [`Arc`]) into every [`SignatureVerifier`](crate::SignatureVerifier) that
/// should share it.
///
/// # Key Resolution
///
/// A key resolves for `(kid, alg)` only if:
/// - the current key set contains `kid` (after at most one throttled download)
/// - the key's published `alg` equals `alg` exactly
/// - the key material converts into a public key usable with `alg`
pub struct KeyRegistry {
    /// Current key snapshot, replaced wholesale on each successful download.
    cache: ArcSwap<KeyCache>,
    /// Source of the key-set document.
    loader: Arc<dyn KeySetLoader>,
    /// Time source for the throttle.
    clock: Arc<dyn Clock>,
    /// Minimum time between successful downloads.
    min_retry_interval: Duration,
    /// Serializes downloads.
    refresh_lock: tokio::sync::Mutex<()>,
    /// Number of finished download attempts, successful or not.
    ///
    /// Sampled before queueing on `refresh_lock`; a changed value after
    /// acquiring it means a download finished while we waited.
    load_attempts: AtomicU64,
    /// Number of failed download attempts.
    load_failures: AtomicU64,
    /// Error of the most recent finished attempt, cleared by a success.
    last_load_error: ArcSwapOption<LoadError>,
}

impl KeyRegistry {
    /// Creates a registry with an empty cache and the default retry interval.
    #[must_use]
    pub fn new(loader: Arc<dyn KeySetLoader>, clock: Arc<dyn Clock>) -> Self {
        Self::with_min_retry_interval(loader, clock, DEFAULT_MIN_RETRY_INTERVAL)
    }

    /// Creates a registry with an empty cache and a custom retry interval.
    ///
    /// # Arguments
    ///
    /// * `loader` - Source of the key-set document
    /// * `clock` - Time source for the refresh throttle
    /// * `min_retry_interval` - Minimum age of the last successful download before a `kid` miss may
    ///   trigger another one
    #[must_use]
    pub fn with_min_retry_interval(
        loader: Arc<dyn KeySetLoader>,
        clock: Arc<dyn Clock>,
        min_retry_interval: Duration,
    ) -> Self {
        Self {
            cache: ArcSwap::from_pointee(KeyCache::default()),
            loader,
            clock,
            min_retry_interval,
            refresh_lock: tokio::sync::Mutex::new(()),
            load_attempts: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            last_load_error: ArcSwapOption::empty(),
        }
    }

    /// Resolves the public key for `kid`, to be used with `algorithm`.
    ///
    /// Returns `None` when the key is unknown, published for another
    /// algorithm, or has unusable material. The reason is logged; use
    /// [`lookup`](Self::lookup) to receive it.
    pub async fn resolve(&self, kid: &str, algorithm: &str) -> Option<DecodingKey> {
        self.lookup(kid, algorithm).await.ok()
    }

    /// Resolves the public key for `kid`, to be used with `algorithm`.
    ///
    /// Checks the current snapshot first and downloads the key set on a miss,
    /// subject to the retry interval. Download failures are logged and do not
    /// surface here; the lookup proceeds against whatever keys are cached.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `algorithm` is not a known JWS algorithm name ([`AuthError::UnsupportedAlgorithm`])
    /// - No cached key has this `kid` ([`AuthError::KeyNotFound`])
    /// - The key is published for a different algorithm ([`AuthError::AlgorithmMismatch`])
    /// - The key material is unusable for `algorithm` ([`AuthError::InvalidPublicKey`])
    #[tracing::instrument(skip(self))]
    pub async fn lookup(&self, kid: &str, algorithm: &str) -> Result<DecodingKey, AuthError> {
        let parsed_algorithm = validate_algorithm(algorithm)?;

        let entry = match self.cached_entry(kid) {
            Some(entry) => {
                tracing::debug!("cache hit");
                entry
            },
            None => {
                tracing::debug!("cache miss");
                self.refresh_if_stale().await;
                self.cached_entry(kid).ok_or_else(|| {
                    tracing::warn!(kid, "signing key not found");
                    AuthError::key_not_found(kid)
                })?
            },
        };

        if entry.algorithm.as_deref() != Some(algorithm) {
            tracing::warn!(
                kid,
                key_algorithm = entry.algorithm_label(),
                token_algorithm = algorithm,
                "signing key algorithm does not match expected algorithm"
            );
            return Err(AuthError::algorithm_mismatch(kid, entry.algorithm_label(), algorithm));
        }

        entry.to_decoding_key(parsed_algorithm).inspect_err(|err| {
            tracing::warn!(kid, error = %err, "public key extraction failed");
        })
    }

    /// Downloads the key set now unless the throttle forbids it.
    ///
    /// Intended for startup, so the first request does not pay for the
    /// download. Returns the number of cached keys afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeySetLoad`] if the download this call performed,
    /// or the concurrent one it waited for, failed. A throttled call succeeds
    /// with the current count.
    pub async fn warm(&self) -> Result<usize, AuthError> {
        match self.refresh_if_stale().await {
            RefreshOutcome::Failed(err) | RefreshOutcome::Coalesced(Err(err)) => {
                Err(AuthError::KeySetLoad(err))
            },
            RefreshOutcome::Refreshed
            | RefreshOutcome::Throttled
            | RefreshOutcome::Coalesced(Ok(())) => Ok(self.key_count()),
        }
    }

    /// Number of keys in the current snapshot.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.cache.load().keys.len()
    }

    /// Time of the last successful download, if any.
    #[must_use]
    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.cache.load().refreshed_at
    }

    /// Number of download attempts finished so far.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.load_attempts.load(Ordering::Relaxed)
    }

    /// Number of download attempts that failed so far.
    #[must_use]
    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    /// The configured minimum time between downloads.
    #[must_use]
    pub fn min_retry_interval(&self) -> Duration {
        self.min_retry_interval
    }

    fn cached_entry(&self, kid: &str) -> Option<KeyEntry> {
        self.cache.load().keys.get(kid).cloned()
    }

    /// Whether the throttle currently allows a download.
    fn is_stale(&self) -> bool {
        let Some(refreshed_at) = self.cache.load().refreshed_at else {
            return true;
        };
        // A clock that moved backwards yields a negative delta, which is
        // treated as "not elapsed".
        (self.clock.now() - refreshed_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed > self.min_retry_interval)
    }

    #[tracing::instrument(skip(self))]
    async fn refresh_if_stale(&self) -> RefreshOutcome {
        if !self.is_stale() {
            tracing::debug!("key set refresh throttled");
            return RefreshOutcome::Throttled;
        }

        let observed_attempts = self.load_attempts.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.load_attempts.load(Ordering::Acquire) != observed_attempts {
            tracing::debug!("key set refresh coalesced with a concurrent download");
            return RefreshOutcome::Coalesced(match self.last_load_error.load_full() {
                Some(err) => Err(LoadError::clone(&err)),
                None => Ok(()),
            });
        }
        // Another download may have succeeded between the first check and
        // acquiring the lock.
        if !self.is_stale() {
            tracing::debug!("key set refresh throttled");
            return RefreshOutcome::Throttled;
        }

        let outcome = match self.load_key_set().await {
            Ok(key_set) => {
                let keys = key_set.into_key_map();
                let key_count = keys.len();
                let refreshed_at = self.clock.now();
                self.cache.store(Arc::new(KeyCache { keys, refreshed_at: Some(refreshed_at) }));
                self.last_load_error.store(None);
                tracing::info!(key_count, %refreshed_at, "key set refreshed");
                RefreshOutcome::Refreshed
            },
            Err(err) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "key set download failed; keeping cached keys");
                self.last_load_error.store(Some(Arc::new(err.clone())));
                RefreshOutcome::Failed(err)
            },
        };
        // Publish completion only after the snapshot is stored.
        self.load_attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn load_key_set(&self) -> Result<KeySet, LoadError> {
        fail_point!("registry-before-keyset-fetch", |_| {
            Err(LoadError::internal("injected failure before key set fetch"))
        });
        self.loader.load().await
    }
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.load();
        f.debug_struct("KeyRegistry")
            .field("cached_keys", &cache.keys.len())
            .field("refreshed_at", &cache.refreshed_at)
            .field("min_retry_interval", &self.min_retry_interval)
            .field("load_attempts", &self.load_count())
            .finish()
    }
}

/// What a call to `refresh_if_stale` did.
#[derive(Debug)]
enum RefreshOutcome {
    Refreshed,
    Throttled,
    /// Waited for another caller's download; carries its result.
    Coalesced(Result<(), LoadError>),
    Failed(LoadError),
}
