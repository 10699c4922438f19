//! Shared, coalescing key cache in front of a [`KeySource`]
//!
//! # Caching policy
//!
//! - **Lock-free reads**: the current [`KeySet`] lives in an `ArcSwapOption`; a hit is
//!   one atomic load and a hash lookup.
//! - **Refresh on miss**: an unknown key id triggers exactly one synchronous refresh
//!   before it is reported as not found. This picks up issuer key rotation without
//!   waiting for the TTL.
//! - **Stale-while-revalidate**: a hit on a set older than the TTL is served at once
//!   and a background refresh is started. Background refreshes are spaced by
//!   `min_refresh_interval`, or by the smaller of the TTL and
//!   [`DEFAULT_REVALIDATE_BACKOFF`] when it is unset, so a failing issuer is not
//!   fetched on every hit.
//! - **Single flight**: at most one fetch is outstanding per provider; every caller
//!   that needs a refresh meanwhile awaits that same fetch and sees its outcome.
//! - **Last known good**: a failed refresh never clears the cached set.
//!
//! Fetches run in their own tokio task under `fetch_timeout`, so callers that give up
//! (request cancelled) neither abort the fetch nor leave it stuck for later callers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{HttpKeySource, Key, KeySet, KeySource};
use crate::error::{ConfigError, KeyFetchError, KeyLookupError};
use crate::metrics;

/// Default cache TTL (10 minutes)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default bound on a single JWKS fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the spacing of background revalidations of a stale set
pub const DEFAULT_REVALIDATE_BACKOFF: Duration = Duration::from_secs(5);

type FetchOutcome = Result<Arc<KeySet>, KeyFetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Cache and refresh policy of a [`KeyProvider`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Age after which a cached set is revalidated in the background
    pub cache_ttl: Duration,
    /// Bound on one fetch; exceeding it fails the refresh with a timeout
    pub fetch_timeout: Duration,
    /// When set, a miss within this interval of the previous fetch is answered from
    /// the cached set without fetching again; also spaces background revalidations
    pub min_refresh_interval: Option<Duration>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            min_refresh_interval: None,
        }
    }
}

/// Point-in-time provider counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    /// Lookups answered from the cached set
    pub cache_hits: u64,
    /// Lookups that needed a refresh
    pub cache_misses: u64,
    /// Fetches issued to the key source
    pub fetches: u64,
    /// Fetches that failed or timed out
    pub fetch_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
}

/// Supplies keys for one issuer, hiding fetch, cache and refresh policy
///
/// Cheap to clone; clones share the same cache.
///
/// # Example
///
/// ```rust,no_run
/// # use keyfence::jwks::KeyProvider;
/// # tokio_test::block_on(async {
/// let provider = KeyProvider::http(
///     "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Example/.well-known/jwks.json",
///     Default::default(),
/// )?;
///
/// let key = provider.key_for("key-id-123").await?;
/// println!("resolved {} key", key.family());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Clone)]
pub struct KeyProvider {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn KeySource>,
    settings: ProviderSettings,
    current: ArcSwapOption<KeySet>,
    in_flight: Mutex<Option<SharedFetch>>,
    last_fetch: Mutex<Option<Instant>>,
    counters: Counters,
}

impl fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProvider")
            .field("source", &self.inner.source)
            .field("settings", &self.inner.settings)
            .field(
                "cached_keys",
                &self.inner.current.load().as_ref().map(|set| set.len()),
            )
            .finish_non_exhaustive()
    }
}

impl KeyProvider {
    /// Create a provider over `source` with the given policy
    pub fn new(source: impl KeySource + 'static, settings: ProviderSettings) -> Self {
        Self::from_source(Arc::new(source), settings)
    }

    /// Create a provider over a shared source
    pub fn from_source(source: Arc<dyn KeySource>, settings: ProviderSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                settings,
                current: ArcSwapOption::empty(),
                in_flight: Mutex::new(None),
                last_fetch: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    /// Create a provider that fetches `jwks_url` over HTTP(S)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is invalid or the HTTP client cannot be built.
    pub fn http(jwks_url: &str, settings: ProviderSettings) -> Result<Self, ConfigError> {
        let source = HttpKeySource::new(jwks_url, settings.fetch_timeout)?;
        Ok(Self::new(source, settings))
    }

    /// Resolve a key by id
    ///
    /// `kid` is only ever used as a lookup key; it never influences which endpoint
    /// is fetched. Must be called from within a Tokio runtime, since refreshes run
    /// on their own task.
    ///
    /// # Errors
    ///
    /// - [`KeyLookupError::NotFound`] if the key id is absent after one refresh
    /// - [`KeyLookupError::Fetch`] if that refresh failed; the cached set is kept
    pub async fn key_for(&self, kid: &str) -> Result<Arc<Key>, KeyLookupError> {
        let snapshot = self.inner.current.load_full();

        if let Some(set) = &snapshot
            && let Some(key) = set.get(kid)
        {
            self.inner.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_lookup("hit");
            debug!(kid = %kid, "JWKS cache hit");

            if set.age() >= self.inner.settings.cache_ttl && self.inner.revalidation_due() {
                debug!(
                    jwks_url = %self.inner.source.endpoint(),
                    age_secs = set.age().as_secs(),
                    "Cached JWKS past TTL, revalidating in background"
                );
                // The fetch runs in its own task; nothing needs to await it here.
                drop(self.refresh_from(snapshot.as_ref()));
            }
            return Ok(key);
        }

        self.inner.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_lookup("miss");
        debug!(kid = %kid, "Key id not in cached JWKS, refreshing");

        let set = self.refresh_from(snapshot.as_ref()).await?;
        set.get(kid).ok_or_else(|| {
            debug!(kid = %kid, key_count = set.len(), "Key id not found after refresh");
            KeyLookupError::NotFound {
                kid: kid.to_string(),
            }
        })
    }

    /// Refresh the key set now, joining a fetch already in flight
    ///
    /// Honours `min_refresh_interval`: inside that window the cached set is returned.
    ///
    /// # Errors
    ///
    /// Returns the [`KeyFetchError`] of the fetch; the cached set is kept.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, KeyFetchError> {
        let snapshot = self.inner.current.load_full();
        self.refresh_from(snapshot.as_ref()).await
    }

    /// The cached key set, if one has been fetched
    pub fn current(&self) -> Option<Arc<KeySet>> {
        self.inner.current.load_full()
    }

    /// The fixed endpoint keys are fetched from
    pub fn jwks_url(&self) -> &str {
        self.inner.source.endpoint()
    }

    /// Cache and refresh policy
    pub fn settings(&self) -> &ProviderSettings {
        &self.inner.settings
    }

    /// Snapshot of lookup and fetch counters
    pub fn stats(&self) -> ProviderStats {
        let c = &self.inner.counters;
        ProviderStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            fetch_failures: c.fetch_failures.load(Ordering::Relaxed),
        }
    }

    /// Join the in-flight fetch, reuse a set published since `observed`, or start a
    /// new fetch.
    fn refresh_from(&self, observed: Option<&Arc<KeySet>>) -> SharedFetch {
        let mut slot = self.inner.in_flight.lock();

        if let Some(fetch) = slot.as_ref() {
            debug!(jwks_url = %self.inner.source.endpoint(), "Joining in-flight JWKS fetch");
            return fetch.clone();
        }

        if let Some(current) = self.inner.current.load_full() {
            let newer = observed.is_none_or(|seen| !Arc::ptr_eq(seen, &current));
            if newer {
                debug!("JWKS refreshed concurrently, reusing result");
                return ready(Ok(current));
            }
            if self.inner.recently_fetched() {
                warn!(
                    jwks_url = %self.inner.source.endpoint(),
                    "JWKS refresh rate limited, using cache"
                );
                return ready(Ok(current));
            }
        }

        let fetch = self.spawn_fetch();
        *slot = Some(fetch.clone());
        fetch
    }

    /// Must be called with the in-flight slot locked; the task clears the slot when it
    /// finishes, which cannot happen before the caller has stored the handle.
    fn spawn_fetch(&self) -> SharedFetch {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _slot = ClearInFlight(inner.as_ref());
            inner.fetch_and_publish().await
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(KeyFetchError::Network(format!("JWKS fetch task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn fetch_and_publish(&self) -> FetchOutcome {
        let started = Instant::now();
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let outcome =
            match tokio::time::timeout(self.settings.fetch_timeout, self.source.fetch()).await {
                Ok(Ok(set)) => {
                    let set = Arc::new(set);
                    self.current.store(Some(Arc::clone(&set)));
                    info!(
                        jwks_url = %self.source.endpoint(),
                        key_count = set.len(),
                        "JWKS cache updated"
                    );
                    Ok(set)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(KeyFetchError::Timeout(self.settings.fetch_timeout)),
            };

        *self.last_fetch.lock() = Some(Instant::now());

        match &outcome {
            Ok(_) => metrics::record_fetch("ok", started.elapsed().as_secs_f64()),
            Err(e) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_fetch("error", started.elapsed().as_secs_f64());
                warn!(
                    jwks_url = %self.source.endpoint(),
                    error = %e,
                    has_cached_keys = self.current.load().is_some(),
                    "JWKS refresh failed, keeping last known key set"
                );
            }
        }

        outcome
    }

    /// Whether a stale hit may start a background fetch
    fn revalidation_due(&self) -> bool {
        let backoff = self.settings.min_refresh_interval.unwrap_or_else(|| {
            self.settings.cache_ttl.min(DEFAULT_REVALIDATE_BACKOFF)
        });
        self.last_fetch
            .lock()
            .is_none_or(|last| last.elapsed() >= backoff)
    }

    fn recently_fetched(&self) -> bool {
        let Some(min) = self.settings.min_refresh_interval else {
            return false;
        };
        self.last_fetch
            .lock()
            .is_some_and(|last| last.elapsed() < min)
    }
}

/// Empties the in-flight slot when the fetch task ends, including by panic or abort
struct ClearInFlight<'a>(&'a Inner);

impl Drop for ClearInFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.lock().take();
    }
}

fn ready(outcome: FetchOutcome) -> SharedFetch {
    future::ready(outcome).boxed().shared()
}
