//! Generic get-or-compute cache layer with single-flight and fail-open.
//!
//! The layer sits in front of any [`CacheBackend`]. On a miss, concurrent
//! callers racing on the same key share one in-flight computation: the first
//! caller runs `compute`, the rest await its outcome. When the backend is
//! unreachable the layer computes directly and returns without caching; a
//! cache error never reaches the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use quiver_core::{defaults, with_timeout, CacheBackend, Result};

/// Shared outcome of one in-flight computation, as serialized JSON.
type Flight = OnceCell<Result<String>>;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// Times a compute function actually ran.
    pub computations: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    computations: AtomicU64,
}

/// Outcome of a backend read.
enum Lookup<T> {
    Hit(T),
    Miss,
    Unavailable,
}

/// Single-flight, fail-open cache layer.
#[derive(Clone)]
pub struct CacheLayer {
    inner: Arc<CacheLayerInner>,
}

struct CacheLayerInner {
    backend: Arc<dyn CacheBackend>,
    /// Deadline for one backend round-trip.
    timeout: Duration,
    /// Per-key in-flight computations. Never held across an await.
    flights: Mutex<HashMap<String, Arc<Flight>>>,
    counters: Counters,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_timeout(backend, Duration::from_millis(defaults::CACHE_TIMEOUT_MS))
    }

    pub fn with_timeout(backend: Arc<dyn CacheBackend>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CacheLayerInner {
                backend,
                timeout,
                flights: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Backend name for logs.
    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Return the cached value for `key`, or compute, store, and return it.
    ///
    /// `compute` runs at most once per key across concurrent callers; every
    /// waiter receives the same value or the same error. Errors are never
    /// cached.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get_or_compute_if(key, ttl, compute, |_| true).await
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but a computed value is
    /// stored only when `should_store` accepts it. Concurrent waiters still
    /// share the value either way.
    #[instrument(skip(self, compute, should_store), fields(subsystem = "cache", component = "cache_layer", op = "get_or_compute", cache_key = %key))]
    pub async fn get_or_compute_if<T, F, Fut, P>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
        should_store: P,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: FnOnce(&T) -> bool,
    {
        if let Lookup::Hit(value) = self.lookup::<T>(key).await {
            return Ok(value);
        }

        let flight = self.join_flight(key);
        let outcome = flight
            .get_or_init(|| self.compute_and_store(key, ttl, compute, should_store))
            .await
            .clone();
        self.leave_flight(key, &flight);

        let serialized = outcome?;
        Ok(serde_json::from_str(&serialized)?)
    }

    /// Body of one flight: re-check, compute, store when the backend is up.
    async fn compute_and_store<T, F, Fut, P>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
        should_store: P,
    ) -> Result<String>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: FnOnce(&T) -> bool,
    {
        // A flight that finished between our lookup and joining may already
        // have stored the value.
        let backend_ok = match self.lookup::<T>(key).await {
            Lookup::Hit(value) => return Ok(serde_json::to_string(&value)?),
            Lookup::Miss => true,
            Lookup::Unavailable => false,
        };

        let start = Instant::now();
        self.inner.counters.computations.fetch_add(1, Ordering::Relaxed);
        let value = compute().await?;
        let serialized = serde_json::to_string(&value)?;
        let keep = should_store(&value);
        debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            store = keep,
            "Computed value on cache miss"
        );

        if backend_ok && keep {
            self.store(key, &serialized, ttl).await;
        }
        Ok(serialized)
    }

    /// Remove an entry immediately. Returns false when the backend is unreachable.
    pub async fn invalidate(&self, key: &str) -> bool {
        let backend = self.inner.backend.clone();
        match with_timeout(self.inner.timeout, "cache delete", backend.delete(key)).await {
            Ok(()) => {
                debug!(cache_key = key, "Cache INVALIDATE");
                true
            }
            Err(e) => {
                self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache_key = key, error = %e, "Cache invalidate failed");
                false
            }
        }
    }

    /// Snapshot of the hit/miss/error counters.
    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            computations: c.computations.load(Ordering::Relaxed),
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        let backend = self.inner.backend.clone();
        let counters = &self.inner.counters;
        match with_timeout(self.inner.timeout, "cache get", backend.get(key)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(cache_key = key, "Cache HIT");
                    Lookup::Hit(value)
                }
                Err(e) => {
                    // Unreadable entry: recompute and overwrite it.
                    counters.misses.fetch_add(1, Ordering::Relaxed);
                    warn!(cache_key = key, error = %e, "Cache deserialization error");
                    Lookup::Miss
                }
            },
            Ok(None) => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(cache_key = key, "Cache MISS");
                Lookup::Miss
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    cache_key = key,
                    backend = self.inner.backend.name(),
                    error = %e,
                    "Cache backend unavailable, computing directly"
                );
                Lookup::Unavailable
            }
        }
    }

    async fn store(&self, key: &str, serialized: &str, ttl: Duration) {
        let backend = self.inner.backend.clone();
        match with_timeout(
            self.inner.timeout,
            "cache set",
            backend.set(key, serialized, ttl),
        )
        .await
        {
            Ok(()) => debug!(cache_key = key, ttl_secs = ttl.as_secs(), "Cache SET"),
            Err(e) => {
                self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache_key = key, error = %e, "Cache store failed, value not cached");
            }
        }
    }

    fn join_flight(&self, key: &str) -> Arc<Flight> {
        let mut flights = self
            .inner
            .flights
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn leave_flight(&self, key: &str, flight: &Arc<Flight>) {
        let mut flights = self
            .inner
            .flights
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if flights
            .get(key)
            .map(|current| Arc::ptr_eq(current, flight))
            .unwrap_or(false)
        {
            flights.remove(key);
        }
    }
}
