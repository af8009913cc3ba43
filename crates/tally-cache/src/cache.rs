//! Two-tier TTL cache with request deduplication.
//!
//! [`TieredCache`] writes every value to both an optional primary
//! [`CacheBackend`] and the bounded [`LocalCache`]. Reads try the primary
//! first and fall back to the local tier when the primary errors, so an
//! outage degrades to extra upstream calls instead of failed requests.
//!
//! [`TieredCache::cached_request`] layers [`Singleflight`] on top: however
//! many callers miss on the same key at once, the producer runs once.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use tally_types::{CacheConfig, TallyError};

use crate::backend::{CacheBackend, RedisCacheBackend};
use crate::local::LocalCache;
use crate::singleflight::Singleflight;

/// Failures visible to `cached_request` callers. Backend unavailability is
/// never one of them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The producer failed. Shared with every coalesced caller; not cached.
    #[error("producer failed: {0}")]
    Producer(Arc<anyhow::Error>),

    #[error("cached value could not be converted: {0}")]
    Serialization(String),
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined another caller's in-flight computation.
    pub coalesced: u64,
    /// Primary-tier operations that failed and were absorbed.
    pub primary_errors: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    primary_errors: AtomicU64,
}

struct Inner {
    primary: Option<Arc<dyn CacheBackend>>,
    local: LocalCache,
    flights: Singleflight,
    default_ttl: Duration,
    counters: Counters,
}

/// Shared handle to the cache. Cloning is cheap.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("has_primary", &self.inner.primary.is_some())
            .field("local_capacity", &self.inner.local.capacity())
            .field("in_flight", &self.inner.flights.in_flight())
            .finish()
    }
}

impl TieredCache {
    /// A cache with only the local tier.
    pub fn local_only(local_capacity: usize, default_ttl: Duration) -> Self {
        Self::with_primary(None, local_capacity, default_ttl)
    }

    pub fn with_primary(
        primary: Option<Arc<dyn CacheBackend>>,
        local_capacity: usize,
        default_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                primary,
                local: LocalCache::new(local_capacity),
                flights: Singleflight::new(),
                default_ttl,
                counters: Counters::default(),
            }),
        }
    }

    /// Build from config, attaching Redis as the primary tier when
    /// `cache.redis_url` is set.
    pub fn from_config(config: &CacheConfig) -> Result<Self, TallyError> {
        let primary: Option<Arc<dyn CacheBackend>> = match &config.redis_url {
            Some(url) => Some(Arc::new(RedisCacheBackend::new(url, config.key_prefix.clone())?)),
            None => None,
        };
        Ok(Self::with_primary(
            primary,
            config.local_capacity,
            config.default_ttl(),
        ))
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Look up a live value.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let value = self.lookup(key).await;
        let counter = if value.is_some() {
            &self.inner.counters.hits
        } else {
            &self.inner.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    async fn lookup(&self, key: &str) -> Option<serde_json::Value> {
        let Some(primary) = &self.inner.primary else {
            return self.inner.local.get(key);
        };
        match primary.get(key).await {
            Ok(Some(text)) => match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "undecodable value in primary cache, using local tier");
                    self.inner.local.get(key)
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.inner.counters.primary_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "primary cache unavailable, using local tier");
                self.inner.local.get(key)
            }
        }
    }

    /// Store a value in both tiers.
    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if let Some(primary) = &self.inner.primary {
            match serde_json::to_string(&value) {
                Ok(text) => {
                    if let Err(e) = primary.set_with_ttl(key, &text, ttl).await {
                        self.inner.counters.primary_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(key, error = %e, "primary cache write failed");
                    }
                }
                Err(e) => warn!(key, error = %e, "value not serializable for primary cache"),
            }
        }
        self.inner.local.set(key, value, ttl);
    }

    /// Remove a key from both tiers.
    pub async fn delete(&self, key: &str) {
        if let Some(primary) = &self.inner.primary {
            if let Err(e) = primary.delete(key).await {
                self.inner.counters.primary_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "primary cache delete failed");
            }
        }
        self.inner.local.delete(key);
    }

    /// Return the cached value for `key`, or compute it with `producer`.
    ///
    /// At most one `producer` runs per key at a time; concurrent callers
    /// share its result. Successful results are cached for `ttl`; errors are
    /// returned to every waiting caller and not cached.
    pub async fn cached_request<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<serde_json::Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        if let Some(flight) = self.inner.flights.get(key) {
            self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(key, "joining in-flight request");
            return flight.await;
        }

        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let cache = self.clone();
        let owned_key = key.to_string();
        let (flight, started) = self.inner.flights.join_or_start(key, move || {
            async move {
                // Another leader may have finished between our miss and
                // registering this flight.
                if let Some(value) = cache.lookup(&owned_key).await {
                    return Ok(value);
                }
                debug!(key = %owned_key, "cache miss, running producer");
                let value = producer()
                    .await
                    .map_err(|e| CacheError::Producer(Arc::new(e)))?;
                cache.set(&owned_key, value.clone(), ttl).await;
                Ok(value)
            }
            .boxed()
        });
        if !started {
            self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        flight.await
    }

    /// Typed wrapper over [`cached_request`](Self::cached_request).
    pub async fn cached_json<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let value = self
            .cached_request(key, ttl, move || async move {
                let typed = producer().await?;
                Ok(serde_json::to_value(typed)?)
            })
            .await?;
        serde_json::from_value(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            primary_errors: c.primary_errors.load(Ordering::Relaxed),
        }
    }

    /// Keys with a producer currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct FlakyBackend {
        data: Mutex<HashMap<String, String>>,
        down: std::sync::atomic::AtomicBool,
    }

    impl FlakyBackend {
        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), TallyError> {
            if self.down.load(Ordering::SeqCst) {
                Err(TallyError::CacheError("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Result<Option<String>, TallyError> {
            self.check()?;
            Ok(self.data.lock().get(key).cloned())
        }

        async fn set_with_ttl(
            &self,
            key: &str,
            value: &str,
            _ttl: Duration,
        ) -> Result<(), TallyError> {
            self.check()?;
            self.data.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), TallyError> {
            self.check()?;
            self.data.lock().remove(key);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_in_local_tier() {
        let cache = TieredCache::local_only(16, TTL);
        cache.set("k", json!("v"), Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await, Some(json!("v")));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn concurrent_misses_run_producer_once() {
        let cache = TieredCache::local_only(16, TTL);
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..25 {
            let cache = cache.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .cached_request("quote:BTC", TTL, move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!({"price": 64000}))
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), json!({"price": 64000}));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.get("quote:BTC").await, Some(json!({"price": 64000})));
    }

    #[tokio::test]
    async fn cached_value_skips_producer() {
        let cache = TieredCache::local_only(16, TTL);
        cache.set("k", json!(1), TTL).await;
        let value = cache
            .cached_request("k", TTL, || async { anyhow::bail!("should not run") })
            .await
            .unwrap();
        assert_eq!(value, json!(1));
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn producer_error_is_shared_and_not_cached() {
        let cache = TieredCache::local_only(16, TTL);
        let err = cache
            .cached_request("k", TTL, || async { anyhow::bail!("LLM quota exhausted") })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Producer(_)));
        assert!(err.to_string().contains("LLM quota exhausted"));
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.in_flight(), 0);

        let value = cache
            .cached_request("k", TTL, || async { Ok(json!("recovered")) })
            .await
            .unwrap();
        assert_eq!(value, json!("recovered"));
    }

    async fn panicking_producer() -> anyhow::Result<serde_json::Value> {
        panic!("quote parser bug")
    }

    #[tokio::test]
    async fn panicking_producer_does_not_poison_key() {
        let cache = TieredCache::local_only(16, TTL);
        let err = cache
            .cached_request("k", TTL, panicking_producer)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Producer(_)));
        assert_eq!(cache.in_flight(), 0);

        let value = cache
            .cached_request("k", TTL, || async { Ok(json!("fresh")) })
            .await
            .unwrap();
        assert_eq!(value, json!("fresh"));
    }

    #[tokio::test]
    async fn primary_outage_falls_back_to_local() {
        let backend = Arc::new(FlakyBackend::default());
        let cache = TieredCache::with_primary(Some(backend.clone()), 16, TTL);

        cache.set("k", json!("both tiers"), TTL).await;
        assert!(backend.data.lock().contains_key("k"));

        backend.set_down(true);
        assert_eq!(cache.get("k").await, Some(json!("both tiers")));
        cache.set("k2", json!("local only"), TTL).await;
        assert_eq!(cache.get("k2").await, Some(json!("local only")));
        assert!(cache.stats().primary_errors >= 2);
    }

    #[tokio::test]
    async fn delete_clears_both_tiers() {
        let backend = Arc::new(FlakyBackend::default());
        let cache = TieredCache::with_primary(Some(backend.clone()), 16, TTL);
        cache.set("k", json!(1), TTL).await;
        cache.delete("k").await;
        assert!(backend.data.lock().is_empty());
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn typed_wrapper_roundtrips() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Quote {
            symbol: String,
            price: f64,
        }

        let cache = TieredCache::local_only(16, TTL);
        let quote: Quote = cache
            .cached_json("quote:AAPL", TTL, || async {
                Ok(Quote {
                    symbol: "AAPL".into(),
                    price: 189.5,
                })
            })
            .await
            .unwrap();
        assert_eq!(quote.symbol, "AAPL");

        let mismatch = cache
            .cached_json::<u32, _, _>("quote:AAPL", TTL, || async { Ok(0) })
            .await;
        assert!(matches!(mismatch, Err(CacheError::Serialization(_))));
    }
}
