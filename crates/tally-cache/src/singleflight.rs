//! In-flight request coalescing.
//!
//! [`Singleflight`] guarantees at most one running computation per key:
//! the first caller for a key registers a shared future, later callers
//! await a clone of it. Lookup-or-insert happens under one lock, and the
//! entry removes itself when the computation finishes (success or failure),
//! so the next caller after completion starts fresh.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::CacheError;

/// The result every caller of one flight observes.
pub type FlightResult = Result<serde_json::Value, CacheError>;

/// A pending computation shared between all callers for one key.
pub type Flight = Shared<BoxFuture<'static, FlightResult>>;

/// Map of in-flight computations keyed by cache key.
#[derive(Clone, Default)]
pub struct Singleflight {
    flights: Arc<Mutex<HashMap<String, Flight>>>,
}

impl std::fmt::Debug for Singleflight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Singleflight")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Singleflight {
    pub fn new() -> Self {
        Self::default()
    }

    /// The flight currently registered for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Flight> {
        self.flights.lock().get(key).cloned()
    }

    /// Join the flight for `key`, or register `start()` as a new one.
    ///
    /// Returns the flight and whether this caller started it. `start` is
    /// only called when no flight exists; it must build the future without
    /// polling it, since the map lock is held while it runs.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> (Flight, bool)
    where
        F: FnOnce() -> BoxFuture<'static, FlightResult>,
    {
        let mut flights = self.flights.lock();
        if let Some(existing) = flights.get(key) {
            return (existing.clone(), false);
        }

        let registry = Arc::clone(&self.flights);
        let owned_key = key.to_string();
        let work = start();
        let flight = async move {
            // A panicking producer still has to release the key.
            let result = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Producer(Arc::new(anyhow::anyhow!(
                    "producer panicked"
                )))),
            };
            registry.lock().remove(&owned_key);
            result
        }
        .boxed()
        .shared();

        flights.insert(key.to_string(), flight.clone());
        (flight, true)
    }

    /// Number of keys with a computation in progress.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    #[tokio::test]
    async fn second_caller_joins_existing_flight() {
        let sf = Singleflight::new();
        let (first, started) = sf.join_or_start("k", || {
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!("v"))
            }
            .boxed()
        });
        assert!(started);

        let (second, started_again) =
            sf.join_or_start("k", || async { Ok(json!("other")) }.boxed());
        assert!(!started_again);
        assert_eq!(sf.in_flight(), 1);

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap(), json!("v"));
        assert_eq!(b.unwrap(), json!("v"));
        assert_eq!(sf.in_flight(), 0);
    }

    #[tokio::test]
    async fn entry_removed_after_failure() {
        let sf = Singleflight::new();
        let (flight, _) = sf.join_or_start("k", || {
            async { Err(CacheError::Producer(Arc::new(anyhow::anyhow!("upstream 503")))) }.boxed()
        });
        let err = flight.await.unwrap_err();
        assert!(err.to_string().contains("upstream 503"));
        assert!(sf.get("k").is_none());

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let (retry, started) = sf.join_or_start("k", move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            }
            .boxed()
        });
        assert!(started, "a failed flight must not block a fresh attempt");
        assert_eq!(retry.await.unwrap(), json!(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    async fn explode() -> FlightResult {
        panic!("producer bug")
    }

    #[tokio::test]
    async fn panicking_producer_releases_the_key() {
        let sf = Singleflight::new();
        let (flight, _) = sf.join_or_start("k", || explode().boxed());
        let err = flight.await.unwrap_err();
        assert!(matches!(err, CacheError::Producer(_)));
        assert!(err.to_string().contains("panicked"));
        assert_eq!(sf.in_flight(), 0);

        let (retry, started) = sf.join_or_start("k", || async { Ok(json!("fresh")) }.boxed());
        assert!(started);
        assert_eq!(retry.await.unwrap(), json!("fresh"));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let sf = Singleflight::new();
        let (_a, a_started) = sf.join_or_start("a", || async { Ok(json!(1)) }.boxed());
        let (_b, b_started) = sf.join_or_start("b", || async { Ok(json!(2)) }.boxed());
        assert!(a_started && b_started);
        assert_eq!(sf.in_flight(), 2);
    }
}
