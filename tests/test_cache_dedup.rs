//! Integration tests for request deduplication in the tiered cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tally::cache::{CacheError, TieredCache};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn cache() -> TieredCache {
    TieredCache::local_only(128, Duration::from_secs(60))
}

/// Spawn `callers` concurrent requests for `key`; each producer call bumps
/// `runs` and takes `delay` to finish.
async fn fan_out(
    cache: &TieredCache,
    key: &str,
    callers: usize,
    runs: Arc<AtomicUsize>,
    delay: Duration,
) -> Vec<Result<serde_json::Value, CacheError>> {
    let mut handles = Vec::with_capacity(callers);
    for _ in 0..callers {
        let cache = cache.clone();
        let key = key.to_string();
        let runs = Arc::clone(&runs);
        handles.push(tokio::spawn(async move {
            cache
                .cached_request(&key, Duration::from_secs(60), move || async move {
                    let n = runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    Ok(json!({ "run": n }))
                })
                .await
        }));
    }

    let mut results = Vec::with_capacity(callers);
    for handle in handles {
        results.push(handle.await.expect("caller task should not panic"));
    }
    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_callers_share_one_producer_run() {
    let cache = cache();
    let runs = Arc::new(AtomicUsize::new(0));

    let results = fan_out(&cache, "quote:AAPL", 50, runs.clone(), Duration::from_millis(50)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    for result in &results {
        assert_eq!(result.as_ref().expect("should succeed"), &json!({ "run": 0 }));
    }
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test]
async fn test_distinct_keys_do_not_coalesce() {
    let cache = cache();
    let runs = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
        fan_out(&cache, "quote:AAPL", 10, runs.clone(), Duration::from_millis(20)),
        fan_out(&cache, "quote:MSFT", 10, runs.clone(), Duration::from_millis(20)),
    );

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(a.iter().chain(b.iter()).all(Result::is_ok));
}

#[tokio::test(start_paused = true)]
async fn test_value_is_reused_until_ttl_expires() {
    let cache = cache();
    let runs = Arc::new(AtomicUsize::new(0));

    let produce = |runs: Arc<AtomicUsize>| {
        move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(json!("fresh"))
        }
    };

    let ttl = Duration::from_secs(5);
    cache
        .cached_request("news:TSLA", ttl, produce(runs.clone()))
        .await
        .expect("first call should succeed");
    cache
        .cached_request("news:TSLA", ttl, produce(runs.clone()))
        .await
        .expect("cached call should succeed");
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    cache
        .cached_request("news:TSLA", ttl, produce(runs.clone()))
        .await
        .expect("call after expiry should succeed");
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failure_is_shared_then_retried() {
    let cache = cache();
    let runs = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let runs = Arc::clone(&runs);
        handles.push(tokio::spawn(async move {
            cache
                .cached_request("quote:FAIL", Duration::from_secs(60), move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err(anyhow::anyhow!("upstream unavailable"))
                })
                .await
        }));
    }
    for handle in handles {
        let result = handle.await.expect("caller task should not panic");
        assert!(matches!(result, Err(CacheError::Producer(_))));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Errors are not cached; the next caller runs a new producer.
    let value = cache
        .cached_request("quote:FAIL", Duration::from_secs(60), || async {
            Ok(json!(42))
        })
        .await
        .expect("retry should succeed");
    assert_eq!(value, json!(42));
}
