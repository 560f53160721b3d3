//! Integration tests for the cache layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use session_feedback::cache::{CacheConfig, CacheManager};
use session_feedback::engine::system::Reclaim;
use session_feedback::error::Error;

fn config(max_size: usize, ttl_secs: u64) -> CacheConfig {
    CacheConfig {
        max_size,
        ttl: Duration::from_secs(ttl_secs),
    }
}

#[test]
fn get_cache_is_idempotent() {
    let manager = CacheManager::new();
    let a = manager.get_cache("jobs", config(2, 10));
    let b = manager.get_cache("jobs", config(50, 1));
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(b.config().max_size, 2);
}

#[tokio::test]
async fn with_cache_memoizes_successes_only() {
    let manager = CacheManager::new();
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let value = manager
            .with_cache("k", "media", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>("content".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "content");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let failed = manager
        .with_cache("bad", "media", None, || async {
            Err::<String, _>(Error::SourceUnavailable("gone".into()))
        })
        .await;
    assert!(matches!(failed, Err(Error::SourceUnavailable(_))));

    let recovered = manager
        .with_cache("bad", "media", None, || async { Ok::<_, Error>("found".to_string()) })
        .await
        .unwrap();
    assert_eq!(recovered, "found");
}

#[tokio::test]
async fn entries_expire_after_ttl() {
    let manager = CacheManager::new();
    let region = manager.get_cache("short", config(10, 300));
    region.insert("a", 1u32, Some(Duration::from_millis(50))).await;
    region.insert("b", 2u32, None).await;
    assert_eq!(region.get::<u32>("a").await, Some(1));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(region.get::<u32>("a").await, None);
    assert_eq!(region.get::<u32>("b").await, Some(2));
}

#[tokio::test]
async fn full_region_evicts_least_recently_used() {
    let manager = CacheManager::new();
    let region = manager.get_cache("small", config(2, 300));
    region.insert("a", 1u32, None).await;
    region.insert("b", 2u32, None).await;
    assert_eq!(region.len().await, 2);
    assert_eq!(region.get::<u32>("a").await, Some(1));

    region.insert("c", 3u32, None).await;
    assert_eq!(region.len().await, 2);
    assert_eq!(region.get::<u32>("b").await, None);
    assert_eq!(region.get::<u32>("a").await, Some(1));
    assert_eq!(region.get::<u32>("c").await, Some(3));
}

#[tokio::test]
async fn type_mismatch_is_a_miss() {
    let manager = CacheManager::new();
    let region = manager.get_cache("mixed", config(4, 300));
    region.insert("k", 7u32, None).await;
    assert_eq!(region.get::<String>("k").await, None);
    assert_eq!(region.get::<u32>("k").await, Some(7));

    let replaced = manager
        .with_cache("k", "mixed", None, || async { Ok::<_, Error>("text".to_string()) })
        .await
        .unwrap();
    assert_eq!(replaced, "text");
}

#[tokio::test]
async fn invalidate_clear_and_stats() {
    let manager = CacheManager::with_regions([("a", config(10, 60)), ("b", config(5, 600))]);
    manager.get_cache("a", config(1, 1)).insert("x", 1u8, None).await;
    manager.get_cache("b", config(1, 1)).insert("y", 2u8, None).await;

    assert!(manager.invalidate("x", "a").await);
    assert!(!manager.invalidate("x", "a").await);
    assert!(!manager.invalidate("x", "missing").await);

    let stats = manager.stats().await;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].name, "a");
    assert_eq!(stats[0].size, 0);
    assert_eq!(stats[1].size, 1);
    assert_eq!(stats[1].max_size, 5);
    assert_eq!(stats[1].ttl_secs, 600);

    manager.clear(None);
    assert!(manager.stats().await.iter().all(|s| s.size == 0));
}

#[tokio::test]
async fn reclaim_trims_regions_to_half_capacity() {
    let manager = CacheManager::new();
    let region = manager.get_cache("media", config(10, 300));
    for i in 0..10u32 {
        region.insert(&format!("k{i}"), i, None).await;
    }

    let released = manager.reclaim().await;
    assert_eq!(released, 5);
    assert_eq!(region.len().await, 5);
    assert_eq!(region.get::<u32>("k9").await, Some(9), "newest entries survive");
    assert_eq!(region.get::<u32>("k0").await, None);
}
