//! Named, TTL-bound, size-bound memoization caches.
//!
//! Each region is a moka cache with its own capacity and time-to-live.
//! Entries leave a region when they expire or when they are the least
//! recently used entry in a full region. Failed operations are never
//! cached.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// Region holding fetched media content.
pub const MEDIA_REGION: &str = "media";

/// Size and expiry policy for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_size: usize,
    #[serde(rename = "ttl_secs", with = "duration_secs")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Point-in-time occupancy of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionStats {
    pub name: String,
    pub size: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
}

/// A type-erased value with its own time-to-live.
#[derive(Clone)]
struct Cached {
    value: Arc<dyn Any + Send + Sync>,
    ttl: Duration,
    /// Insertion order within the region.
    seq: u64,
}

impl Cached {
    fn downcast<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

struct PerEntryTtl;

impl Expiry<String, Cached> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Cached, _at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Cached,
        _at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A single named cache region.
pub struct CacheRegion {
    name: String,
    config: CacheConfig,
    cache: Cache<String, Cached>,
    seq: AtomicU64,
}

impl CacheRegion {
    fn new(name: &str, config: CacheConfig) -> Self {
        let cache = Cache::builder()
            .name(name)
            .max_capacity(config.max_size as u64)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(PerEntryTtl)
            .build();
        Self {
            name: name.to_string(),
            config,
            cache,
            seq: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    fn wrap<T: Send + Sync + 'static>(&self, value: T, ttl: Option<Duration>) -> Cached {
        Cached {
            value: Arc::new(value),
            ttl: ttl.unwrap_or(self.config.ttl),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Look up a live entry of type `T`. A value of another type is a miss.
    pub async fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.cache.get(key).await?.downcast::<T>()
    }

    /// Insert a value. `ttl` overrides the region default for this entry.
    pub async fn insert<T: Send + Sync + 'static>(&self, key: &str, value: T, ttl: Option<Duration>) {
        let cached = self.wrap(value, ttl);
        self.cache.insert(key.to_string(), cached).await;
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.cache.remove(key).await.is_some()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Entry count after pending evictions and expirations are applied.
    pub async fn len(&self) -> usize {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count() as usize
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries, then the oldest insertions until at most
    /// `keep` remain. Returns how many entries were removed.
    pub async fn trim(&self, keep: usize) -> usize {
        self.cache.run_pending_tasks().await;
        let mut entries: Vec<(Arc<String>, u64)> =
            self.cache.iter().map(|(k, v)| (k, v.seq)).collect();
        if entries.len() <= keep {
            return 0;
        }
        entries.sort_by_key(|(_, seq)| *seq);

        let excess = entries.len() - keep;
        let mut removed = 0;
        for (key, _) in entries.into_iter().take(excess) {
            if self.cache.remove(key.as_str()).await.is_some() {
                removed += 1;
            }
        }
        self.cache.run_pending_tasks().await;
        debug!(region = %self.name, removed, keep, "region trimmed");
        removed
    }

    pub async fn stats(&self) -> RegionStats {
        RegionStats {
            name: self.name.clone(),
            size: self.len().await,
            max_size: self.config.max_size,
            ttl_secs: self.config.ttl.as_secs(),
        }
    }
}

/// Owner of every cache region. Constructed explicitly and shared by `Arc`.
#[derive(Default)]
pub struct CacheManager {
    regions: Mutex<HashMap<String, Arc<CacheRegion>>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager with regions pre-registered.
    pub fn with_regions<'a>(regions: impl IntoIterator<Item = (&'a str, CacheConfig)>) -> Self {
        let manager = Self::new();
        for (name, config) in regions {
            manager.get_cache(name, config);
        }
        manager
    }

    fn regions(&self) -> MutexGuard<'_, HashMap<String, Arc<CacheRegion>>> {
        self.regions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> Vec<Arc<CacheRegion>> {
        self.regions().values().cloned().collect()
    }

    /// Get or create a region. The first call for a name fixes its policy;
    /// later calls return the same region regardless of `config`.
    pub fn get_cache(&self, name: &str, config: CacheConfig) -> Arc<CacheRegion> {
        Arc::clone(
            self.regions()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CacheRegion::new(name, config))),
        )
    }

    /// Return the cached value for `key`, or run `operation` and cache its
    /// successful result. Concurrent misses on one key share a single run.
    pub async fn with_cache<T, F, Fut>(
        &self,
        key: &str,
        cache_name: &str,
        ttl: Option<Duration>,
        operation: F,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let region = self.get_cache(cache_name, CacheConfig::default());
        if let Some(hit) = region.get::<T>(key).await {
            record_lookup(cache_name, "hit");
            return Ok(hit);
        }
        record_lookup(cache_name, "miss");

        // Drops a value of another type stored under the same key.
        region.cache.invalidate(key).await;

        let cached = region
            .cache
            .try_get_with(key.to_string(), async {
                let value = operation().await?;
                Ok::<_, Error>(region.wrap(value, ttl))
            })
            .await
            .map_err(Error::from_shared)?;

        cached.downcast::<T>().ok_or_else(|| {
            Error::Other(format!(
                "cache region {cache_name} holds another type under key {key}"
            ))
        })
    }

    pub async fn invalidate(&self, key: &str, cache_name: &str) -> bool {
        let region = self.regions().get(cache_name).cloned();
        match region {
            Some(region) => region.invalidate(key).await,
            None => false,
        }
    }

    /// Clear one region, or every region when `cache_name` is `None`.
    pub fn clear(&self, cache_name: Option<&str>) {
        let regions = match cache_name {
            Some(name) => self.regions().get(name).cloned().into_iter().collect(),
            None => self.snapshot(),
        };
        for region in regions {
            region.clear();
        }
    }

    /// Reclamation pass: purge expired entries everywhere and trim each
    /// region to half its capacity.
    pub async fn trim(&self) -> usize {
        let mut removed = 0;
        for region in self.snapshot() {
            removed += region.trim(region.config().max_size / 2).await;
        }
        removed
    }

    pub async fn stats(&self) -> Vec<RegionStats> {
        let mut stats = Vec::new();
        for region in self.snapshot() {
            stats.push(region.stats().await);
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

fn record_lookup(region: &str, result: &'static str) {
    metrics::cache_lookups().add(
        1,
        &[
            KeyValue::new("region", region.to_string()),
            KeyValue::new("result", result),
        ],
    );
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
