/// Caching module
///
/// This module implements the layered response cache:
/// - Chunked value codec (values larger than the store ceiling)
/// - Month-partitioned range cache (single-location series)
/// - Result cache (batch results and master dataset snapshots)

pub mod chunked;
pub mod range;
pub mod redis_client;
pub mod results;
pub mod store;


use crate::config::{CacheBackend, CacheConfig, Config};
use crate::error::{ConnectorError, ConnectorResult};
use crate::types::{DateRange, Units};
use crate::weather::WeatherRecord;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use chunked::{ChunkManifest, ChunkedCodec, StoredLayout};
pub use range::{month_key, months_touched, CachedSeries, MonthBucket, MonthlyRangeCache};
pub use redis_client::RedisStore;
pub use results::{CachedRows, Fingerprint, ResultCache};
pub use store::{CacheStore, MemoryStore};

/// Key namespaces owned by this service
pub const NAMESPACES: [&str; 3] = ["monthly:", "batch:", "master:"];

/// Lowercased, trimmed location text used in key hashes
pub(crate) fn normalize_location(location: &str) -> String {
    location.trim().to_lowercase()
}

/// farmhash64 of `input` as 16 hex digits
pub(crate) fn hash_hex(input: &str) -> String {
    format!("{:016x}", farmhash::hash64(input.as_bytes()))
}

/// Internal cache statistics with atomic counters for thread safety
#[derive(Debug, Default)]
struct CacheStatsInternal {
    range_hits: AtomicU64,
    range_misses: AtomicU64,
    batch_hits: AtomicU64,
    batch_misses: AtomicU64,
    master_hits: AtomicU64,
    master_misses: AtomicU64,
    read_failures: AtomicU64,
    population_failures: AtomicU64,
    keys_purged: AtomicU64,
}

impl CacheStatsInternal {
    fn to_cache_stats(&self) -> CacheStats {
        CacheStats {
            range_hits: self.range_hits.load(Ordering::Relaxed),
            range_misses: self.range_misses.load(Ordering::Relaxed),
            batch_hits: self.batch_hits.load(Ordering::Relaxed),
            batch_misses: self.batch_misses.load(Ordering::Relaxed),
            master_hits: self.master_hits.load(Ordering::Relaxed),
            master_misses: self.master_misses.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            population_failures: self.population_failures.load(Ordering::Relaxed),
            corrupt_entries: 0,
            keys_purged: self.keys_purged.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics for monitoring hit/miss ratios
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub range_hits: u64,
    pub range_misses: u64,
    pub batch_hits: u64,
    pub batch_misses: u64,
    pub master_hits: u64,
    pub master_misses: u64,
    /// Reads that failed at the store and were served as misses
    pub read_failures: u64,
    /// Writes that failed and were ignored
    pub population_failures: u64,
    /// Entries that failed to reassemble or decode and were discarded
    pub corrupt_entries: u64,
    pub keys_purged: u64,
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

impl CacheStats {
    pub fn range_hit_ratio(&self) -> f64 {
        ratio(self.range_hits, self.range_misses)
    }

    pub fn batch_hit_ratio(&self) -> f64 {
        ratio(self.batch_hits, self.batch_misses)
    }

    pub fn master_hit_ratio(&self) -> f64 {
        ratio(self.master_hits, self.master_misses)
    }

    pub fn overall_hit_ratio(&self) -> f64 {
        ratio(
            self.range_hits + self.batch_hits + self.master_hits,
            self.range_misses + self.batch_misses + self.master_misses,
        )
    }
}

/// Time-to-live of each cache layer
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub monthly: Duration,
    pub batch: Duration,
    pub master: Duration,
}

/// Cache manager for the layered caching strategy.
///
/// Read failures degrade to misses and write failures are logged and counted; neither
/// reaches the caller.
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    codec: Arc<ChunkedCodec>,
    range: MonthlyRangeCache,
    results: ResultCache,
    ttls: CacheTtls,
    master_enabled: bool,
    redis: Option<Arc<RedisStore>>,
    stats: Arc<CacheStatsInternal>,
}

impl CacheManager {
    /// Create a cache manager over an existing store
    pub fn new(config: &CacheConfig, store: Arc<dyn CacheStore>) -> ConnectorResult<Self> {
        let codec = Arc::new(ChunkedCodec::new(
            store.clone(),
            config.chunk_bytes,
            Duration::from_secs(config.max_ttl_secs),
        )?);
        let ttls = CacheTtls {
            monthly: Duration::from_secs(config.monthly_ttl_secs),
            batch: Duration::from_secs(config.batch_ttl_secs),
            master: Duration::from_secs(config.master_ttl_secs),
        };

        Ok(CacheManager {
            range: MonthlyRangeCache::new(codec.clone(), ttls.monthly),
            results: ResultCache::new(codec.clone()),
            store,
            codec,
            ttls,
            master_enabled: config.master_enabled,
            redis: None,
            stats: Arc::new(CacheStatsInternal::default()),
        })
    }

    /// Create a cache manager for the configured backend
    pub async fn from_config(config: &Config) -> ConnectorResult<Self> {
        match config.cache.backend {
            CacheBackend::Memory => {
                info!("Using in-memory cache store");
                let store = Arc::new(MemoryStore::new(config.cache.max_value_bytes));

                // Expired entries are otherwise only dropped when read or listed
                let sweeper = Arc::downgrade(&store);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(Duration::from_secs(300));
                    loop {
                        interval.tick().await;
                        let Some(store) = sweeper.upgrade() else { break };
                        let purged = store.purge_expired().await;
                        if purged > 0 {
                            debug!("Swept {} expired entries from the memory store", purged);
                        }
                    }
                });

                Self::new(&config.cache, store)
            }
            CacheBackend::Redis => {
                let redis_config = config.redis.clone().ok_or_else(|| {
                    ConnectorError::ConfigError("REDIS_URL is required when CACHE_BACKEND=redis".to_string())
                })?;
                let redis = Arc::new(RedisStore::new(redis_config, config.cache.max_value_bytes).await?);
                let mut manager = Self::new(&config.cache, redis.clone())?;
                manager.redis = Some(redis);
                Ok(manager)
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn codec(&self) -> &Arc<ChunkedCodec> {
        &self.codec
    }

    pub fn range_cache(&self) -> &MonthlyRangeCache {
        &self.range
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.results
    }

    pub fn master_enabled(&self) -> bool {
        self.master_enabled
    }

    /// Get a single-location series from month buckets
    pub async fn get_range(&self, location: &str, units: Units, range: &DateRange) -> Option<CachedSeries> {
        match self.range.read(location, units, range).await {
            Ok(Some(series)) => {
                self.stats.range_hits.fetch_add(1, Ordering::Relaxed);
                debug!("Range cache hit for '{}' {} - {} records", location, range, series.records.len());
                Some(series)
            }
            Ok(None) => {
                self.stats.range_misses.fetch_add(1, Ordering::Relaxed);
                debug!("Range cache miss for '{}' {}", location, range);
                None
            }
            Err(e) => {
                self.stats.range_misses.fetch_add(1, Ordering::Relaxed);
                self.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Range cache read failed for '{}', treating as miss: {}", location, e);
                None
            }
        }
    }

    /// Populate month buckets from a fetched series. Returns whether every month was written.
    pub async fn set_range(
        &self,
        location: &str,
        units: Units,
        resolved_name: &str,
        records: &[WeatherRecord],
    ) -> bool {
        match self.range.write(location, units, resolved_name, records).await {
            Ok(months) => {
                debug!("Populated {} month buckets for '{}'", months, location);
                true
            }
            Err(e) => {
                self.stats.population_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Range cache population failed for '{}': {}", location, e);
                false
            }
        }
    }

    /// Get batch rows
    pub async fn get_batch(&self, fingerprint: &Fingerprint) -> Option<CachedRows> {
        self.get_result(fingerprint, &self.stats.batch_hits, &self.stats.batch_misses)
            .await
    }

    /// Store batch rows
    pub async fn set_batch(&self, fingerprint: &Fingerprint, rows: &CachedRows) -> bool {
        self.set_result(fingerprint, rows, self.ttls.batch).await
    }

    /// Get a master dataset snapshot
    pub async fn get_master(&self, fingerprint: &Fingerprint) -> Option<CachedRows> {
        if !self.master_enabled {
            return None;
        }
        self.get_result(fingerprint, &self.stats.master_hits, &self.stats.master_misses)
            .await
    }

    /// Store a master dataset snapshot
    pub async fn set_master(&self, fingerprint: &Fingerprint, rows: &CachedRows) -> bool {
        if !self.master_enabled {
            return false;
        }
        self.set_result(fingerprint, rows, self.ttls.master).await
    }

    async fn get_result(
        &self,
        fingerprint: &Fingerprint,
        hits: &AtomicU64,
        misses: &AtomicU64,
    ) -> Option<CachedRows> {
        match self.results.read(fingerprint).await {
            Ok(Some(rows)) => {
                hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {} - {} rows", fingerprint, rows.rows.len());
                Some(rows)
            }
            Ok(None) => {
                misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for {}", fingerprint);
                None
            }
            Err(e) => {
                misses.fetch_add(1, Ordering::Relaxed);
                self.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Cache read failed for {}, treating as miss: {}", fingerprint, e);
                None
            }
        }
    }

    async fn set_result(&self, fingerprint: &Fingerprint, rows: &CachedRows, ttl: Duration) -> bool {
        match self.results.write(fingerprint, rows, ttl).await {
            Ok(layout) => {
                debug!("Cached {} ({} rows, {:?})", fingerprint, rows.rows.len(), layout);
                true
            }
            Err(e) => {
                self.stats.population_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to cache {}: {}", fingerprint, e);
                false
            }
        }
    }

    /// Remove every key starting with `prefix`, or every key this service owns.
    ///
    /// Fragments and manifests share their parent key's prefix and go with it.
    pub async fn purge(&self, prefix: Option<&str>) -> ConnectorResult<usize> {
        let keys = self.store.list_keys().await?;
        let mut removed = 0;
        for key in keys {
            let matches = match prefix {
                Some(prefix) => key.starts_with(prefix),
                None => NAMESPACES.iter().any(|ns| key.starts_with(ns)),
            };
            if matches {
                self.store.remove(&key).await?;
                removed += 1;
            }
        }

        self.stats.keys_purged.fetch_add(removed as u64, Ordering::Relaxed);
        info!("Purged {} cache keys (prefix: {})", removed, prefix.unwrap_or("<all>"));
        Ok(removed)
    }

    /// Check that the backing store accepts a write and returns it
    pub async fn health_check(&self) -> ConnectorResult<()> {
        if let Some(redis) = &self.redis {
            return redis.health_check().await;
        }

        let check_key = "health:check";
        self.store
            .put(check_key, "ok".to_string(), Duration::from_secs(5))
            .await?;
        let value = self.store.get(check_key).await?;
        self.store.remove(check_key).await?;
        match value.as_deref() {
            Some("ok") => Ok(()),
            _ => Err(ConnectorError::StoreError("Health check value was not readable".to_string())),
        }
    }

    /// Get cache hit/miss statistics
    pub fn get_cache_stats(&self) -> CacheStats {
        let mut stats = self.stats.to_cache_stats();
        stats.corrupt_entries = self.range.corrupt_entries() + self.results.corrupt_entries();
        stats
    }

    /// Reset cache statistics (useful for testing)
    pub fn reset_cache_stats(&self) {
        self.stats.range_hits.store(0, Ordering::Relaxed);
        self.stats.range_misses.store(0, Ordering::Relaxed);
        self.stats.batch_hits.store(0, Ordering::Relaxed);
        self.stats.batch_misses.store(0, Ordering::Relaxed);
        self.stats.master_hits.store(0, Ordering::Relaxed);
        self.stats.master_misses.store(0, Ordering::Relaxed);
        self.stats.read_failures.store(0, Ordering::Relaxed);
        self.stats.population_failures.store(0, Ordering::Relaxed);
        self.stats.keys_purged.store(0, Ordering::Relaxed);
        self.range.reset_corrupt_entries();
        self.results.reset_corrupt_entries();
    }
}
