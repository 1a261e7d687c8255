use crate::cache::store::CacheStore;
use crate::config::RedisConfig;
use crate::error::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use fred::{
    clients::RedisPool,
    interfaces::{ClientLike, KeysInterface},
    types::{Builder, Expiration, RedisConfig as FredRedisConfig, Scanner},
};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Redis-backed cache store with connection pooling
pub struct RedisStore {
    /// Fred Redis client with connection pooling
    client: RedisPool,
    /// Configuration
    config: RedisConfig,
    /// Per-entry size ceiling enforced before writing
    max_value_bytes: usize,
}

impl RedisStore {
    /// Create a new Redis store with TLS and cluster support
    pub async fn new(config: RedisConfig, max_value_bytes: usize) -> ConnectorResult<Self> {
        info!("Initializing Redis store (prefix '{}')", config.key_prefix);

        let redis_config = FredRedisConfig::from_url(&config.url)
            .map_err(|e| ConnectorError::StoreError(format!("Invalid Redis URL: {}", e)))?;

        let timeout_secs = config.connection_timeout_secs;
        let client = Builder::from_config(redis_config)
            .with_connection_config(|conn_config| {
                conn_config.connection_timeout = Duration::from_secs(timeout_secs);
            })
            .with_performance_config(|perf_config| {
                perf_config.auto_pipeline = true;
                perf_config.default_command_timeout = Duration::from_secs(timeout_secs);
            })
            .build_pool(config.max_connections as usize)
            .map_err(|e| ConnectorError::StoreError(format!("Failed to create Redis pool: {}", e)))?;

        client
            .connect()
            .await
            .map_err(|e| ConnectorError::StoreError(format!("Failed to connect to Redis: {}", e)))?;

        client
            .wait_for_connect()
            .await
            .map_err(|e| ConnectorError::StoreError(format!("Redis connection timeout: {}", e)))?;

        info!("Redis store connected successfully");

        Ok(RedisStore {
            client,
            config,
            max_value_bytes,
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Check Redis connection health
    pub async fn health_check(&self) -> ConnectorResult<()> {
        let start = std::time::Instant::now();

        let ping_result = timeout(Duration::from_secs(5), self.client.ping::<String>()).await;

        match ping_result {
            Ok(Ok(_)) => {
                debug!("Redis health check passed in {:?}", start.elapsed());
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Redis health check failed: {}", e);
                Err(ConnectorError::StoreError(format!("Health check failed: {}", e)))
            }
            Err(_) => {
                error!("Redis health check timed out");
                Err(ConnectorError::StoreError("Health check timed out".to_string()))
            }
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn max_value_bytes(&self) -> usize {
        self.max_value_bytes
    }

    async fn get(&self, key: &str) -> ConnectorResult<Option<String>> {
        let result: Option<String> = self
            .client
            .get(self.namespaced(key))
            .await
            .map_err(|e| ConnectorError::StoreError(format!("Failed to get '{}': {}", key, e)))?;
        Ok(result)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> ConnectorResult<()> {
        if value.len() > self.max_value_bytes {
            return Err(ConnectorError::StoreError(format!(
                "value for '{}' is {} bytes, limit is {}",
                key,
                value.len(),
                self.max_value_bytes
            )));
        }

        // Redis rejects EX 0
        let ttl_secs = ttl.as_secs().max(1) as i64;
        let _: () = self
            .client
            .set(self.namespaced(key), value, Some(Expiration::EX(ttl_secs)), None, false)
            .await
            .map_err(|e| ConnectorError::StoreError(format!("Failed to set '{}': {}", key, e)))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> ConnectorResult<()> {
        let _: i64 = self
            .client
            .unlink(self.namespaced(key))
            .await
            .map_err(|e| ConnectorError::StoreError(format!("Failed to remove '{}': {}", key, e)))?;
        Ok(())
    }

    async fn list_keys(&self) -> ConnectorResult<Vec<String>> {
        let pattern = format!("{}*", self.config.key_prefix);
        let mut keys = Vec::new();
        let mut pages = self.client.next().scan(pattern, Some(500), None);

        while let Some(page) = pages.next().await {
            let mut page =
                page.map_err(|e| ConnectorError::StoreError(format!("Failed to scan keys: {}", e)))?;
            if let Some(results) = page.take_results() {
                keys.extend(
                    results
                        .iter()
                        .filter_map(|key| key.as_str())
                        .filter_map(|key| key.strip_prefix(self.config.key_prefix.as_str()))
                        .map(str::to_string),
                );
            }
            page.next()
                .map_err(|e| ConnectorError::StoreError(format!("Failed to continue scan: {}", e)))?;
        }

        debug!("Listed {} keys under prefix '{}'", keys.len(), self.config.key_prefix);
        Ok(keys)
    }
}
