//! Backing store contract and the in-memory implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};

/// Flat key/value store with a per-entry size ceiling and per-key expiration.
///
/// Single-key operations are atomic; nothing spanning several keys is.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Largest value, in bytes, a single entry may hold
    fn max_value_bytes(&self) -> usize;

    /// Fetch a value; expired and missing entries are both `None`
    async fn get(&self, key: &str) -> ConnectorResult<Option<String>>;

    /// Store a value under `key`, replacing any previous value
    async fn put(&self, key: &str, value: String, ttl: Duration) -> ConnectorResult<()>;

    /// Remove a key; removing a missing key succeeds
    async fn remove(&self, key: &str) -> ConnectorResult<()>;

    /// Enumerate all live keys
    async fn list_keys(&self) -> ConnectorResult<Vec<String>>;
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local store used for tests and single-instance deployments
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    max_value_bytes: usize,
}

impl MemoryStore {
    pub fn new(max_value_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_value_bytes,
        }
    }

    /// Number of stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn max_value_bytes(&self) -> usize {
        self.max_value_bytes
    }

    async fn get(&self, key: &str) -> ConnectorResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.clone()))
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

        debug!("memory store put {} ({} bytes, ttl {:?})", key, value.len(), ttl);
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> ConnectorResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> ConnectorResult<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
