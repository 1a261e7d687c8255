//! Flat result cache for batch fetches and master dataset snapshots.
//!
//! Entries are keyed by a fingerprint over the exact request; there is no partial-hit
//! logic, a miss always means a full re-fetch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::chunked::{ChunkedCodec, StoredLayout};
use crate::cache::{hash_hex, normalize_location};
use crate::error::{ConnectorError, ConnectorResult};
use crate::types::{DateRange, Granularity, Row, Units};

/// Content hash used as a result cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

fn location_set(locations: &[String]) -> String {
    locations
        .iter()
        .map(|location| normalize_location(location))
        .collect::<Vec<_>>()
        .join("|")
}

impl Fingerprint {
    /// `batch:<hash(range, granularity)>:<hash(locations)>:<units>`
    pub fn batch(locations: &[String], range: &DateRange, units: Units, granularity: Granularity) -> Self {
        let range_hash = hash_hex(&format!("{}|{}|{}", range.start, range.end, granularity.as_str()));
        let locations_hash = hash_hex(&location_set(locations));
        Fingerprint(format!("batch:{}:{}:{}", range_hash, locations_hash, units.as_str()))
    }

    /// `master:<hash(locations, range, granularity, units)>`
    pub fn master(locations: &[String], range: &DateRange, granularity: Granularity, units: Units) -> Self {
        let digest = hash_hex(&format!(
            "{}|{}|{}|{}|{}",
            location_set(locations),
            range.start,
            range.end,
            granularity.as_str(),
            units.as_str()
        ));
        Fingerprint(format!("master:{}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached full-width rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRows {
    /// Resolved display name, for single-location results
    pub location: Option<String>,
    pub rows: Vec<Row>,
}

/// Thin fingerprint-keyed cache over the chunked codec
pub struct ResultCache {
    codec: Arc<ChunkedCodec>,
    corrupt_entries: AtomicU64,
}

impl ResultCache {
    pub fn new(codec: Arc<ChunkedCodec>) -> Self {
        Self {
            codec,
            corrupt_entries: AtomicU64::new(0),
        }
    }

    /// Corrupt entries discarded since creation or the last reset
    pub fn corrupt_entries(&self) -> u64 {
        self.corrupt_entries.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_corrupt_entries(&self) {
        self.corrupt_entries.store(0, Ordering::Relaxed);
    }

    /// Read the rows stored under `fingerprint`; corrupt entries are dropped as misses
    pub async fn read(&self, fingerprint: &Fingerprint) -> ConnectorResult<Option<CachedRows>> {
        match self.codec.read::<CachedRows>(fingerprint.as_str()).await {
            Err(ConnectorError::CacheCorrupt(detail)) => {
                warn!("Discarding corrupt result entry {}: {}", fingerprint, detail);
                self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.codec.remove(fingerprint.as_str()).await {
                    warn!("Failed to remove corrupt entry {}: {}", fingerprint, e);
                }
                Ok(None)
            }
            other => other,
        }
    }

    pub async fn write(
        &self,
        fingerprint: &Fingerprint,
        rows: &CachedRows,
        ttl: Duration,
    ) -> ConnectorResult<StoredLayout> {
        self.codec.write(fingerprint.as_str(), rows, ttl).await
    }

    pub async fn invalidate(&self, fingerprint: &Fingerprint) -> ConnectorResult<()> {
        self.codec.remove(fingerprint.as_str()).await
    }
}
