//! Month-partitioned range cache.
//!
//! A fetched daily series for one `(location, units)` pair is split into calendar-month
//! buckets, each stored whole through the [`ChunkedCodec`] under
//! `monthly:<hash(location, units)>:<YYYY-MM>`. A range read is served only when every
//! month the range touches is present; anything less is a full miss.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::chunked::ChunkedCodec;
use crate::cache::{hash_hex, normalize_location};
use crate::error::{ConnectorError, ConnectorResult};
use crate::types::{DateRange, Units, YearMonth};
use crate::weather::WeatherRecord;

/// All records of one location/units pair for one calendar month
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthBucket {
    /// Resolved display name of the location
    pub location: String,
    pub records: Vec<WeatherRecord>,
}

/// Records assembled from month buckets for a range read
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSeries {
    pub location: String,
    pub records: Vec<WeatherRecord>,
}

/// Hash identifying a location/units pair in month keys
pub fn series_hash(location: &str, units: Units) -> String {
    hash_hex(&format!("{}|{}", normalize_location(location), units.as_str()))
}

/// Cache key of one month bucket
pub fn month_key(location: &str, units: Units, month: YearMonth) -> String {
    format!("monthly:{}:{}", series_hash(location, units), month)
}

/// Calendar months a range touches, first-of-month stepping, both endpoints inclusive
pub fn months_touched(range: &DateRange) -> Vec<YearMonth> {
    range.months()
}

/// Month-partitioned range cache
pub struct MonthlyRangeCache {
    codec: Arc<ChunkedCodec>,
    ttl: Duration,
    corrupt_entries: AtomicU64,
}

impl MonthlyRangeCache {
    pub fn new(codec: Arc<ChunkedCodec>, ttl: Duration) -> Self {
        Self {
            codec,
            ttl,
            corrupt_entries: AtomicU64::new(0),
        }
    }

    /// Corrupt buckets discarded since creation or the last reset
    pub fn corrupt_entries(&self) -> u64 {
        self.corrupt_entries.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_corrupt_entries(&self) {
        self.corrupt_entries.store(0, Ordering::Relaxed);
    }

    /// Serve `range` from month buckets, or `None` unless every touched month is cached.
    ///
    /// On a hit the records of all buckets are merged, sorted by date and filtered to
    /// the exact range. A corrupt bucket is dropped and reported as a miss.
    pub async fn read(
        &self,
        location: &str,
        units: Units,
        range: &DateRange,
    ) -> ConnectorResult<Option<CachedSeries>> {
        let months = months_touched(range);
        let mut buckets = Vec::with_capacity(months.len());

        for month in months {
            let key = month_key(location, units, month);
            match self.codec.read::<MonthBucket>(&key).await {
                Ok(Some(bucket)) => buckets.push(bucket),
                Ok(None) => {
                    debug!("Month {} not cached for '{}', range {} is a miss", month, location, range);
                    return Ok(None);
                }
                Err(ConnectorError::CacheCorrupt(detail)) => {
                    warn!("Discarding corrupt month bucket {}: {}", key, detail);
                    self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = self.codec.remove(&key).await {
                        warn!("Failed to remove corrupt bucket {}: {}", key, e);
                    }
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        let location_name = buckets
            .first()
            .map(|bucket| bucket.location.clone())
            .unwrap_or_else(|| location.to_string());

        let mut records: Vec<WeatherRecord> =
            buckets.into_iter().flat_map(|bucket| bucket.records).collect();
        records.sort_by_key(|record| (record.datetime, record.datetime_epoch));
        records.retain(|record| range.contains(record.datetime));

        Ok(Some(CachedSeries {
            location: location_name,
            records,
        }))
    }

    /// Group `records` by calendar month and replace each month's bucket.
    ///
    /// Months absent from `records` are left untouched. Every month is attempted; the
    /// first failure is returned after the rest have been written.
    pub async fn write(
        &self,
        location: &str,
        units: Units,
        resolved_name: &str,
        records: &[WeatherRecord],
    ) -> ConnectorResult<usize> {
        let mut by_month: BTreeMap<YearMonth, Vec<WeatherRecord>> = BTreeMap::new();
        for record in records {
            by_month
                .entry(YearMonth::from_date(record.datetime))
                .or_default()
                .push(record.clone());
        }

        let mut written = 0;
        let mut first_error = None;
        for (month, month_records) in by_month {
            let key = month_key(location, units, month);
            let bucket = MonthBucket {
                location: resolved_name.to_string(),
                records: month_records,
            };
            match self.codec.write(&key, &bucket, self.ttl).await {
                Ok(layout) => {
                    debug!("Cached {} ({} records, {:?})", key, bucket.records.len(), layout);
                    written += 1;
                }
                Err(e) => {
                    warn!("Failed to cache month bucket {}: {}", key, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}
