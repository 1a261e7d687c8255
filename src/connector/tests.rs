use super::*;
use crate::cache::{CacheManager, CacheStore, MemoryStore};
use crate::config::{CacheBackend, CacheConfig};
use crate::error::{ConnectorError, ConnectorResult};
use crate::observability::MetricsRegistry;
use crate::types::{CacheSource, DateRange, Granularity, QueryConfig, QueryDescriptor, Scalar, Units};
use crate::weather::{BatchRequest, HourRecord, TimelineRequest, TimelineResponse, WeatherRecord, WeatherSource};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HOURS_PER_DAY: u32 = 3;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Weather source that synthesizes one record per requested day and counts calls
#[derive(Default)]
struct ScriptedSource {
    timeline_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    fail_with: Mutex<Option<u16>>,
    last_api_key: Mutex<Option<String>>,
    last_range: Mutex<Option<DateRange>>,
}

impl ScriptedSource {
    fn calls(&self) -> usize {
        self.timeline_calls.load(Ordering::SeqCst) + self.batch_calls.load(Ordering::SeqCst)
    }

    fn fail(&self, status: Option<u16>) {
        *self.fail_with.lock().unwrap() = status;
    }

    fn check_failure(&self) -> ConnectorResult<()> {
        match *self.fail_with.lock().unwrap() {
            Some(status) => Err(ConnectorError::Upstream {
                status: Some(status),
                message: "scripted failure".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn timeline(location: &str, range: &DateRange, include_hours: bool) -> TimelineResponse {
        let days = range
            .start
            .iter_days()
            .take_while(|d| *d <= range.end)
            .map(|d| {
                let mut day = WeatherRecord::empty(d);
                day.temp = Some(f64::from(d.day()) / 2.0);
                day.temp_max = Some(f64::from(d.day()));
                day.conditions = Some("Clear".to_string());
                if include_hours {
                    day.hours = (0..HOURS_PER_DAY).map(hour).collect();
                }
                day
            })
            .collect();

        TimelineResponse {
            resolved_address: Some(format!("{} (resolved)", location)),
            address: Some(location.to_string()),
            timezone: Some("Europe/Berlin".to_string()),
            latitude: None,
            longitude: None,
            days,
        }
    }
}

fn hour(h: u32) -> HourRecord {
    HourRecord {
        datetime: NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
        datetime_epoch: None,
        temp: Some(f64::from(h)),
        feels_like: None,
        humidity: None,
        dew: None,
        precip: None,
        precip_prob: None,
        snow: None,
        wind_gust: None,
        wind_speed: None,
        wind_dir: None,
        pressure: None,
        visibility: None,
        cloud_cover: None,
        uv_index: None,
        conditions: None,
        icon: None,
    }
}

#[async_trait]
impl WeatherSource for ScriptedSource {
    async fn fetch_timeline(&self, request: &TimelineRequest) -> ConnectorResult<TimelineResponse> {
        self.timeline_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_api_key.lock().unwrap() = Some(request.api_key.clone());
        *self.last_range.lock().unwrap() = Some(request.range);
        self.check_failure()?;
        Ok(Self::timeline(&request.location, &request.range, request.include_hours))
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> ConnectorResult<Vec<TimelineResponse>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_api_key.lock().unwrap() = Some(request.api_key.clone());
        self.check_failure()?;
        Ok(request
            .locations
            .iter()
            .map(|location| Self::timeline(location, &request.range, request.include_hours))
            .collect())
    }
}

/// Store that refuses every write
struct ReadOnlyStore(MemoryStore);

#[async_trait]
impl CacheStore for ReadOnlyStore {
    fn max_value_bytes(&self) -> usize {
        self.0.max_value_bytes()
    }

    async fn get(&self, key: &str) -> ConnectorResult<Option<String>> {
        self.0.get(key).await
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Duration) -> ConnectorResult<()> {
        Err(ConnectorError::StoreError("store is read-only".to_string()))
    }

    async fn remove(&self, key: &str) -> ConnectorResult<()> {
        self.0.remove(key).await
    }

    async fn list_keys(&self) -> ConnectorResult<Vec<String>> {
        self.0.list_keys().await
    }
}

fn cache_config(master_enabled: bool) -> CacheConfig {
    CacheConfig {
        backend: CacheBackend::Memory,
        max_value_bytes: 102400,
        chunk_bytes: 92160,
        max_ttl_secs: 21600,
        monthly_ttl_secs: 21600,
        batch_ttl_secs: 3600,
        master_ttl_secs: 1800,
        master_enabled,
    }
}

fn settings() -> ConnectorSettings {
    ConnectorSettings {
        default_api_key: None,
        max_range_days: 400,
    }
}

/// Helper function to create a connector over an in-memory store and a scripted source
fn create_test_connector(master_enabled: bool) -> (Arc<ScriptedSource>, WeatherConnector) {
    let store = Arc::new(MemoryStore::new(102400));
    create_connector_with_store(store, master_enabled, settings())
}

fn create_connector_with_store(
    store: Arc<dyn CacheStore>,
    master_enabled: bool,
    settings: ConnectorSettings,
) -> (Arc<ScriptedSource>, WeatherConnector) {
    let cache = Arc::new(CacheManager::new(&cache_config(master_enabled), store).unwrap());
    let source = Arc::new(ScriptedSource::default());
    let connector = WeatherConnector::new(cache, source.clone(), settings, MetricsRegistry::new().unwrap()).unwrap();
    (source, connector)
}

fn single_query(location: &str, start: NaiveDate, end: NaiveDate, granularity: Granularity) -> QueryDescriptor {
    QueryDescriptor {
        fields: vec!["location".into(), "date".into(), "temp".into(), "snow".into()],
        date_range: DateRange::new(start, end).unwrap(),
        config: QueryConfig {
            api_key: Some("test-key".to_string()),
            location: Some(location.to_string()),
            locations: None,
            units: Units::Metric,
            granularity,
        },
    }
}

fn batch_query(locations: &[&str], start: NaiveDate, end: NaiveDate) -> QueryDescriptor {
    let mut query = single_query("unused", start, end, Granularity::Daily);
    query.config.location = None;
    query.config.locations = Some(locations.iter().map(|l| l.to_string()).collect());
    query
}

#[tokio::test]
async fn test_berlin_january_second_call_is_a_range_hit() {
    let (source, connector) = create_test_connector(false);
    let query = single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 31), Granularity::Daily);

    let first = connector.get_data(&query).await.unwrap();
    assert_eq!(first.cache, CacheSource::Upstream);
    assert_eq!(first.rows.len(), 31);
    assert_eq!(source.calls(), 1);

    // One bucket for 2024-01
    let keys = connector.cache().store().list_keys().await.unwrap();
    assert_eq!(keys.iter().filter(|k| k.starts_with("monthly:")).count(), 1);
    assert!(keys.iter().any(|k| k.ends_with(":2024-01")));

    let second = connector.get_data(&query).await.unwrap();
    assert_eq!(second.cache, CacheSource::Range);
    assert_eq!(source.calls(), 1);
    assert_eq!(second.rows, first.rows);
    assert_eq!(second.location.as_deref(), Some("Berlin, DE (resolved)"));
}

#[tokio::test]
async fn test_rows_follow_requested_field_order() {
    let (_source, connector) = create_test_connector(false);
    let query = single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 3), Granularity::Daily);

    let response = connector.get_data(&query).await.unwrap();
    assert_eq!(response.fields, vec!["location", "date", "temp", "snow"]);
    assert_eq!(
        response.rows[1],
        vec![
            Scalar::Text("Berlin, DE (resolved)".to_string()),
            Scalar::Date(date(2024, 1, 2)),
            Scalar::Number(1.0),
            Scalar::Null,
        ]
    );
}

#[tokio::test]
async fn test_master_snapshot_serves_repeat_queries() {
    let (source, connector) = create_test_connector(true);
    let query = single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 31), Granularity::Daily);

    connector.get_data(&query).await.unwrap();
    let second = connector.get_data(&query).await.unwrap();

    assert_eq!(second.cache, CacheSource::Master);
    assert_eq!(second.rows.len(), 31);
    assert_eq!(source.calls(), 1);
    assert_eq!(connector.cache().get_cache_stats().master_hits, 1);
}

#[tokio::test]
async fn test_overlapping_range_needs_no_new_fetch() {
    let (source, connector) = create_test_connector(false);

    let first = single_query("Berlin, DE", date(2024, 3, 1), date(2024, 9, 3), Granularity::Daily);
    connector.get_data(&first).await.unwrap();
    assert_eq!(source.calls(), 1);

    let overlap = single_query("Berlin, DE", date(2024, 7, 1), date(2024, 9, 30), Granularity::Daily);
    let response = connector.get_data(&overlap).await.unwrap();

    assert_eq!(response.cache, CacheSource::Range);
    assert_eq!(source.calls(), 1);
    assert_eq!(response.rows.len(), 31 + 31 + 30);
}

#[tokio::test]
async fn test_refetch_keeps_month_buckets_whole() {
    let (source, connector) = create_test_connector(false);
    let january = single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 31), Granularity::Daily);

    connector.get_data(&january).await.unwrap();
    assert_eq!(source.calls(), 1);

    // Reaches into uncached February and March
    let wider = single_query("Berlin, DE", date(2024, 1, 15), date(2024, 3, 15), Granularity::Daily);
    let response = connector.get_data(&wider).await.unwrap();
    assert_eq!(response.cache, CacheSource::Upstream);
    assert_eq!(response.rows.len(), 17 + 29 + 15);
    assert_eq!(source.calls(), 2);
    assert_eq!(
        *source.last_range.lock().unwrap(),
        Some(DateRange::new(date(2024, 1, 1), date(2024, 3, 31)).unwrap())
    );

    let response = connector.get_data(&january).await.unwrap();
    assert_eq!(response.cache, CacheSource::Range);
    assert_eq!(response.rows.len(), 31);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_partial_month_coverage_refetches_whole_range() {
    let (source, connector) = create_test_connector(false);

    connector
        .get_data(&single_query("Berlin, DE", date(2024, 1, 1), date(2024, 2, 29), Granularity::Daily))
        .await
        .unwrap();

    let wider = single_query("Berlin, DE", date(2024, 1, 15), date(2024, 3, 15), Granularity::Daily);
    let response = connector.get_data(&wider).await.unwrap();
    assert_eq!(response.cache, CacheSource::Upstream);
    assert_eq!(source.calls(), 2);
    assert_eq!(response.rows.len(), 17 + 29 + 15);

    // March is now cached too
    let again = connector.get_data(&wider).await.unwrap();
    assert_eq!(again.cache, CacheSource::Range);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_hourly_query_reuses_daily_buckets() {
    let (source, connector) = create_test_connector(false);

    connector
        .get_data(&single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 31), Granularity::Daily))
        .await
        .unwrap();

    let mut hourly = single_query("Berlin, DE", date(2024, 1, 10), date(2024, 1, 11), Granularity::Hourly);
    hourly.fields = vec!["datetime".into(), "temp".into(), "temp_max".into()];
    let response = connector.get_data(&hourly).await.unwrap();

    assert_eq!(response.cache, CacheSource::Range);
    assert_eq!(source.calls(), 1);
    assert_eq!(response.rows.len(), 2 * HOURS_PER_DAY as usize);
    assert_eq!(
        response.rows[1],
        vec![
            Scalar::DateTime(date(2024, 1, 10).and_hms_opt(1, 0, 0).unwrap()),
            Scalar::Number(1.0),
            Scalar::Number(10.0),
        ]
    );
}

#[tokio::test]
async fn test_batch_query_round_trip() {
    let (source, connector) = create_test_connector(false);
    let query = batch_query(&["Berlin, DE", "Paris, FR"], date(2024, 1, 1), date(2024, 1, 31));

    let first = connector.get_data(&query).await.unwrap();
    assert_eq!(first.cache, CacheSource::Upstream);
    assert_eq!(first.rows.len(), 62);
    assert_eq!(first.rows[0][0], Scalar::Text("Berlin, DE (resolved)".to_string()));
    assert_eq!(first.rows[31][0], Scalar::Text("Paris, FR (resolved)".to_string()));
    assert!(first.location.is_none());
    assert_eq!(source.batch_calls.load(Ordering::SeqCst), 1);

    let second = connector.get_data(&query).await.unwrap();
    assert_eq!(second.cache, CacheSource::Batch);
    assert_eq!(second.rows, first.rows);
    assert_eq!(source.calls(), 1);

    // Batch results do not populate month buckets
    let keys = connector.cache().store().list_keys().await.unwrap();
    assert!(keys.iter().all(|k| !k.starts_with("monthly:")));
}

#[tokio::test]
async fn test_configuration_errors_never_reach_upstream() {
    let (source, connector) = create_test_connector(false);
    let base = single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 31), Granularity::Daily);

    let mut no_key = base.clone();
    no_key.config.api_key = Some("   ".to_string());
    let err = connector.get_data(&no_key).await.unwrap_err();
    assert!(matches!(err, ConnectorError::ConfigError(_)));
    assert_eq!(err.status_code(), 400);

    let mut both = base.clone();
    both.config.locations = Some(vec!["Paris, FR".to_string()]);
    assert!(matches!(connector.get_data(&both).await, Err(ConnectorError::ConfigError(_))));

    let mut neither = base.clone();
    neither.config.location = None;
    assert!(matches!(connector.get_data(&neither).await, Err(ConnectorError::ConfigError(_))));

    let mut blank = base.clone();
    blank.config.location = Some("  ".to_string());
    assert!(matches!(connector.get_data(&blank).await, Err(ConnectorError::ConfigError(_))));

    let mut unknown = base.clone();
    unknown.fields.push("pollen".to_string());
    assert!(matches!(connector.get_data(&unknown).await, Err(ConnectorError::InvalidRequest(_))));

    let too_long = single_query("Berlin, DE", date(2020, 1, 1), date(2024, 1, 1), Granularity::Daily);
    assert!(matches!(connector.get_data(&too_long).await, Err(ConnectorError::InvalidRequest(_))));

    let mut inverted = base.clone();
    inverted.date_range = DateRange { start: date(2024, 2, 1), end: date(2024, 1, 1) };
    assert!(matches!(connector.get_data(&inverted).await, Err(ConnectorError::InvalidRequest(_))));

    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_server_default_api_key_is_used() {
    let store = Arc::new(MemoryStore::new(102400));
    let settings = ConnectorSettings {
        default_api_key: Some("server-key".to_string()),
        max_range_days: 400,
    };
    let (source, connector) = create_connector_with_store(store, false, settings);

    let mut query = single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 2), Granularity::Daily);
    query.config.api_key = None;
    connector.get_data(&query).await.unwrap();

    assert_eq!(source.last_api_key.lock().unwrap().as_deref(), Some("server-key"));
}

#[tokio::test]
async fn test_upstream_errors_propagate_and_cache_nothing() {
    let (source, connector) = create_test_connector(true);
    let query = single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 31), Granularity::Daily);

    source.fail(Some(503));
    let err = connector.get_data(&query).await.unwrap_err();
    assert!(err.is_upstream_error());
    assert_eq!(err.status_code(), 502);
    assert_eq!(err.report().message, "The weather data service is currently unavailable.");
    assert!(connector.cache().store().list_keys().await.unwrap().is_empty());

    source.fail(Some(401));
    let err = connector.get_data(&query).await.unwrap_err();
    assert!(err.user_message().contains("API key"));

    source.fail(None);
    let response = connector.get_data(&query).await.unwrap();
    assert_eq!(response.cache, CacheSource::Upstream);
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_population_failure_still_returns_data() {
    let store = Arc::new(ReadOnlyStore(MemoryStore::new(102400)));
    let (source, connector) = create_connector_with_store(store, true, settings());
    let query = single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 31), Granularity::Daily);

    let first = connector.get_data(&query).await.unwrap();
    assert_eq!(first.rows.len(), 31);
    assert!(connector.cache().get_cache_stats().population_failures >= 2);

    let second = connector.get_data(&query).await.unwrap();
    assert_eq!(second.cache, CacheSource::Upstream);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_query_metrics_are_recorded() {
    let (_source, connector) = create_test_connector(false);
    let query = single_query("Berlin, DE", date(2024, 1, 1), date(2024, 1, 5), Granularity::Daily);

    connector.get_data(&query).await.unwrap();
    connector.get_data(&query).await.unwrap();

    let output = connector.metrics().gather().unwrap();
    assert!(output.contains("connector_queries_total{source=\"upstream\"} 1"));
    assert!(output.contains("connector_queries_total{source=\"range\"} 1"));
    assert!(output.contains("upstream_requests_total{kind=\"timeline\"} 1"));
    assert!(output.contains("cache_misses_total{layer=\"range\"} 1"));
}
