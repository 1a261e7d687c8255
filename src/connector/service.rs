/// Query resolution for the reporting-tool host
///
/// This module implements the complete data path:
/// - Query validation (fields, range, API key, location target)
/// - Master snapshot lookup
/// - Single-location resolution through the month-partitioned range cache
/// - Batch resolution through the flat result cache
/// - Row building and projection onto the requested fields

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cache::{CacheManager, CachedRows, Fingerprint};
use crate::config::WeatherApiConfig;
use crate::connector::fields::{build_rows, project, resolve_fields, validate_schema};
use crate::connector::schema::{FieldId, FieldSpec, DECLARED_FIELDS};
use crate::error::{ConnectorError, ConnectorResult, ValidationError};
use crate::observability::{LoggingService, MetricsRegistry};
use crate::types::{
    CacheSource, DataResponse, DateRange, Granularity, QueryConfig, QueryDescriptor, QueryTarget, Units,
};
use crate::weather::{BatchRequest, TimelineRequest, TimelineResponse, WeatherRecord, WeatherSource};

/// Connector limits and defaults
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// API key used when a query does not carry its own
    pub default_api_key: Option<String>,
    /// Longest date range a single query may request
    pub max_range_days: i64,
}

impl ConnectorSettings {
    pub fn from_config(config: &WeatherApiConfig) -> Self {
        Self {
            default_api_key: config.api_key.clone(),
            max_range_days: config.max_range_days,
        }
    }
}

/// A validated query
#[derive(Debug, Clone)]
struct QueryPlan {
    fields: Vec<FieldId>,
    target: QueryTarget,
    range: DateRange,
    units: Units,
    granularity: Granularity,
    api_key: String,
}

/// Weather connector with layered caching
pub struct WeatherConnector {
    cache: Arc<CacheManager>,
    source: Arc<dyn WeatherSource>,
    settings: ConnectorSettings,
    metrics: MetricsRegistry,
    logging: LoggingService,
}

impl WeatherConnector {
    /// Create a connector, validating the declared schema against the field mapping
    pub fn new(
        cache: Arc<CacheManager>,
        source: Arc<dyn WeatherSource>,
        settings: ConnectorSettings,
        metrics: MetricsRegistry,
    ) -> ConnectorResult<Self> {
        validate_schema(DECLARED_FIELDS)?;

        Ok(Self {
            cache,
            source,
            settings,
            metrics,
            logging: LoggingService::new(),
        })
    }

    /// Columns declared to the host
    pub fn schema(&self) -> &'static [FieldSpec] {
        DECLARED_FIELDS
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn logging(&self) -> &LoggingService {
        &self.logging
    }

    /// Resolve a query into rows aligned to the requested fields
    #[instrument(skip(self, query), fields(
        field_count = query.fields.len(),
        start = %query.date_range.start,
        end = %query.date_range.end
    ))]
    pub async fn get_data(&self, query: &QueryDescriptor) -> ConnectorResult<DataResponse> {
        let trace_id = Uuid::new_v4();
        let started = Instant::now();

        let result = self.resolve(query, trace_id).await;

        let elapsed = started.elapsed();
        match &result {
            Ok(response) => {
                self.metrics
                    .record_query(response.cache, elapsed.as_secs_f64(), response.rows.len());
                self.logging.log_query_completed(
                    trace_id,
                    elapsed.as_secs_f64() * 1000.0,
                    response.rows.len(),
                    response.cache,
                );
            }
            Err(e) => {
                self.metrics.record_query_error(e);
                let context = HashMap::from([
                    ("trace_id".to_string(), json!(trace_id.to_string())),
                    ("duration_ms".to_string(), json!(elapsed.as_secs_f64() * 1000.0)),
                ]);
                self.logging.log_error(e, Some(context));
            }
        }
        result
    }

    async fn resolve(&self, query: &QueryDescriptor, trace_id: Uuid) -> ConnectorResult<DataResponse> {
        let plan = self.plan(query)?;
        let locations = plan.target.locations();
        self.logging
            .log_query_received(trace_id, &locations, &plan.range, plan.granularity, plan.fields.len());

        let master_key = Fingerprint::master(&locations, &plan.range, plan.granularity, plan.units);
        if self.cache.master_enabled() {
            let lookup = Instant::now();
            let snapshot = self.cache.get_master(&master_key).await;
            self.record_lookup("master", master_key.as_str(), snapshot.is_some(), lookup);
            if let Some(snapshot) = snapshot {
                debug!("Serving {} from master snapshot", master_key);
                return Ok(respond(&plan, snapshot, CacheSource::Master));
            }
        }

        let (rows, source) = match &plan.target {
            QueryTarget::Single(location) => self.resolve_single(location, &plan).await?,
            QueryTarget::Batch(locations) => self.resolve_batch(locations, &plan).await?,
        };

        self.cache.set_master(&master_key, &rows).await;

        Ok(respond(&plan, rows, source))
    }

    /// Range cache first; on any miss fetch the touched months whole and repopulate them
    async fn resolve_single(&self, location: &str, plan: &QueryPlan) -> ConnectorResult<(CachedRows, CacheSource)> {
        let lookup = Instant::now();
        let cached = self.cache.get_range(location, plan.units, &plan.range).await;
        self.record_lookup("range", &format!("{}|{}", location, plan.range), cached.is_some(), lookup);

        if let Some(series) = cached {
            let rows = build_rows(&series.location, &series.records, plan.granularity);
            return Ok((
                CachedRows {
                    location: Some(series.location),
                    rows,
                },
                CacheSource::Range,
            ));
        }

        let request = TimelineRequest {
            location: location.to_string(),
            range: plan.range.whole_months(),
            units: plan.units,
            include_hours: true,
            api_key: plan.api_key.clone(),
        };
        let response = self.fetch_timeline(&request).await?;
        let resolved = response.display_name(location);

        if !response.days.is_empty() {
            self.cache
                .set_range(location, plan.units, &resolved, &response.days)
                .await;
        }

        let days = within_range(response.days, &plan.range);
        let rows = build_rows(&resolved, &days, plan.granularity);
        info!("Fetched {} days for '{}', {} rows", days.len(), resolved, rows.len());

        Ok((
            CachedRows {
                location: Some(resolved),
                rows,
            },
            CacheSource::Upstream,
        ))
    }

    /// Flat batch cache; any miss re-fetches the whole location set
    async fn resolve_batch(&self, locations: &[String], plan: &QueryPlan) -> ConnectorResult<(CachedRows, CacheSource)> {
        let key = Fingerprint::batch(locations, &plan.range, plan.units, plan.granularity);
        let lookup = Instant::now();
        let cached = self.cache.get_batch(&key).await;
        self.record_lookup("batch", key.as_str(), cached.is_some(), lookup);

        if let Some(rows) = cached {
            return Ok((rows, CacheSource::Batch));
        }

        let request = BatchRequest {
            locations: locations.to_vec(),
            range: plan.range,
            units: plan.units,
            include_hours: plan.granularity == Granularity::Hourly,
            api_key: plan.api_key.clone(),
        };
        let responses = self.fetch_batch(&request).await?;

        let mut rows = Vec::new();
        for (requested, response) in locations.iter().zip(responses) {
            let name = response.display_name(requested);
            let days = within_range(response.days, &plan.range);
            rows.extend(build_rows(&name, &days, plan.granularity));
        }

        let rows = CachedRows { location: None, rows };
        self.cache.set_batch(&key, &rows).await;
        Ok((rows, CacheSource::Upstream))
    }

    async fn fetch_timeline(&self, request: &TimelineRequest) -> ConnectorResult<TimelineResponse> {
        let started = Instant::now();
        let result = self.source.fetch_timeline(request).await;
        self.record_fetch("timeline", 1, started, result.is_ok());
        result
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> ConnectorResult<Vec<TimelineResponse>> {
        let started = Instant::now();
        let result = self.source.fetch_batch(request).await;
        self.record_fetch("batch", request.locations.len(), started, result.is_ok());
        result
    }

    fn record_lookup(&self, layer: &str, key: &str, hit: bool, started: Instant) {
        self.metrics.record_cache_lookup(layer, hit);
        self.logging.log_cache_operation(
            "GET",
            layer,
            key,
            hit,
            Some(started.elapsed().as_secs_f64() * 1000.0),
        );
    }

    fn record_fetch(&self, kind: &str, location_count: usize, started: Instant, success: bool) {
        let elapsed = started.elapsed();
        self.metrics.record_upstream(kind, elapsed.as_secs_f64(), success);
        self.logging
            .log_upstream_fetch(kind, location_count, elapsed.as_secs_f64() * 1000.0, success);
    }

    fn plan(&self, query: &QueryDescriptor) -> ConnectorResult<QueryPlan> {
        let fields = resolve_fields(&query.fields)?;

        let range = DateRange::new(query.date_range.start, query.date_range.end)?;
        if range.num_days() > self.settings.max_range_days {
            return Err(ConnectorError::from(ValidationError::InvalidRange(format!(
                "{} days requested, at most {} allowed",
                range.num_days(),
                self.settings.max_range_days
            ))));
        }

        let api_key = query
            .config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .or_else(|| self.settings.default_api_key.clone())
            .ok_or_else(|| ConnectorError::ConfigError("A weather API key is required".to_string()))?;

        Ok(QueryPlan {
            fields,
            target: resolve_target(&query.config)?,
            range,
            units: query.config.units,
            granularity: query.config.granularity,
            api_key,
        })
    }
}

/// Single location or location list, exactly one of them
fn resolve_target(config: &QueryConfig) -> ConnectorResult<QueryTarget> {
    match (&config.location, &config.locations) {
        (Some(_), Some(_)) => Err(ConnectorError::ConfigError(
            "Configure either a location or a location list, not both".to_string(),
        )),
        (None, None) => Err(ConnectorError::ConfigError(
            "A location or location list is required".to_string(),
        )),
        (Some(location), None) => Ok(QueryTarget::Single(clean_location(location)?)),
        (None, Some(locations)) => {
            if locations.is_empty() {
                return Err(ValidationError::InvalidLocation("location list is empty".to_string()).into());
            }
            let cleaned = locations
                .iter()
                .map(|location| clean_location(location))
                .collect::<ConnectorResult<Vec<_>>>()?;
            Ok(QueryTarget::Batch(cleaned))
        }
    }
}

fn clean_location(location: &str) -> ConnectorResult<String> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidLocation("location is empty".to_string()).into());
    }
    if trimmed.contains('|') {
        return Err(ValidationError::InvalidLocation(format!("'{}' contains '|'", trimmed)).into());
    }
    Ok(trimmed.to_string())
}

fn within_range(mut days: Vec<WeatherRecord>, range: &DateRange) -> Vec<WeatherRecord> {
    days.retain(|day| range.contains(day.datetime));
    days.sort_by_key(|day| day.datetime);
    days
}

fn respond(plan: &QueryPlan, cached: CachedRows, source: CacheSource) -> DataResponse {
    DataResponse {
        fields: plan.fields.iter().map(|field| field.id().to_string()).collect(),
        rows: project(&cached.rows, &plan.fields),
        location: cached.location,
        cache: source,
    }
}
