use axum::{
    extract::{rejection::JsonRejection, Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::{CacheManager, NAMESPACES};
use crate::config::Config;
use crate::connector::{ConnectorSettings, FieldSpec, WeatherConnector};
use crate::error::{ConnectorError, ConnectorResult, ErrorReport};
use crate::observability::{HealthService, InflightGuard, MetricsRegistry, Timer, health_routes};
use crate::types::{DataResponse, QueryDescriptor};
use crate::weather::{WeatherApiClient, WeatherSource};

/// HTTP front end for the reporting-tool host
pub struct ConnectorServer {
    app: Router,
    config: Config,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Query resolution and cache layers
    connector: Arc<WeatherConnector>,
}

/// Error half of every handler result
type ApiError = (StatusCode, Json<ErrorReport>);

impl ConnectorServer {
    /// Create a server with the configured cache backend and the live weather API client
    pub async fn new(config: Config) -> ConnectorResult<Self> {
        info!("Initializing connector server components...");

        let cache = Arc::new(CacheManager::from_config(&config).await?);
        let source: Arc<dyn WeatherSource> = Arc::new(WeatherApiClient::new(&config.weather)?);
        let metrics = MetricsRegistry::new()?;

        let connector = Arc::new(WeatherConnector::new(
            cache,
            source,
            ConnectorSettings::from_config(&config.weather),
            metrics,
        )?);

        let app = build_router(config.clone(), connector);

        info!("Connector server initialized successfully");
        Ok(ConnectorServer { app, config })
    }

    /// Run the HTTP server until the listener fails
    pub async fn run(self) -> ConnectorResult<()> {
        let bind_addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| ConnectorError::ConfigError(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        info!("HTTP server listening on {}", bind_addr);

        axum::serve(listener, self.app)
            .await
            .map_err(|e| ConnectorError::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// Assemble routes and middleware around an existing connector
pub fn build_router(config: Config, connector: Arc<WeatherConnector>) -> Router {
    let health = HealthService::new(connector.cache().clone()).with_metrics(connector.metrics().clone());
    let state = AppState {
        config: config.clone(),
        connector,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/v1/schema", get(schema_handler))
        .route("/v1/data", post(data_handler))
        .route("/v1/cache", delete(purge_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone())
        .merge(health_routes().with_state(health))
        .layer(RequestBodyLimitLayer::new(config.server.max_request_size))
        .layer(middleware::from_fn_with_state(state.clone(), timeout_middleware))
        .layer(middleware::from_fn(security_middleware))
        .layer(middleware::from_fn_with_state(state, metrics_middleware))
        .layer(cors)
}

/// Report an error to the client and log the detail under its diagnostic id
fn error_response(state: &AppState, error: &ConnectorError) -> ApiError {
    let report = error.report();
    state.connector.logging().log_diagnostic(report.diagnostic_id, error);

    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(report))
}

/// Middleware bounding request processing time
async fn timeout_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limit = Duration::from_millis(state.config.server.request_timeout_ms);
    let path = request.uri().path().to_string();

    match timeout(limit, next.run(request)).await {
        Ok(response) => Ok(response),
        Err(_) => {
            error!("Request timeout on {} after {:?}", path, limit);
            Err((
                StatusCode::GATEWAY_TIMEOUT,
                Json(ErrorReport {
                    error: "timeout".to_string(),
                    message: "Loading weather data took too long. Try a shorter date range.".to_string(),
                    diagnostic_id: Uuid::new_v4(),
                }),
            ))
        }
    }
}

/// Middleware recording in-flight requests, request count and latency
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let metrics = state.connector.metrics().metrics.clone();
    let _inflight = InflightGuard::new(metrics.inflight_requests.clone());
    let timer = Timer::new(metrics.http_request_duration_seconds.clone());

    let response = next.run(request).await;

    timer.observe();
    metrics.http_requests_total.inc();
    response
}

/// Middleware for security headers
async fn security_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));

    response
}

/// Declared columns
#[derive(Serialize)]
struct SchemaResponse {
    fields: &'static [FieldSpec],
}

async fn schema_handler(State(state): State<AppState>) -> Json<SchemaResponse> {
    Json(SchemaResponse {
        fields: state.connector.schema(),
    })
}

/// Handler for data queries
async fn data_handler(
    State(state): State<AppState>,
    body: Result<Json<QueryDescriptor>, JsonRejection>,
) -> Result<Json<DataResponse>, ApiError> {
    let Json(query) = body.map_err(|rejection| {
        let (status, report) = error_response(
            &state,
            &ConnectorError::InvalidRequest(format!("Malformed query descriptor: {}", rejection.body_text())),
        );
        match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => (StatusCode::PAYLOAD_TOO_LARGE, report),
            _ => (status, report),
        }
    })?;

    match state.connector.get_data(&query).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(error_response(&state, &e)),
    }
}

#[derive(Debug, Deserialize)]
struct PurgeParams {
    prefix: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub prefix: Option<String>,
    pub removed: usize,
}

/// Handler for cache purges; prefixes outside this service's namespaces are refused
async fn purge_handler(
    State(state): State<AppState>,
    Query(params): Query<PurgeParams>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let prefix = params.prefix.filter(|p| !p.is_empty());

    if let Some(prefix) = &prefix {
        if !NAMESPACES.iter().any(|ns| prefix.starts_with(ns)) {
            return Err(error_response(
                &state,
                &ConnectorError::InvalidRequest(format!(
                    "Prefix must start with one of: {}",
                    NAMESPACES.join(", ")
                )),
            ));
        }
    }

    let removed = state
        .connector
        .cache()
        .purge(prefix.as_deref())
        .await
        .map_err(|e| error_response(&state, &e))?;
    state.connector.logging().log_cache_purge(prefix.as_deref(), removed);

    Ok(Json(PurgeResponse { prefix, removed }))
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let metrics = state.connector.metrics();
    metrics.observe_cache_stats(&state.connector.cache().get_cache_stats());

    match metrics.gather() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => error_response(&state, &e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::error::ConnectorResult;
    use crate::types::DateRange;
    use crate::weather::{BatchRequest, TimelineRequest, TimelineResponse, WeatherRecord};
    use async_trait::async_trait;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Weather source returning one record per requested day
    #[derive(Default)]
    struct FixedSource {
        calls: AtomicUsize,
        failing: AtomicBool,
        slow: AtomicBool,
    }

    impl FixedSource {
        fn timeline(location: &str, range: &DateRange) -> TimelineResponse {
            let days = range
                .start
                .iter_days()
                .take_while(|d| *d <= range.end)
                .map(|d| {
                    let mut day = WeatherRecord::empty(d);
                    day.temp_max = Some(21.5);
                    day
                })
                .collect();

            TimelineResponse {
                resolved_address: Some(format!("{}, Germany", location)),
                address: Some(location.to_string()),
                timezone: None,
                latitude: None,
                longitude: None,
                days,
            }
        }

        async fn check(&self) -> ConnectorResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(ConnectorError::Upstream {
                    status: Some(500),
                    message: "https://api.example.com/timeline?key=SECRET".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl WeatherSource for FixedSource {
        async fn fetch_timeline(&self, request: &TimelineRequest) -> ConnectorResult<TimelineResponse> {
            self.check().await?;
            Ok(Self::timeline(&request.location, &request.range))
        }

        async fn fetch_batch(&self, request: &BatchRequest) -> ConnectorResult<Vec<TimelineResponse>> {
            self.check().await?;
            Ok(request
                .locations
                .iter()
                .map(|location| Self::timeline(location, &request.range))
                .collect())
        }
    }

    fn create_test_server_with(config: Config, source: Arc<FixedSource>) -> TestServer {
        let store = Arc::new(MemoryStore::new(config.cache.max_value_bytes));
        let cache = Arc::new(CacheManager::new(&config.cache, store).unwrap());
        let settings = ConnectorSettings {
            default_api_key: None,
            max_range_days: config.weather.max_range_days,
        };
        let connector = Arc::new(
            WeatherConnector::new(cache, source, settings, MetricsRegistry::new().unwrap()).unwrap(),
        );

        TestServer::new(build_router(config, connector)).unwrap()
    }

    fn create_test_server(source: Arc<FixedSource>) -> TestServer {
        create_test_server_with(Config::default(), source)
    }

    fn berlin_january() -> Value {
        json!({
            "fields": ["date", "temp_max"],
            "date_range": { "start": "2024-01-01", "end": "2024-01-31" },
            "config": { "api_key": "test-key", "location": "Berlin" }
        })
    }

    #[tokio::test]
    async fn test_schema_endpoint() {
        let server = create_test_server(Arc::new(FixedSource::default()));

        let response = server.get("/v1/schema").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: Value = response.json();
        let fields = body["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 26);
        assert_eq!(fields[0]["id"], "location");
        assert_eq!(fields[1]["value_type"], "date");
        assert_eq!(fields[1]["dimension"], true);
    }

    #[tokio::test]
    async fn test_data_query_then_master_hit() {
        let source = Arc::new(FixedSource::default());
        let server = create_test_server(source.clone());

        let response = server.post("/v1/data").json(&berlin_january()).await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: DataResponse = response.json();
        assert_eq!(body.fields, vec!["date", "temp_max"]);
        assert_eq!(body.rows.len(), 31);
        assert_eq!(body.location.as_deref(), Some("Berlin, Germany"));
        assert_eq!(body.cache, crate::types::CacheSource::Upstream);

        let body: DataResponse = server.post("/v1/data").json(&berlin_january()).await.json();
        assert_eq!(body.cache, crate::types::CacheSource::Master);
        assert_eq!(body.rows.len(), 31);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_config_error() {
        let source = Arc::new(FixedSource::default());
        let server = create_test_server(source.clone());

        let mut query = berlin_january();
        query["config"]["api_key"] = Value::Null;

        let response = server.post("/v1/data").json(&query).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let report: ErrorReport = response.json();
        assert_eq!(report.error, "config_error");
        assert!(report.message.to_lowercase().contains("api key"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_hides_detail() {
        let source = Arc::new(FixedSource::default());
        source.failing.store(true, Ordering::SeqCst);
        let server = create_test_server(source);

        let response = server.post("/v1/data").json(&berlin_january()).await;
        assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);

        let report: ErrorReport = response.json();
        assert_eq!(report.error, "upstream_error");
        assert!(!report.message.contains("SECRET"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_request() {
        let server = create_test_server(Arc::new(FixedSource::default()));

        let response = server
            .post("/v1/data")
            .json(&json!({ "fields": ["date"], "date_range": "January" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let report: ErrorReport = response.json();
        assert_eq!(report.error, "invalid_request");
    }

    #[tokio::test]
    async fn test_inverted_range_is_invalid_request() {
        let server = create_test_server(Arc::new(FixedSource::default()));

        let mut query = berlin_january();
        query["date_range"] = json!({ "start": "2024-02-01", "end": "2024-01-01" });

        let response = server.post("/v1/data").json(&query).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<ErrorReport>().error, "invalid_request");
    }

    #[tokio::test]
    async fn test_purge_master_namespace() {
        let source = Arc::new(FixedSource::default());
        let server = create_test_server(source.clone());

        server.post("/v1/data").json(&berlin_january()).await;

        let response = server.delete("/v1/cache").add_query_param("prefix", "master:").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let purge: PurgeResponse = response.json();
        assert_eq!(purge.prefix.as_deref(), Some("master:"));
        assert_eq!(purge.removed, 1);

        // Month buckets survive, so the repeat is served by the range cache
        let body: DataResponse = server.post("/v1/data").json(&berlin_january()).await.json();
        assert_eq!(body.cache, crate::types::CacheSource::Range);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_purge_everything_then_refetch() {
        let source = Arc::new(FixedSource::default());
        let server = create_test_server(source.clone());

        server.post("/v1/data").json(&berlin_january()).await;

        let purge: PurgeResponse = server.delete("/v1/cache").await.json();
        assert!(purge.prefix.is_none());
        assert_eq!(purge.removed, 2);

        let body: DataResponse = server.post("/v1/data").json(&berlin_january()).await.json();
        assert_eq!(body.cache, crate::types::CacheSource::Upstream);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_purge_rejects_foreign_prefix() {
        let server = create_test_server(Arc::new(FixedSource::default()));

        let response = server.delete("/v1/cache").add_query_param("prefix", "session:").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<ErrorReport>().error, "invalid_request");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let server = create_test_server(Arc::new(FixedSource::default()));

        server.post("/v1/data").json(&berlin_january()).await;

        let response = server.get("/metrics").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body = response.text();
        assert!(body.contains("connector_queries_total{source=\"upstream\"} 1"));
        assert!(body.contains("upstream_requests_total"));
        assert!(body.contains("cache_hit_ratio{layer=\"range\"} 0"));
        assert!(body.contains("http_requests_total"));
    }

    #[tokio::test]
    async fn test_health_routes_are_mounted() {
        let server = create_test_server(Arc::new(FixedSource::default()));

        let response = server.get("/health/live").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let response = server.get("/health/ready").await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_security_headers() {
        let server = create_test_server(Arc::new(FixedSource::default()));

        let response = server.get("/v1/schema").await;
        assert_eq!(response.header("x-content-type-options"), "nosniff");
        assert_eq!(response.header("x-frame-options"), "DENY");
        assert_eq!(response.header("cache-control"), "no-store");
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let source = Arc::new(FixedSource::default());
        source.slow.store(true, Ordering::SeqCst);

        let mut config = Config::default();
        config.server.request_timeout_ms = 50;
        let server = create_test_server_with(config, source);

        let response = server.post("/v1/data").json(&berlin_january()).await;
        assert_eq!(response.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.json::<ErrorReport>().error, "timeout");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut config = Config::default();
        config.server.max_request_size = 128;
        let server = create_test_server_with(config, Arc::new(FixedSource::default()));

        let mut query = berlin_january();
        query["fields"] = json!(vec!["date"; 64]);

        let response = server.post("/v1/data").json(&query).await;
        assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
