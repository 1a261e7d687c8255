use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use crate::cache::{CacheManager, CacheStats};
use crate::observability::MetricsRegistry;

/// Name under which the cache store check is reported
pub const CACHE_STORE_COMPONENT: &str = "cache_store";

/// Store round trips slower than this report the store as degraded
pub const DEFAULT_SLOW_STORE_THRESHOLD: Duration = Duration::from_millis(500);

/// Health check service for liveness and readiness checks
#[derive(Clone)]
pub struct HealthService {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    cache: Arc<CacheManager>,
    metrics: Option<MetricsRegistry>,
    slow_after: Duration,
    started_at: Instant,
}

/// Last check result of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub last_check: chrono::DateTime<chrono::Utc>,
    pub message: Option<String>,
    pub response_time_ms: Option<f64>,
}

/// Overall health status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub service: ServiceInfo,
    pub components: HashMap<String, ComponentHealth>,
    pub uptime_seconds: u64,
}

/// Service information
#[derive(Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub environment: String,
}

#[derive(Serialize)]
pub struct DetailedHealthResponse {
    #[serde(flatten)]
    pub health: HealthResponse,
    pub cache: CacheStats,
}

impl HealthService {
    /// Create a new health service probing `cache`
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            cache,
            metrics: None,
            slow_after: DEFAULT_SLOW_STORE_THRESHOLD,
            started_at: Instant::now(),
        }
    }

    /// Record check durations and component status in `metrics`
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_slow_threshold(mut self, slow_after: Duration) -> Self {
        self.slow_after = slow_after;
        self
    }

    /// Record the outcome of a check
    pub async fn update_component_health(
        &self,
        component: &str,
        status: HealthStatus,
        message: Option<String>,
        response_time_ms: Option<f64>,
    ) {
        let health = ComponentHealth {
            status,
            last_check: chrono::Utc::now(),
            message,
            response_time_ms,
        };

        let mut components = self.components.write().await;
        components.insert(component.to_string(), health);
    }

    /// Check that the cache store accepts and returns a value.
    ///
    /// A successful but slow round trip is reported as degraded.
    pub async fn check_cache_health(&self) -> (HealthStatus, Option<String>, Option<f64>) {
        let start = Instant::now();

        let result = self.cache.health_check().await;
        let duration = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.metrics.health_check_duration_seconds.observe(duration.as_secs_f64());
        }

        match result {
            Ok(()) if duration > self.slow_after => (
                HealthStatus::Degraded,
                Some(format!(
                    "Cache store responded in {} ms (threshold {} ms)",
                    duration.as_millis(),
                    self.slow_after.as_millis()
                )),
                Some(duration.as_secs_f64() * 1000.0),
            ),
            Ok(()) => (HealthStatus::Healthy, None, Some(duration.as_secs_f64() * 1000.0)),
            Err(e) => (
                HealthStatus::Unhealthy,
                Some(format!("Cache store check failed: {}", e)),
                None,
            ),
        }
    }

    /// Probe the cache store and fold every recorded component into one status
    pub async fn comprehensive_health_check(&self) -> HealthResponse {
        let (status, message, response_time) = self.check_cache_health().await;
        self.update_component_health(CACHE_STORE_COMPONENT, status, message, response_time)
            .await;

        let components = self.components.read().await;
        let overall_status = calculate_overall_status(&components);

        if let Some(metrics) = &self.metrics {
            let healthy = if overall_status == HealthStatus::Unhealthy { 0.0 } else { 1.0 };
            metrics.metrics.component_health_status.set(healthy);
        }

        HealthResponse {
            status: overall_status,
            timestamp: chrono::Utc::now(),
            service: ServiceInfo {
                name: "weather-bi-connector".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            },
            components: components.clone(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Overall health: any unhealthy component makes the service unhealthy
fn calculate_overall_status(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
    let mut has_degraded = false;

    for health in components.values() {
        match health.status {
            HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
            HealthStatus::Degraded => has_degraded = true,
            HealthStatus::Healthy => {}
        }
    }

    if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Liveness: the process answers, nothing else is checked
pub async fn liveness_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Readiness: 503 while the cache store check fails
pub async fn readiness_handler(
    State(health_service): State<HealthService>,
) -> (StatusCode, Json<HealthResponse>) {
    let health = health_service.comprehensive_health_check().await;

    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness report plus cache layer counters
pub async fn health_handler(
    State(health_service): State<HealthService>,
) -> Json<DetailedHealthResponse> {
    let health = health_service.comprehensive_health_check().await;
    let cache = health_service.cache.get_cache_stats();

    Json(DetailedHealthResponse { health, cache })
}

/// `/health/live`, `/health/ready` and `/health`
pub fn health_routes() -> Router<HealthService> {
    Router::new()
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/health", get(health_handler))
}
