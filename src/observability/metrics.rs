use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry, Encoder, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use crate::cache::CacheStats;
use crate::error::{ConnectorError, ConnectorResult};
use crate::types::CacheSource;

/// Prometheus metrics registry and collectors
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

/// All application metrics
pub struct Metrics {
    // Query metrics
    pub queries_total: CounterVec,
    pub query_duration_seconds: Histogram,
    pub query_errors_total: CounterVec,
    pub rows_returned: Histogram,

    // Cache metrics
    pub cache_hits_total: CounterVec,
    pub cache_misses_total: CounterVec,
    pub cache_hit_ratio: GaugeVec,
    pub cache_read_failures: Gauge,
    pub cache_population_failures: Gauge,
    pub cache_corrupt_entries: Gauge,

    // Upstream metrics
    pub upstream_requests_total: CounterVec,
    pub upstream_errors_total: Counter,
    pub upstream_duration_seconds: Histogram,

    // HTTP metrics
    pub inflight_requests: Gauge,
    pub http_requests_total: Counter,
    pub http_request_duration_seconds: Histogram,

    // Health metrics
    pub health_check_duration_seconds: Histogram,
    pub component_health_status: Gauge,
}

fn metric_error(name: &str, e: prometheus::Error) -> ConnectorError {
    ConnectorError::Internal(format!("Failed to create {} metric: {}", name, e))
}

impl MetricsRegistry {
    /// Create a new metrics registry with all collectors
    pub fn new() -> ConnectorResult<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(&registry)?);

        Ok(Self { registry, metrics })
    }

    /// Get metrics in Prometheus text format
    pub fn gather(&self) -> ConnectorResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ConnectorError::Internal(format!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer)
            .map_err(|e| ConnectorError::Internal(format!("Failed to convert metrics to string: {}", e)))
    }

    /// Record which layer answered a query
    pub fn record_query(&self, source: CacheSource, duration_secs: f64, rows: usize) {
        let m = &self.metrics;
        m.queries_total.with_label_values(&[source_label(source)]).inc();
        m.query_duration_seconds.observe(duration_secs);
        m.rows_returned.observe(rows as f64);
    }

    pub fn record_query_error(&self, error: &ConnectorError) {
        self.metrics
            .query_errors_total
            .with_label_values(&[error.error_type()])
            .inc();
    }

    /// Record a cache lookup on one layer (`master`, `range`, `batch`)
    pub fn record_cache_lookup(&self, layer: &str, hit: bool) {
        let counter = if hit {
            &self.metrics.cache_hits_total
        } else {
            &self.metrics.cache_misses_total
        };
        counter.with_label_values(&[layer]).inc();
    }

    pub fn record_upstream(&self, kind: &str, duration_secs: f64, success: bool) {
        let m = &self.metrics;
        m.upstream_requests_total.with_label_values(&[kind]).inc();
        m.upstream_duration_seconds.observe(duration_secs);
        if !success {
            m.upstream_errors_total.inc();
        }
    }

    /// Copy cache manager counters into gauges, called before exposition
    pub fn observe_cache_stats(&self, stats: &CacheStats) {
        let m = &self.metrics;
        m.cache_hit_ratio.with_label_values(&["range"]).set(stats.range_hit_ratio());
        m.cache_hit_ratio.with_label_values(&["batch"]).set(stats.batch_hit_ratio());
        m.cache_hit_ratio.with_label_values(&["master"]).set(stats.master_hit_ratio());
        m.cache_read_failures.set(stats.read_failures as f64);
        m.cache_population_failures.set(stats.population_failures as f64);
        m.cache_corrupt_entries.set(stats.corrupt_entries as f64);
    }
}

fn source_label(source: CacheSource) -> &'static str {
    match source {
        CacheSource::Master => "master",
        CacheSource::Range => "range",
        CacheSource::Batch => "batch",
        CacheSource::Upstream => "upstream",
    }
}

impl Metrics {
    fn new(registry: &Registry) -> ConnectorResult<Self> {
        // Query metrics
        let queries_total = CounterVec::new(
            Opts::new("connector_queries_total", "Queries answered, by serving layer"),
            &["source"],
        )
        .map_err(|e| metric_error("connector_queries_total", e))?;

        let query_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "connector_query_duration_seconds",
            "Duration of query resolution in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]))
        .map_err(|e| metric_error("connector_query_duration_seconds", e))?;

        let query_errors_total = CounterVec::new(
            Opts::new("connector_query_errors_total", "Failed queries, by error type"),
            &["error_type"],
        )
        .map_err(|e| metric_error("connector_query_errors_total", e))?;

        let rows_returned = Histogram::with_opts(HistogramOpts::new(
            "connector_rows_returned",
            "Rows returned per query"
        ).buckets(vec![1.0, 10.0, 31.0, 100.0, 366.0, 1000.0, 8784.0, 50000.0]))
        .map_err(|e| metric_error("connector_rows_returned", e))?;

        // Cache metrics
        let cache_hits_total = CounterVec::new(
            Opts::new("cache_hits_total", "Cache hits, by layer"),
            &["layer"],
        )
        .map_err(|e| metric_error("cache_hits_total", e))?;

        let cache_misses_total = CounterVec::new(
            Opts::new("cache_misses_total", "Cache misses, by layer"),
            &["layer"],
        )
        .map_err(|e| metric_error("cache_misses_total", e))?;

        let cache_hit_ratio = GaugeVec::new(
            Opts::new("cache_hit_ratio", "Hit ratio since start, by layer"),
            &["layer"],
        )
        .map_err(|e| metric_error("cache_hit_ratio", e))?;

        let cache_read_failures = Gauge::new("cache_read_failures", "Cache reads that failed and were served as misses")
            .map_err(|e| metric_error("cache_read_failures", e))?;

        let cache_population_failures = Gauge::new("cache_population_failures", "Cache writes that failed and were ignored")
            .map_err(|e| metric_error("cache_population_failures", e))?;

        let cache_corrupt_entries = Gauge::new("cache_corrupt_entries", "Corrupt cache entries discarded")
            .map_err(|e| metric_error("cache_corrupt_entries", e))?;

        // Upstream metrics
        let upstream_requests_total = CounterVec::new(
            Opts::new("upstream_requests_total", "Weather API requests, by kind"),
            &["kind"],
        )
        .map_err(|e| metric_error("upstream_requests_total", e))?;

        let upstream_errors_total = Counter::new("upstream_errors_total", "Failed weather API requests")
            .map_err(|e| metric_error("upstream_errors_total", e))?;

        let upstream_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "upstream_duration_seconds",
            "Duration of weather API requests in seconds"
        ).buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]))
        .map_err(|e| metric_error("upstream_duration_seconds", e))?;

        // HTTP metrics
        let inflight_requests = Gauge::new("inflight_requests", "Number of requests currently being processed")
            .map_err(|e| metric_error("inflight_requests", e))?;

        let http_requests_total = Counter::new("http_requests_total", "Total number of HTTP requests")
            .map_err(|e| metric_error("http_requests_total", e))?;

        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "Duration of HTTP requests in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]))
        .map_err(|e| metric_error("http_request_duration_seconds", e))?;

        // Health metrics
        let health_check_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "health_check_duration_seconds",
            "Duration of health checks in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]))
        .map_err(|e| metric_error("health_check_duration_seconds", e))?;

        let component_health_status = Gauge::new("component_health_status", "Health status of the cache store (1=healthy, 0=unhealthy)")
            .map_err(|e| metric_error("component_health_status", e))?;

        // Register all metrics
        let collectors: Vec<(&str, Box<dyn prometheus::core::Collector>)> = vec![
            ("connector_queries_total", Box::new(queries_total.clone())),
            ("connector_query_duration_seconds", Box::new(query_duration_seconds.clone())),
            ("connector_query_errors_total", Box::new(query_errors_total.clone())),
            ("connector_rows_returned", Box::new(rows_returned.clone())),
            ("cache_hits_total", Box::new(cache_hits_total.clone())),
            ("cache_misses_total", Box::new(cache_misses_total.clone())),
            ("cache_hit_ratio", Box::new(cache_hit_ratio.clone())),
            ("cache_read_failures", Box::new(cache_read_failures.clone())),
            ("cache_population_failures", Box::new(cache_population_failures.clone())),
            ("cache_corrupt_entries", Box::new(cache_corrupt_entries.clone())),
            ("upstream_requests_total", Box::new(upstream_requests_total.clone())),
            ("upstream_errors_total", Box::new(upstream_errors_total.clone())),
            ("upstream_duration_seconds", Box::new(upstream_duration_seconds.clone())),
            ("inflight_requests", Box::new(inflight_requests.clone())),
            ("http_requests_total", Box::new(http_requests_total.clone())),
            ("http_request_duration_seconds", Box::new(http_request_duration_seconds.clone())),
            ("health_check_duration_seconds", Box::new(health_check_duration_seconds.clone())),
            ("component_health_status", Box::new(component_health_status.clone())),
        ];
        for (name, collector) in collectors {
            registry
                .register(collector)
                .map_err(|e| ConnectorError::Internal(format!("Failed to register {}: {}", name, e)))?;
        }

        Ok(Self {
            queries_total,
            query_duration_seconds,
            query_errors_total,
            rows_returned,
            cache_hits_total,
            cache_misses_total,
            cache_hit_ratio,
            cache_read_failures,
            cache_population_failures,
            cache_corrupt_entries,
            upstream_requests_total,
            upstream_errors_total,
            upstream_duration_seconds,
            inflight_requests,
            http_requests_total,
            http_request_duration_seconds,
            health_check_duration_seconds,
            component_health_status,
        })
    }
}

/// Timer helper for measuring durations
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    pub fn observe(self) {
        let duration = self.start.elapsed();
        self.histogram.observe(duration.as_secs_f64());
    }
}

/// Counts one in-flight request for as long as it is alive.
///
/// The gauge is decremented on drop, so a request future that is cancelled
/// mid-flight is released as well.
pub struct InflightGuard {
    gauge: Gauge,
}

impl InflightGuard {
    pub fn new(gauge: Gauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new().unwrap();
        assert!(registry.gather().is_ok());
    }

    #[test]
    fn test_metrics_collection() {
        let registry = MetricsRegistry::new().unwrap();

        registry.record_query(CacheSource::Range, 0.02, 31);
        registry.record_cache_lookup("range", true);
        registry.record_cache_lookup("master", false);
        registry.record_upstream("timeline", 0.4, false);
        registry.metrics.inflight_requests.set(5.0);

        let output = registry.gather().unwrap();
        assert!(output.contains("connector_queries_total{source=\"range\"} 1"));
        assert!(output.contains("cache_hits_total{layer=\"range\"} 1"));
        assert!(output.contains("cache_misses_total{layer=\"master\"} 1"));
        assert!(output.contains("upstream_errors_total 1"));
        assert!(output.contains("inflight_requests 5"));
    }

    #[test]
    fn test_cache_stats_are_exported() {
        let registry = MetricsRegistry::new().unwrap();
        let stats = CacheStats {
            range_hits: 3,
            range_misses: 1,
            population_failures: 2,
            corrupt_entries: 1,
            ..Default::default()
        };
        registry.observe_cache_stats(&stats);

        let output = registry.gather().unwrap();
        assert!(output.contains("cache_hit_ratio{layer=\"range\"} 0.75"));
        assert!(output.contains("cache_population_failures 2"));
        assert!(output.contains("cache_corrupt_entries 1"));
    }

    #[test]
    fn test_timer_functionality() {
        let registry = MetricsRegistry::new().unwrap();
        let timer = Timer::new(registry.metrics.health_check_duration_seconds.clone());

        std::thread::sleep(std::time::Duration::from_millis(1));

        timer.observe();

        let output = registry.gather().unwrap();
        assert!(output.contains("health_check_duration_seconds_count 1"));
    }

    #[tokio::test]
    async fn test_inflight_guard_released_when_request_is_cancelled() {
        let registry = MetricsRegistry::new().unwrap();
        let gauge = registry.metrics.inflight_requests.clone();

        let guard = InflightGuard::new(gauge.clone());
        assert_eq!(gauge.get(), 1.0);
        drop(guard);
        assert_eq!(gauge.get(), 0.0);

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let handling = {
            let gauge = gauge.clone();
            tokio::spawn(async move {
                let _inflight = InflightGuard::new(gauge);
                let _ = started_tx.send(());
                std::future::pending::<()>().await;
            })
        };

        started_rx.await.unwrap();
        assert_eq!(gauge.get(), 1.0);

        handling.abort();
        assert!(handling.await.unwrap_err().is_cancelled());
        assert_eq!(gauge.get(), 0.0);
    }
}
