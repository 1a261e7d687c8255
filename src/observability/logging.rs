use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::env;
use std::sync::OnceLock;
use tracing::{event, Level};
use uuid::Uuid;
use crate::error::ConnectorError;
use crate::types::{CacheSource, DateRange, Granularity};

static URL_KEY_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static API_KEY_FIELD_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// `key=` query parameters in upstream URLs
fn url_key_pattern() -> Option<&'static Regex> {
    URL_KEY_PATTERN
        .get_or_init(|| Regex::new(r"(?i)([?&]key=)[^&\s]+").ok())
        .as_ref()
}

/// `api_key` fields in JSON and `Debug` output
fn api_key_field_pattern() -> Option<&'static Regex> {
    API_KEY_FIELD_PATTERN
        .get_or_init(|| Regex::new(r#"(?i)("?api_key"?\s*[:=]\s*"?)(Some\(")?[^",\s)}]+"#).ok())
        .as_ref()
}

/// Structured JSON logging service with trace_id injection
#[derive(Clone)]
pub struct LoggingService {
    service_name: String,
    service_version: String,
    environment: String,
}

impl Default for LoggingService {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingService {
    /// Create a new logging service
    pub fn new() -> Self {
        let service_name = env::var("SERVICE_NAME")
            .unwrap_or_else(|_| "weather-bi-connector".to_string());

        let service_version = env::var("SERVICE_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string());

        Self {
            service_name,
            service_version,
            environment,
        }
    }

    /// Log a structured message with trace_id
    pub fn log_structured(&self, level: Level, message: &str, fields: Option<HashMap<String, Value>>) {
        self.log_with_trace(level, Uuid::new_v4(), message, fields)
    }

    fn log_with_trace(&self, level: Level, trace_id: Uuid, message: &str, fields: Option<HashMap<String, Value>>) {
        let mut log_entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": level.to_string().to_uppercase(),
            "message": message,
            "trace_id": trace_id.to_string(),
            "service": {
                "name": self.service_name,
                "version": self.service_version,
                "environment": self.environment
            }
        });

        if let Some(fields) = fields {
            if let Value::Object(ref mut map) = log_entry {
                for (key, value) in fields {
                    map.insert(key, value);
                }
            }
        }

        match level {
            Level::ERROR => event!(Level::ERROR, %trace_id, "{}", log_entry),
            Level::WARN => event!(Level::WARN, %trace_id, "{}", log_entry),
            Level::INFO => event!(Level::INFO, %trace_id, "{}", log_entry),
            Level::DEBUG => event!(Level::DEBUG, %trace_id, "{}", log_entry),
            Level::TRACE => event!(Level::TRACE, %trace_id, "{}", log_entry),
        }
    }

    /// Log an incoming data query
    pub fn log_query_received(
        &self,
        trace_id: Uuid,
        locations: &[String],
        range: &DateRange,
        granularity: Granularity,
        field_count: usize,
    ) {
        let fields = HashMap::from([
            ("locations".to_string(), json!(locations.iter().map(|l| self.sanitize_location(l)).collect::<Vec<_>>())),
            ("range_start".to_string(), json!(range.start.to_string())),
            ("range_end".to_string(), json!(range.end.to_string())),
            ("range_days".to_string(), json!(range.num_days())),
            ("granularity".to_string(), json!(granularity.as_str())),
            ("field_count".to_string(), json!(field_count)),
        ]);

        self.log_with_trace(Level::INFO, trace_id, "Data query received", Some(fields));
    }

    /// Log a completed data query
    pub fn log_query_completed(&self, trace_id: Uuid, duration_ms: f64, row_count: usize, source: CacheSource) {
        let fields = HashMap::from([
            ("duration_ms".to_string(), json!(duration_ms)),
            ("row_count".to_string(), json!(row_count)),
            ("cache".to_string(), json!(source)),
        ]);

        self.log_with_trace(Level::INFO, trace_id, "Data query completed", Some(fields));
    }

    /// Log error with context
    pub fn log_error(&self, error: &ConnectorError, context: Option<HashMap<String, Value>>) {
        let mut fields = HashMap::from([
            ("error_type".to_string(), json!(error.error_type())),
            ("error_message".to_string(), json!(self.sanitize_message(&error.to_string()))),
        ]);

        if let Some(context) = context {
            fields.extend(context);
        }

        self.log_structured(Level::ERROR, "Error occurred", Some(fields));
    }

    /// Log the operator-side details of an error reported to a client under `diagnostic_id`
    pub fn log_diagnostic(&self, diagnostic_id: Uuid, error: &ConnectorError) {
        let fields = HashMap::from([
            ("diagnostic_id".to_string(), json!(diagnostic_id.to_string())),
            ("error_type".to_string(), json!(error.error_type())),
            ("status_code".to_string(), json!(error.status_code())),
            ("detail".to_string(), json!(self.sanitize_message(&format!("{:?}", error)))),
        ]);

        let level = if error.status_code() >= 500 { Level::ERROR } else { Level::WARN };
        self.log_with_trace(level, diagnostic_id, "Query failed", Some(fields));
    }

    /// Log cache operation
    pub fn log_cache_operation(
        &self,
        operation: &str,
        layer: &str,
        key: &str,
        hit: bool,
        duration_ms: Option<f64>,
    ) {
        let sanitized_key = self.sanitize_cache_key(key);

        let mut fields = HashMap::from([
            ("operation".to_string(), json!(operation)),
            ("layer".to_string(), json!(layer)),
            ("sanitized_key".to_string(), json!(sanitized_key)),
            ("hit".to_string(), json!(hit)),
        ]);

        if let Some(duration) = duration_ms {
            fields.insert("duration_ms".to_string(), json!(duration));
        }

        self.log_structured(Level::DEBUG, "Cache operation", Some(fields));
    }

    /// Log an upstream weather API fetch
    pub fn log_upstream_fetch(&self, kind: &str, location_count: usize, duration_ms: f64, success: bool) {
        let fields = HashMap::from([
            ("kind".to_string(), json!(kind)),
            ("location_count".to_string(), json!(location_count)),
            ("duration_ms".to_string(), json!(duration_ms)),
            ("success".to_string(), json!(success)),
        ]);

        let level = if success { Level::DEBUG } else { Level::WARN };
        let message = if success {
            "Upstream fetch completed"
        } else {
            "Upstream fetch failed"
        };

        self.log_structured(level, message, Some(fields));
    }

    /// Log a cache purge
    pub fn log_cache_purge(&self, prefix: Option<&str>, removed: usize) {
        let fields = HashMap::from([
            ("prefix".to_string(), json!(prefix.unwrap_or("<all>"))),
            ("removed".to_string(), json!(removed)),
            ("audit_timestamp".to_string(), json!(chrono::Utc::now().to_rfc3339())),
        ]);

        self.log_structured(Level::INFO, "Cache purged", Some(fields));
    }

    /// Redact API keys from free text (URL parameters and JSON fields)
    pub fn sanitize_message(&self, message: &str) -> String {
        let mut sanitized = message.to_string();

        if let Some(re) = url_key_pattern() {
            sanitized = re.replace_all(&sanitized, "${1}[REDACTED]").to_string();
        }

        if let Some(re) = api_key_field_pattern() {
            sanitized = re.replace_all(&sanitized, "${1}${2}[REDACTED]").to_string();
        }

        sanitized
    }

    /// Truncate long location text for logging
    fn sanitize_location(&self, location: &str) -> String {
        let trimmed = location.trim();
        if trimmed.chars().count() > 100 {
            let mut short: String = trimmed.chars().take(97).collect();
            short.push_str("...");
            short
        } else {
            trimmed.to_string()
        }
    }

    /// Sanitize cache key for logging
    fn sanitize_cache_key(&self, key: &str) -> String {
        if key.len() > 50 && key.is_ascii() {
            format!("{}...{}", &key[..20], &key[key.len() - 10..])
        } else {
            key.to_string()
        }
    }
}
