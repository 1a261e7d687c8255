use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the weather connector
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid configuration (API key, location, units)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Upstream weather API returned a non-2xx status or could not be reached
    #[error("Upstream error{}: {message}", status_suffix(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// Upstream weather API returned a body that could not be parsed
    #[error("Response parse error: {0}")]
    ResponseParse(String),

    /// Backing store connection or operation error
    #[error("Store error: {0}")]
    StoreError(String),

    /// A cached entry could not be reconstructed (missing chunk, bad stored JSON)
    #[error("Corrupt cache entry: {0}")]
    CacheCorrupt(String),

    /// A value could not be laid out in the store (manifest above the size ceiling)
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConnectorError {
    /// Check if error is a cache reconstruction failure
    pub fn is_cache_corruption(&self) -> bool {
        matches!(self, ConnectorError::CacheCorrupt(_))
    }

    /// Check if error came from the upstream weather API
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::Upstream { .. } | ConnectorError::ResponseParse(_)
        )
    }

    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            ConnectorError::InvalidRequest(_) => 400,
            ConnectorError::ConfigError(_) => 400,
            ConnectorError::Upstream { .. } => 502,
            ConnectorError::ResponseParse(_) => 502,
            ConnectorError::StoreError(_) => 500,
            ConnectorError::CacheCorrupt(_) => 500,
            ConnectorError::CacheError(_) => 500,
            ConnectorError::SerializationError(_) => 500,
            ConnectorError::Internal(_) => 500,
        }
    }

    /// Get error type as string for logging
    pub fn error_type(&self) -> &'static str {
        match self {
            ConnectorError::InvalidRequest(_) => "invalid_request",
            ConnectorError::ConfigError(_) => "config_error",
            ConnectorError::Upstream { .. } => "upstream_error",
            ConnectorError::ResponseParse(_) => "response_parse_error",
            ConnectorError::StoreError(_) => "store_error",
            ConnectorError::CacheCorrupt(_) => "cache_corrupt",
            ConnectorError::CacheError(_) => "cache_error",
            ConnectorError::SerializationError(_) => "serialization_error",
            ConnectorError::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to show to the end user of a report.
    ///
    /// Configuration and request errors carry their own text; everything else is
    /// collapsed to a generic message so upstream URLs and store details stay in logs.
    pub fn user_message(&self) -> String {
        match self {
            ConnectorError::InvalidRequest(msg) => msg.clone(),
            ConnectorError::ConfigError(msg) => msg.clone(),
            ConnectorError::Upstream { status: Some(401), .. }
            | ConnectorError::Upstream { status: Some(403), .. } => {
                "The weather API rejected the API key. Check the connector configuration.".to_string()
            }
            ConnectorError::Upstream { status: Some(429), .. } => {
                "The weather API rate limit was reached. Try again later.".to_string()
            }
            ConnectorError::Upstream { .. } | ConnectorError::ResponseParse(_) => {
                "The weather data service is currently unavailable.".to_string()
            }
            _ => "An internal error occurred while loading weather data.".to_string(),
        }
    }

    /// Build the user-facing report. The diagnostic id ties it to the detailed log entry.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            error: self.error_type().to_string(),
            message: self.user_message(),
            diagnostic_id: Uuid::new_v4(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Result type alias for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// User-facing error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: String,
    pub message: String,
    pub diagnostic_id: Uuid,
}

/// Validation error for query descriptors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid location: {0}")]
    InvalidLocation(String),
}

impl From<ValidationError> for ConnectorError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidLocation(_) => ConnectorError::ConfigError(err.to_string()),
            _ => ConnectorError::InvalidRequest(err.to_string()),
        }
    }
}
