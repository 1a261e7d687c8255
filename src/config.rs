use std::env;
use std::str::FromStr;
use crate::error::{ConnectorError, ConnectorResult};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Cache layering configuration
    pub cache: CacheConfig,
    /// Redis configuration, required when the Redis backend is selected
    pub redis: Option<RedisConfig>,
    /// Upstream weather API configuration
    pub weather: WeatherApiConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
}

/// Backing store selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(ConnectorError::ConfigError(format!(
                "Invalid CACHE_BACKEND '{}': expected redis or memory",
                other
            ))),
        }
    }
}

/// Cache layering configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Which backing store to use
    pub backend: CacheBackend,
    /// Per-entry size ceiling of the backing store in bytes
    pub max_value_bytes: usize,
    /// Chunk size used when a value exceeds the ceiling; must be below the ceiling
    pub chunk_bytes: usize,
    /// Longest TTL the backing store accepts
    pub max_ttl_secs: u64,
    /// TTL of month buckets
    pub monthly_ttl_secs: u64,
    /// TTL of batch results
    pub batch_ttl_secs: u64,
    /// TTL of master dataset snapshots
    pub master_ttl_secs: u64,
    /// Whether whole-report snapshots are cached
    pub master_enabled: bool,
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Maximum Redis connections
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// Prefix applied to every key this service writes
    pub key_prefix: String,
}

/// Upstream weather API configuration
#[derive(Debug, Clone)]
pub struct WeatherApiConfig {
    /// Base URL of the timeline services
    pub base_url: String,
    /// Server-wide API key used when a query does not carry one
    pub api_key: Option<String>,
    /// HTTP timeout in seconds
    pub request_timeout_secs: u64,
    /// Longest date range a single query may request
    pub max_range_days: i64,
}

fn parse_env<T>(name: &str, default: &str) -> ConnectorResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| ConnectorError::ConfigError(format!("Invalid {}: {}", name, e)))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> ConnectorResult<Self> {
        // Load .env file if it exists
        if let Err(e) = dotenvy::dotenv() {
            tracing::warn!("Could not load .env file: {}", e);
        }

        let backend: CacheBackend = parse_env("CACHE_BACKEND", "redis")?;

        let redis = match env::var("REDIS_URL") {
            Ok(url) => Some(RedisConfig {
                url,
                max_connections: parse_env("REDIS_MAX_CONNECTIONS", "10")?,
                connection_timeout_secs: parse_env("REDIS_CONNECTION_TIMEOUT_SECS", "5")?,
                key_prefix: env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| "wx:".to_string()),
            }),
            Err(_) if backend == CacheBackend::Redis => {
                return Err(ConnectorError::ConfigError(
                    "REDIS_URL is required when CACHE_BACKEND=redis".to_string(),
                ));
            }
            Err(_) => None,
        };

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("SERVER_PORT", "8080")?,
                request_timeout_ms: parse_env("REQUEST_TIMEOUT_MS", "30000")?,
                max_request_size: parse_env("MAX_REQUEST_SIZE", "65536")?, // 64KB
            },
            cache: CacheConfig {
                backend,
                max_value_bytes: parse_env("CACHE_MAX_VALUE_BYTES", "102400")?, // 100KB
                chunk_bytes: parse_env("CACHE_CHUNK_BYTES", "92160")?,           // 90KB
                max_ttl_secs: parse_env("CACHE_MAX_TTL_SECS", "21600")?,         // 6 hours
                monthly_ttl_secs: parse_env("CACHE_MONTHLY_TTL_SECS", "21600")?,
                batch_ttl_secs: parse_env("CACHE_BATCH_TTL_SECS", "3600")?,
                master_ttl_secs: parse_env("CACHE_MASTER_TTL_SECS", "1800")?,
                master_enabled: parse_env("CACHE_MASTER_ENABLED", "true")?,
            },
            redis,
            weather: WeatherApiConfig {
                base_url: env::var("WEATHER_API_BASE_URL").unwrap_or_else(|_| {
                    "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services"
                        .to_string()
                }),
                api_key: env::var("WEATHER_API_KEY").ok().filter(|k| !k.trim().is_empty()),
                request_timeout_secs: parse_env("WEATHER_API_TIMEOUT_SECS", "30")?,
                max_range_days: parse_env("MAX_RANGE_DAYS", "1100")?,
            },
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.server.port == 0 {
            return Err(ConnectorError::ConfigError("Server port cannot be 0".to_string()));
        }

        if self.server.request_timeout_ms == 0 {
            return Err(ConnectorError::ConfigError("Request timeout must be greater than 0".to_string()));
        }

        if self.cache.chunk_bytes < 64 {
            return Err(ConnectorError::ConfigError("CACHE_CHUNK_BYTES must be at least 64".to_string()));
        }

        if self.cache.chunk_bytes >= self.cache.max_value_bytes {
            return Err(ConnectorError::ConfigError(
                "CACHE_CHUNK_BYTES must be smaller than CACHE_MAX_VALUE_BYTES".to_string(),
            ));
        }

        if self.cache.max_ttl_secs == 0 {
            return Err(ConnectorError::ConfigError("CACHE_MAX_TTL_SECS must be greater than 0".to_string()));
        }

        match (&self.cache.backend, &self.redis) {
            (CacheBackend::Redis, None) => {
                return Err(ConnectorError::ConfigError(
                    "REDIS_URL is required when CACHE_BACKEND=redis".to_string(),
                ));
            }
            (_, Some(redis)) => {
                if !redis.url.starts_with("redis://") && !redis.url.starts_with("rediss://") {
                    return Err(ConnectorError::ConfigError(
                        "REDIS_URL must start with redis:// or rediss://".to_string(),
                    ));
                }
            }
            _ => {}
        }

        if !self.weather.base_url.starts_with("https://") && !self.weather.base_url.starts_with("http://") {
            return Err(ConnectorError::ConfigError(
                "WEATHER_API_BASE_URL must be an http(s) URL".to_string(),
            ));
        }

        if self.weather.max_range_days <= 0 {
            return Err(ConnectorError::ConfigError("MAX_RANGE_DAYS must be greater than 0".to_string()));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                request_timeout_ms: 30000,
                max_request_size: 65536, // 64KB
            },
            cache: CacheConfig {
                backend: CacheBackend::Memory,
                max_value_bytes: 102400,
                chunk_bytes: 92160,
                max_ttl_secs: 21600,
                monthly_ttl_secs: 21600,
                batch_ttl_secs: 3600,
                master_ttl_secs: 1800,
                master_enabled: true,
            },
            redis: None,
            weather: WeatherApiConfig {
                base_url: "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services"
                    .to_string(),
                api_key: None,
                request_timeout_secs: 30,
                max_range_days: 1100,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.backend, CacheBackend::Memory);
    }

    #[test]
    fn test_chunk_size_must_leave_headroom() {
        let mut config = Config::default();
        config.cache.chunk_bytes = config.cache.max_value_bytes;
        assert!(config.validate().is_err());

        config.cache.chunk_bytes = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let mut config = Config::default();
        config.cache.backend = CacheBackend::Redis;
        assert!(config.validate().is_err());

        config.redis = Some(RedisConfig {
            url: "http://localhost:6379".to_string(),
            max_connections: 5,
            connection_timeout_secs: 5,
            key_prefix: "wx:".to_string(),
        });
        assert!(config.validate().is_err());

        if let Some(redis) = config.redis.as_mut() {
            redis.url = "rediss://secure-redis:6380".to_string();
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_backend_parsing() {
        assert_eq!("Memory".parse::<CacheBackend>().unwrap(), CacheBackend::Memory);
        assert_eq!(" redis ".parse::<CacheBackend>().unwrap(), CacheBackend::Redis);
        assert!("memcached".parse::<CacheBackend>().is_err());
    }

    #[test]
    fn test_server_config_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.max_ttl_secs, 21600);
    }
}
