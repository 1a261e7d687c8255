pub mod server;
pub mod cache;
pub mod connector;
pub mod weather;
pub mod observability;
pub mod error;
pub mod types;
pub mod config;

pub use error::{ConnectorError, ConnectorResult, ErrorReport};
pub use types::*;
pub use server::{build_router, ConnectorServer};
pub use config::Config;
pub use cache::{CacheManager, CacheStats, CacheStore, ChunkedCodec, MemoryStore, MonthlyRangeCache, RedisStore, ResultCache};
pub use connector::{FieldId, FieldSpec, WeatherConnector};
pub use weather::{WeatherApiClient, WeatherSource};
