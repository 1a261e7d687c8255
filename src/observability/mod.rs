pub mod metrics;
pub mod tracing;
pub mod logging;
pub mod health;


pub use metrics::{InflightGuard, Metrics, MetricsRegistry, Timer};
pub use tracing::init_tracing;
pub use logging::LoggingService;
pub use health::{HealthService, HealthStatus, ComponentHealth, health_routes};
