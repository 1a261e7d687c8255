/// Upstream weather API
///
/// Typed day/hour records and the HTTP client that fetches them.

pub mod client;
pub mod types;

pub use client::{BatchRequest, TimelineRequest, WeatherApiClient, WeatherSource};
pub use types::{HourRecord, MultiLocationResponse, TimelineResponse, WeatherRecord};
