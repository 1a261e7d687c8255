use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::config::WeatherApiConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::types::{DateRange, Units};
use crate::weather::types::{MultiLocationResponse, TimelineResponse};

/// Longest slice of an upstream error body kept in error messages
const MAX_ERROR_BODY: usize = 200;

/// Single-location timeline request
#[derive(Debug, Clone)]
pub struct TimelineRequest {
    pub location: String,
    pub range: DateRange,
    pub units: Units,
    /// Ask for the nested hourly breakdown of every day
    pub include_hours: bool,
    pub api_key: String,
}

/// Multi-location timeline request
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub locations: Vec<String>,
    pub range: DateRange,
    pub units: Units,
    pub include_hours: bool,
    pub api_key: String,
}

/// Upstream source of weather timelines
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch_timeline(&self, request: &TimelineRequest) -> ConnectorResult<TimelineResponse>;

    /// One response per requested location, in request order
    async fn fetch_batch(&self, request: &BatchRequest) -> ConnectorResult<Vec<TimelineResponse>>;
}

/// HTTP client for the timeline weather API
pub struct WeatherApiClient {
    client: Client,
    base_url: Url,
}

impl WeatherApiClient {
    pub fn new(config: &WeatherApiConfig) -> ConnectorResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("weather-bi-connector/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConnectorError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ConnectorError::ConfigError(format!("Invalid weather API base URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ConnectorError::ConfigError(format!(
                "Weather API base URL cannot carry a path: {}",
                config.base_url
            )));
        }

        Ok(Self { client, base_url })
    }

    /// `<base>/timeline/<location>/<start>/<end>?unitGroup=..&include=..&key=..&contentType=json`
    pub fn timeline_url(&self, request: &TimelineRequest) -> ConnectorResult<Url> {
        let mut url = self.base_url.clone();
        {
            let start = request.range.start.to_string();
            let end = request.range.end.to_string();
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ConnectorError::Internal("Base URL lost its path".to_string()))?;
            segments
                .pop_if_empty()
                .extend(["timeline", request.location.as_str(), start.as_str(), end.as_str()]);
        }
        url.query_pairs_mut()
            .append_pair("unitGroup", request.units.as_str())
            .append_pair("include", include_param(request.include_hours))
            .append_pair("key", &request.api_key)
            .append_pair("contentType", "json");
        Ok(url)
    }

    /// `<base>/timelinemulti?locations=a|b&datestart=..&dateend=..&...`
    pub fn batch_url(&self, request: &BatchRequest) -> ConnectorResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConnectorError::Internal("Base URL lost its path".to_string()))?
            .pop_if_empty()
            .push("timelinemulti");
        url.query_pairs_mut()
            .append_pair("locations", &request.locations.join("|"))
            .append_pair("datestart", &request.range.start.to_string())
            .append_pair("dateend", &request.range.end.to_string())
            .append_pair("unitGroup", request.units.as_str())
            .append_pair("include", include_param(request.include_hours))
            .append_pair("key", &request.api_key)
            .append_pair("contentType", "json");
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ConnectorResult<T> {
        let display_url = redacted(&url);
        let started = Instant::now();
        debug!("Fetching {}", display_url);

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!("Request to {} failed: {}", display_url, e.without_url());
            ConnectorError::Upstream {
                status: None,
                message: "weather API could not be reached".to_string(),
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ConnectorError::Upstream {
            status: Some(status.as_u16()),
            message: format!("failed to read response body: {}", e.without_url()),
        })?;

        if !status.is_success() {
            warn!("Upstream returned {} for {}", status, display_url);
            return Err(ConnectorError::Upstream {
                status: Some(status.as_u16()),
                message: error_message(status, &body),
            });
        }

        debug!(
            "Fetched {} ({} bytes) in {}ms",
            display_url,
            body.len(),
            started.elapsed().as_millis()
        );

        serde_json::from_str(&body)
            .map_err(|e| ConnectorError::ResponseParse(format!("Malformed weather API response: {}", e)))
    }
}

#[async_trait]
impl WeatherSource for WeatherApiClient {
    async fn fetch_timeline(&self, request: &TimelineRequest) -> ConnectorResult<TimelineResponse> {
        let url = self.timeline_url(request)?;
        self.get_json(url).await
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> ConnectorResult<Vec<TimelineResponse>> {
        let url = self.batch_url(request)?;
        let response: MultiLocationResponse = self.get_json(url).await?;
        if response.locations.len() != request.locations.len() {
            return Err(ConnectorError::ResponseParse(format!(
                "Expected {} locations in batch response, got {}",
                request.locations.len(),
                response.locations.len()
            )));
        }
        Ok(response.locations)
    }
}

fn include_param(include_hours: bool) -> &'static str {
    if include_hours {
        "days,hours"
    } else {
        "days"
    }
}

/// URL text with the API key replaced, safe for logs
pub fn redacted(url: &Url) -> String {
    let mut clean = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "key" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();
    clean.query_pairs_mut().clear().extend_pairs(pairs);
    clean.to_string()
}

fn error_message(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status.to_string();
    }
    let snippet: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
    format!("{}: {}", status, snippet)
}
