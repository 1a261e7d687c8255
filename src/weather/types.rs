use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// One daily observation from the timeline API.
///
/// Every metric is optional; an absent or null value means "no data", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub datetime: NaiveDate,
    #[serde(rename = "datetimeEpoch")]
    pub datetime_epoch: Option<i64>,
    #[serde(rename = "tempmax")]
    pub temp_max: Option<f64>,
    #[serde(rename = "tempmin")]
    pub temp_min: Option<f64>,
    pub temp: Option<f64>,
    #[serde(rename = "feelslike")]
    pub feels_like: Option<f64>,
    pub dew: Option<f64>,
    pub humidity: Option<f64>,
    pub precip: Option<f64>,
    #[serde(rename = "precipprob")]
    pub precip_prob: Option<f64>,
    #[serde(rename = "preciptype")]
    pub precip_type: Option<Vec<String>>,
    pub snow: Option<f64>,
    #[serde(rename = "snowdepth")]
    pub snow_depth: Option<f64>,
    #[serde(rename = "windgust")]
    pub wind_gust: Option<f64>,
    #[serde(rename = "windspeed")]
    pub wind_speed: Option<f64>,
    #[serde(rename = "winddir")]
    pub wind_dir: Option<f64>,
    pub pressure: Option<f64>,
    #[serde(rename = "cloudcover")]
    pub cloud_cover: Option<f64>,
    pub visibility: Option<f64>,
    #[serde(rename = "uvindex")]
    pub uv_index: Option<f64>,
    pub sunrise: Option<String>,
    pub sunset: Option<String>,
    pub conditions: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hours: Vec<HourRecord>,
}

impl WeatherRecord {
    /// Record with only a date set
    pub fn empty(datetime: NaiveDate) -> Self {
        Self {
            datetime,
            datetime_epoch: None,
            temp_max: None,
            temp_min: None,
            temp: None,
            feels_like: None,
            dew: None,
            humidity: None,
            precip: None,
            precip_prob: None,
            precip_type: None,
            snow: None,
            snow_depth: None,
            wind_gust: None,
            wind_speed: None,
            wind_dir: None,
            pressure: None,
            cloud_cover: None,
            visibility: None,
            uv_index: None,
            sunrise: None,
            sunset: None,
            conditions: None,
            description: None,
            icon: None,
            hours: Vec::new(),
        }
    }
}

/// One hourly observation nested inside a day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourRecord {
    pub datetime: NaiveTime,
    #[serde(rename = "datetimeEpoch")]
    pub datetime_epoch: Option<i64>,
    pub temp: Option<f64>,
    #[serde(rename = "feelslike")]
    pub feels_like: Option<f64>,
    pub humidity: Option<f64>,
    pub dew: Option<f64>,
    pub precip: Option<f64>,
    #[serde(rename = "precipprob")]
    pub precip_prob: Option<f64>,
    pub snow: Option<f64>,
    #[serde(rename = "windgust")]
    pub wind_gust: Option<f64>,
    #[serde(rename = "windspeed")]
    pub wind_speed: Option<f64>,
    #[serde(rename = "winddir")]
    pub wind_dir: Option<f64>,
    pub pressure: Option<f64>,
    pub visibility: Option<f64>,
    #[serde(rename = "cloudcover")]
    pub cloud_cover: Option<f64>,
    #[serde(rename = "uvindex")]
    pub uv_index: Option<f64>,
    pub conditions: Option<String>,
    pub icon: Option<String>,
}

/// Single-location timeline response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineResponse {
    #[serde(rename = "resolvedAddress")]
    pub resolved_address: Option<String>,
    pub address: Option<String>,
    pub timezone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub days: Vec<WeatherRecord>,
}

impl TimelineResponse {
    /// Display name for the location, falling back to the requested text
    pub fn display_name(&self, requested: &str) -> String {
        self.resolved_address
            .clone()
            .or_else(|| self.address.clone())
            .unwrap_or_else(|| requested.to_string())
    }
}

/// Multi-location response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiLocationResponse {
    #[serde(default)]
    pub locations: Vec<TimelineResponse>,
}
