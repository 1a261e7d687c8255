//! Field schema declared to the reporting-tool host.

use serde::{Deserialize, Serialize};

/// Value type of a column as the host sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Text,
    Number,
    Date,
    DateTime,
}

/// One declared column
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldSpec {
    pub id: &'static str,
    pub label: &'static str,
    pub value_type: ValueType,
    /// Dimension columns identify a row; the rest are metrics
    pub dimension: bool,
}

const fn dimension(id: &'static str, label: &'static str, value_type: ValueType) -> FieldSpec {
    FieldSpec { id, label, value_type, dimension: true }
}

const fn metric(id: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec { id, label, value_type: ValueType::Number, dimension: false }
}

const fn text(id: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec { id, label, value_type: ValueType::Text, dimension: false }
}

/// Columns advertised by `GET /v1/schema`, in canonical order
pub const DECLARED_FIELDS: &[FieldSpec] = &[
    dimension("location", "Location", ValueType::Text),
    dimension("date", "Date", ValueType::Date),
    dimension("datetime", "Date & Time", ValueType::DateTime),
    metric("temp", "Temperature"),
    metric("temp_max", "Max Temperature"),
    metric("temp_min", "Min Temperature"),
    metric("feels_like", "Feels Like"),
    metric("dew", "Dew Point"),
    metric("humidity", "Humidity (%)"),
    metric("precip", "Precipitation"),
    metric("precip_prob", "Precipitation Probability (%)"),
    text("precip_type", "Precipitation Type"),
    metric("snow", "Snow"),
    metric("snow_depth", "Snow Depth"),
    metric("wind_gust", "Wind Gust"),
    metric("wind_speed", "Wind Speed"),
    metric("wind_dir", "Wind Direction"),
    metric("pressure", "Sea Level Pressure"),
    metric("cloud_cover", "Cloud Cover (%)"),
    metric("visibility", "Visibility"),
    metric("uv_index", "UV Index"),
    text("sunrise", "Sunrise"),
    text("sunset", "Sunset"),
    text("conditions", "Conditions"),
    text("description", "Description"),
    text("icon", "Icon"),
];

/// Every column the connector can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    Location,
    Date,
    DateTime,
    Temp,
    TempMax,
    TempMin,
    FeelsLike,
    Dew,
    Humidity,
    Precip,
    PrecipProb,
    PrecipType,
    Snow,
    SnowDepth,
    WindGust,
    WindSpeed,
    WindDir,
    Pressure,
    CloudCover,
    Visibility,
    UvIndex,
    Sunrise,
    Sunset,
    Conditions,
    Description,
    Icon,
}

impl FieldId {
    /// All fields in canonical (row) order
    pub const ALL: [FieldId; 26] = [
        FieldId::Location,
        FieldId::Date,
        FieldId::DateTime,
        FieldId::Temp,
        FieldId::TempMax,
        FieldId::TempMin,
        FieldId::FeelsLike,
        FieldId::Dew,
        FieldId::Humidity,
        FieldId::Precip,
        FieldId::PrecipProb,
        FieldId::PrecipType,
        FieldId::Snow,
        FieldId::SnowDepth,
        FieldId::WindGust,
        FieldId::WindSpeed,
        FieldId::WindDir,
        FieldId::Pressure,
        FieldId::CloudCover,
        FieldId::Visibility,
        FieldId::UvIndex,
        FieldId::Sunrise,
        FieldId::Sunset,
        FieldId::Conditions,
        FieldId::Description,
        FieldId::Icon,
    ];

    pub fn id(self) -> &'static str {
        match self {
            FieldId::Location => "location",
            FieldId::Date => "date",
            FieldId::DateTime => "datetime",
            FieldId::Temp => "temp",
            FieldId::TempMax => "temp_max",
            FieldId::TempMin => "temp_min",
            FieldId::FeelsLike => "feels_like",
            FieldId::Dew => "dew",
            FieldId::Humidity => "humidity",
            FieldId::Precip => "precip",
            FieldId::PrecipProb => "precip_prob",
            FieldId::PrecipType => "precip_type",
            FieldId::Snow => "snow",
            FieldId::SnowDepth => "snow_depth",
            FieldId::WindGust => "wind_gust",
            FieldId::WindSpeed => "wind_speed",
            FieldId::WindDir => "wind_dir",
            FieldId::Pressure => "pressure",
            FieldId::CloudCover => "cloud_cover",
            FieldId::Visibility => "visibility",
            FieldId::UvIndex => "uv_index",
            FieldId::Sunrise => "sunrise",
            FieldId::Sunset => "sunset",
            FieldId::Conditions => "conditions",
            FieldId::Description => "description",
            FieldId::Icon => "icon",
        }
    }

    pub fn from_id(id: &str) -> Option<FieldId> {
        FieldId::ALL.iter().copied().find(|field| field.id() == id)
    }

    pub fn value_type(self) -> ValueType {
        match self {
            FieldId::Location
            | FieldId::PrecipType
            | FieldId::Sunrise
            | FieldId::Sunset
            | FieldId::Conditions
            | FieldId::Description
            | FieldId::Icon => ValueType::Text,
            FieldId::Date => ValueType::Date,
            FieldId::DateTime => ValueType::DateTime,
            _ => ValueType::Number,
        }
    }

    /// Position of this field in a full-width row
    pub fn index(self) -> usize {
        self as usize
    }
}
