use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Unit system requested from the upstream API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Us,
    Uk,
    Base,
}

impl Units {
    /// Value of the upstream `unitGroup` parameter, also used in cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Us => "us",
            Units::Uk => "uk",
            Units::Base => "base",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row granularity of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Daily,
    Hourly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Hourly => "hourly",
        }
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidRange(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether `date` lies within the range, both ends inclusive
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of calendar days covered, both ends inclusive
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Calendar months touched by the range, in ascending order.
    ///
    /// Steps first-of-month to first-of-month from the start's month to the end's month.
    pub fn months(&self) -> Vec<YearMonth> {
        let last = YearMonth::from_date(self.end);
        let mut current = YearMonth::from_date(self.start);
        let mut months = Vec::new();
        while current <= last {
            months.push(current);
            current = current.next();
        }
        months
    }

    /// The range widened to whole calendar months
    pub fn whole_months(&self) -> Self {
        let start = YearMonth::from_date(self.start).first_day().unwrap_or(self.start);
        let end = YearMonth::from_date(self.end).last_day().unwrap_or(self.end);
        Self { start, end }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A calendar month, rendered as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        self.next().first_day().and_then(|first| first.pred_opt())
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Query descriptor received from the reporting-tool host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Requested field identifiers, in output column order
    pub fields: Vec<String>,
    /// Requested calendar date range
    pub date_range: DateRange,
    /// Free-form connector configuration
    pub config: QueryConfig,
}

/// Per-report connector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    /// API key for the weather service; falls back to the server default
    pub api_key: Option<String>,
    /// Single target location
    pub location: Option<String>,
    /// Location set for batch queries
    pub locations: Option<Vec<String>>,
    #[serde(default)]
    pub units: Units,
    #[serde(default)]
    pub granularity: Granularity,
}

/// Query target resolved from the configuration
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    Single(String),
    Batch(Vec<String>),
}

impl QueryTarget {
    /// All locations of the target, in order
    pub fn locations(&self) -> Vec<String> {
        match self {
            QueryTarget::Single(location) => vec![location.clone()],
            QueryTarget::Batch(locations) => locations.clone(),
        }
    }
}

/// Scalar cell value of an output row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    Number(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// No data reported upstream
    Null,
}

impl From<Option<f64>> for Scalar {
    fn from(value: Option<f64>) -> Self {
        value.map(Scalar::Number).unwrap_or(Scalar::Null)
    }
}

impl From<Option<&String>> for Scalar {
    fn from(value: Option<&String>) -> Self {
        value.map(|s| Scalar::Text(s.clone())).unwrap_or(Scalar::Null)
    }
}

/// One output row, values aligned to a column list
pub type Row = Vec<Scalar>;

/// Which layer answered a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Master,
    Range,
    Batch,
    Upstream,
}

/// Rows returned to the reporting-tool host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataResponse {
    /// Column identifiers, matching the requested fields
    pub fields: Vec<String>,
    pub rows: Vec<Row>,
    /// Resolved display name of the location (single-location queries)
    pub location: Option<String>,
    pub cache: CacheSource,
}
