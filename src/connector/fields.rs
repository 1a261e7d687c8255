//! Mapping from [`FieldId`] to extraction functions over weather records.

use std::collections::HashSet;

use crate::connector::schema::{FieldId, FieldSpec};
use crate::error::{ConnectorError, ConnectorResult, ValidationError};
use crate::types::{Granularity, Row, Scalar};
use crate::weather::{HourRecord, WeatherRecord};

/// A day, or one hour within it, of one location
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    pub location: &'a str,
    pub day: &'a WeatherRecord,
    pub hour: Option<&'a HourRecord>,
}

pub type Extractor = fn(&RecordView<'_>) -> Scalar;

/// Metric present on both days and hours: hourly rows read the hour
fn metric(
    view: &RecordView<'_>,
    day: fn(&WeatherRecord) -> Option<f64>,
    hour: fn(&HourRecord) -> Option<f64>,
) -> Scalar {
    match view.hour {
        Some(h) => hour(h).into(),
        None => day(view.day).into(),
    }
}

fn text(view: &RecordView<'_>, day: fn(&WeatherRecord) -> Option<&String>, hour: fn(&HourRecord) -> Option<&String>) -> Scalar {
    match view.hour {
        Some(h) => hour(h).into(),
        None => day(view.day).into(),
    }
}

impl FieldId {
    pub fn extractor(self) -> Extractor {
        match self {
            FieldId::Location => |v| Scalar::Text(v.location.to_string()),
            FieldId::Date => |v| Scalar::Date(v.day.datetime),
            FieldId::DateTime => |v| match v.hour {
                Some(h) => Scalar::DateTime(v.day.datetime.and_time(h.datetime)),
                None => v.day.datetime.and_hms_opt(0, 0, 0).map(Scalar::DateTime).unwrap_or(Scalar::Null),
            },
            FieldId::Temp => |v| metric(v, |d| d.temp, |h| h.temp),
            FieldId::TempMax => |v| v.day.temp_max.into(),
            FieldId::TempMin => |v| v.day.temp_min.into(),
            FieldId::FeelsLike => |v| metric(v, |d| d.feels_like, |h| h.feels_like),
            FieldId::Dew => |v| metric(v, |d| d.dew, |h| h.dew),
            FieldId::Humidity => |v| metric(v, |d| d.humidity, |h| h.humidity),
            FieldId::Precip => |v| metric(v, |d| d.precip, |h| h.precip),
            FieldId::PrecipProb => |v| metric(v, |d| d.precip_prob, |h| h.precip_prob),
            FieldId::PrecipType => |v| match &v.day.precip_type {
                Some(types) if !types.is_empty() => Scalar::Text(types.join(", ")),
                _ => Scalar::Null,
            },
            FieldId::Snow => |v| metric(v, |d| d.snow, |h| h.snow),
            FieldId::SnowDepth => |v| v.day.snow_depth.into(),
            FieldId::WindGust => |v| metric(v, |d| d.wind_gust, |h| h.wind_gust),
            FieldId::WindSpeed => |v| metric(v, |d| d.wind_speed, |h| h.wind_speed),
            FieldId::WindDir => |v| metric(v, |d| d.wind_dir, |h| h.wind_dir),
            FieldId::Pressure => |v| metric(v, |d| d.pressure, |h| h.pressure),
            FieldId::CloudCover => |v| metric(v, |d| d.cloud_cover, |h| h.cloud_cover),
            FieldId::Visibility => |v| metric(v, |d| d.visibility, |h| h.visibility),
            FieldId::UvIndex => |v| metric(v, |d| d.uv_index, |h| h.uv_index),
            FieldId::Sunrise => |v| v.day.sunrise.as_ref().into(),
            FieldId::Sunset => |v| v.day.sunset.as_ref().into(),
            FieldId::Conditions => |v| text(v, |d| d.conditions.as_ref(), |h| h.conditions.as_ref()),
            FieldId::Description => |v| v.day.description.as_ref().into(),
            FieldId::Icon => |v| text(v, |d| d.icon.as_ref(), |h| h.icon.as_ref()),
        }
    }
}

/// Check a declared schema against the field enumeration.
///
/// Every declared id must resolve to a field of the same value type, and every field
/// must be declared exactly once.
pub fn validate_schema(declared: &[FieldSpec]) -> ConnectorResult<()> {
    let mut seen = HashSet::new();

    for spec in declared {
        let field = FieldId::from_id(spec.id).ok_or_else(|| {
            ConnectorError::Internal(format!("Declared field '{}' has no extractor", spec.id))
        })?;
        if field.value_type() != spec.value_type {
            return Err(ConnectorError::Internal(format!(
                "Declared field '{}' is {:?} but extracts {:?}",
                spec.id,
                spec.value_type,
                field.value_type()
            )));
        }
        if !seen.insert(field) {
            return Err(ConnectorError::Internal(format!("Field '{}' is declared twice", spec.id)));
        }
    }

    if let Some(missing) = FieldId::ALL.iter().find(|field| !seen.contains(*field)) {
        return Err(ConnectorError::Internal(format!(
            "Field '{}' is not declared in the schema",
            missing.id()
        )));
    }

    Ok(())
}

/// Resolve requested field ids, preserving their order
pub fn resolve_fields(requested: &[String]) -> ConnectorResult<Vec<FieldId>> {
    if requested.is_empty() {
        return Err(ConnectorError::InvalidRequest("At least one field must be requested".to_string()));
    }
    requested
        .iter()
        .map(|id| {
            FieldId::from_id(id.trim())
                .ok_or_else(|| ConnectorError::from(ValidationError::UnknownField(id.clone())))
        })
        .collect()
}

/// Extract a full-width row (every field, canonical order) from one view
pub fn full_row(view: &RecordView<'_>) -> Row {
    FieldId::ALL.iter().map(|field| (field.extractor())(view)).collect()
}

/// Build full-width rows for one location's days.
///
/// Daily rows come one per day; hourly rows one per hour, and a day without an hourly
/// breakdown produces none.
pub fn build_rows(location: &str, days: &[WeatherRecord], granularity: Granularity) -> Vec<Row> {
    let mut rows = Vec::new();
    for day in days {
        match granularity {
            Granularity::Daily => rows.push(full_row(&RecordView { location, day, hour: None })),
            Granularity::Hourly => {
                for hour in &day.hours {
                    rows.push(full_row(&RecordView { location, day, hour: Some(hour) }));
                }
            }
        }
    }
    rows
}

/// Select `fields` out of full-width rows
pub fn project(rows: &[Row], fields: &[FieldId]) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            fields
                .iter()
                .map(|field| row.get(field.index()).cloned().unwrap_or(Scalar::Null))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::schema::{ValueType, DECLARED_FIELDS};
    use chrono::{NaiveDate, NaiveTime};

    fn sample_day() -> WeatherRecord {
        let mut day = WeatherRecord::empty(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        day.temp = Some(4.5);
        day.temp_max = Some(7.0);
        day.temp_min = Some(1.0);
        day.precip = Some(0.0);
        day.sunrise = Some("08:10:02".to_string());
        day.precip_type = Some(vec!["rain".to_string(), "snow".to_string()]);
        day.conditions = Some("Overcast".to_string());
        day.hours = vec![
            HourRecord {
                datetime: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                datetime_epoch: None,
                temp: Some(2.0),
                feels_like: None,
                humidity: Some(90.0),
                dew: None,
                precip: None,
                precip_prob: None,
                snow: None,
                wind_gust: None,
                wind_speed: Some(11.0),
                wind_dir: None,
                pressure: None,
                visibility: None,
                cloud_cover: None,
                uv_index: None,
                conditions: Some("Clear".to_string()),
                icon: None,
            },
        ];
        day
    }

    #[test]
    fn test_declared_schema_is_valid() {
        assert!(validate_schema(DECLARED_FIELDS).is_ok());
    }

    #[test]
    fn test_schema_validation_catches_mismatches() {
        let mut schema = DECLARED_FIELDS.to_vec();
        schema.pop();
        assert!(validate_schema(&schema).is_err());

        let mut schema = DECLARED_FIELDS.to_vec();
        schema[3].value_type = ValueType::Text;
        assert!(validate_schema(&schema).is_err());

        let mut schema = DECLARED_FIELDS.to_vec();
        schema.push(DECLARED_FIELDS[0]);
        assert!(validate_schema(&schema).is_err());
    }

    #[test]
    fn test_daily_extraction_keeps_nulls_and_zeroes_apart() {
        let day = sample_day();
        let view = RecordView { location: "Berlin", day: &day, hour: None };

        assert_eq!((FieldId::Temp.extractor())(&view), Scalar::Number(4.5));
        assert_eq!((FieldId::Precip.extractor())(&view), Scalar::Number(0.0));
        assert_eq!((FieldId::Snow.extractor())(&view), Scalar::Null);
        assert_eq!((FieldId::PrecipType.extractor())(&view), Scalar::Text("rain, snow".to_string()));
        assert_eq!(
            (FieldId::DateTime.extractor())(&view),
            Scalar::DateTime(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_hourly_extraction_mixes_hour_and_day() {
        let day = sample_day();
        let view = RecordView { location: "Berlin", day: &day, hour: Some(&day.hours[0]) };

        assert_eq!((FieldId::Temp.extractor())(&view), Scalar::Number(2.0));
        assert_eq!((FieldId::Precip.extractor())(&view), Scalar::Null);
        assert_eq!((FieldId::TempMax.extractor())(&view), Scalar::Number(7.0));
        assert_eq!((FieldId::Sunrise.extractor())(&view), Scalar::Text("08:10:02".to_string()));
        assert_eq!((FieldId::Conditions.extractor())(&view), Scalar::Text("Clear".to_string()));
    }

    #[test]
    fn test_build_and_project_rows() {
        let days = vec![sample_day(), WeatherRecord::empty(NaiveDate::from_ymd_opt(2024, 1, 16).unwrap())];

        let daily = build_rows("Berlin", &days, Granularity::Daily);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].len(), FieldId::ALL.len());

        let hourly = build_rows("Berlin", &days, Granularity::Hourly);
        assert_eq!(hourly.len(), 1);

        let projected = project(&daily, &[FieldId::Temp, FieldId::Location]);
        assert_eq!(projected[0], vec![Scalar::Number(4.5), Scalar::Text("Berlin".to_string())]);
        assert_eq!(projected[1], vec![Scalar::Null, Scalar::Text("Berlin".to_string())]);
    }

    #[test]
    fn test_resolve_fields() {
        let fields = resolve_fields(&["date".to_string(), "temp".to_string()]).unwrap();
        assert_eq!(fields, vec![FieldId::Date, FieldId::Temp]);

        let err = resolve_fields(&["date".to_string(), "bogus".to_string()]).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(resolve_fields(&[]).is_err());
    }
}
