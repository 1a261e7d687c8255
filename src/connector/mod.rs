/// Reporting-tool connector
///
/// Maps the weather API onto a tabular query interface:
/// - Declared field schema and the `FieldId` enumeration
/// - Explicit field-to-extractor mapping, validated at construction
/// - Query resolution through the master, range and batch cache layers

pub mod fields;
pub mod schema;
pub mod service;

#[cfg(test)]
mod tests;

pub use fields::{build_rows, project, resolve_fields, validate_schema, RecordView};
pub use schema::{FieldId, FieldSpec, ValueType, DECLARED_FIELDS};
pub use service::{ConnectorSettings, WeatherConnector};
