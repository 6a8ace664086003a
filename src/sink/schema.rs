//! Canonical row schema shared by the CSV and Parquet encoders.
//!
//! Column order is fixed: downstream DuckDB queries rely on it.

use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;

/// Column names in output order
pub const COLUMNS: [&str; 6] = [
    "key",
    "type",
    "value",
    "ttl_seconds",
    "exported_at",
    "partition_id",
];

/// Build the Arrow schema for exported records.
pub fn record_schema() -> Schema {
    Schema::new(vec![
        Field::new(COLUMNS[0], DataType::Utf8, false),
        Field::new(COLUMNS[1], DataType::Utf8, false),
        Field::new(COLUMNS[2], DataType::Utf8, false),
        Field::new(COLUMNS[3], DataType::Int64, false),
        Field::new(COLUMNS[4], DataType::Utf8, false),
        Field::new(COLUMNS[5], DataType::Int32, false),
    ])
}

/// Get the schema wrapped in an Arc (for Arrow writer APIs).
pub fn record_schema_ref() -> Arc<Schema> {
    Arc::new(record_schema())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_matches_columns() {
        let schema = record_schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, COLUMNS);
    }

    #[test]
    fn test_schema_types() {
        let schema = record_schema();
        assert_eq!(schema.field(3).data_type(), &DataType::Int64);
        assert_eq!(schema.field(5).data_type(), &DataType::Int32);
        assert!(schema.fields().iter().all(|f| !f.is_nullable()));
    }
}
