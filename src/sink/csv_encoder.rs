//! CSV partition encoder
//!
//! Header row first, then one row per record in [`COLUMNS`] order. Quoting
//! follows RFC 4180 as implemented by the `csv` crate.

use crate::error::{SinkError, SinkResult};
use crate::sink::encoder::RecordEncoder;
use crate::sink::schema::COLUMNS;
use crate::sink::Record;
use std::fs::File;
use std::path::Path;

pub struct CsvEncoder {
    writer: Option<csv::Writer<File>>,
}

impl CsvEncoder {
    pub fn new() -> Self {
        Self { writer: None }
    }

    fn writer(&mut self) -> SinkResult<&mut csv::Writer<File>> {
        self.writer.as_mut().ok_or(SinkError::NotOpen)
    }
}

impl Default for CsvEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordEncoder for CsvEncoder {
    fn extension(&self) -> &'static str {
        "csv"
    }

    fn begin(&mut self, path: &Path) -> SinkResult<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(COLUMNS)?;
        self.writer = Some(writer);
        Ok(())
    }

    fn write(&mut self, record: &Record, partition_id: u32) -> SinkResult<()> {
        let ttl = record.ttl_seconds.to_string();
        let partition = partition_id.to_string();
        self.writer()?.write_record([
            record.key.as_str(),
            record.record_type.as_str(),
            record.value.as_str(),
            ttl.as_str(),
            record.exported_at.as_str(),
            partition.as_str(),
        ])?;
        Ok(())
    }

    fn flush(&mut self) -> SinkResult<()> {
        self.writer()?.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> SinkResult<u64> {
        let mut writer = self.writer.take().ok_or(SinkError::NotOpen)?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordType;
    use tempfile::tempdir;

    fn record(key: &str, value: &str) -> Record {
        Record {
            key: key.to_string(),
            record_type: RecordType::HashField,
            value: value.to_string(),
            ttl_seconds: -1,
            exported_at: "2024-01-15T14:30:00Z".to_string(),
        }
    }

    #[test]
    fn test_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.csv");

        let mut encoder = CsvEncoder::new();
        encoder.begin(&path).unwrap();
        encoder.write(&record("user:1:field:name", "Ann"), 1).unwrap();
        let size = encoder.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(size, content.len() as u64);

        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "key,type,value,ttl_seconds,exported_at,partition_id"
        );
        assert_eq!(
            lines.next().unwrap(),
            "user:1:field:name,hash_field,Ann,-1,2024-01-15T14:30:00Z,1"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_quoting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.csv");

        let mut encoder = CsvEncoder::new();
        encoder.begin(&path).unwrap();
        encoder
            .write(&record("k", "a,\"quoted\"\nvalue"), 3)
            .unwrap();
        encoder.finish().unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[2], "a,\"quoted\"\nvalue");
        assert_eq!(&row[5], "3");
    }

    #[test]
    fn test_write_without_begin() {
        let mut encoder = CsvEncoder::new();
        assert!(matches!(
            encoder.write(&record("k", "v"), 1),
            Err(SinkError::NotOpen)
        ));
        assert!(matches!(encoder.finish(), Err(SinkError::NotOpen)));
    }
}
