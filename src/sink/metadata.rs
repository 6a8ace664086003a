//! Run metadata and Hive-style partition layout
//!
//! Every run produces one `export_metadata.json` in the output root listing
//! the partitions it closed. Partition files live under
//! `year=YYYY/month=MM/day=DD/hour=HH/` so DuckDB can prune by time.

use crate::error::SinkResult;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Fixed name of the run metadata file in the output root
pub const METADATA_FILE_NAME: &str = "export_metadata.json";

/// Accounting record for one closed partition file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub partition_id: u32,
    pub file_name: String,
    pub record_count: u64,
    pub file_size_bytes: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// One document per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub export_id: String,
    pub pattern: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_keys: u64,
    pub partitions: Vec<PartitionInfo>,
}

impl RunMetadata {
    /// Start a run; `end_time` is provisional until [`finalize`](Self::finalize)
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            export_id: format!("export_{}", started_at.timestamp()),
            pattern: String::new(),
            start_time: started_at,
            end_time: started_at,
            total_keys: 0,
            partitions: Vec::new(),
        }
    }

    /// Sum of record counts over all closed partitions
    pub fn total_records(&self) -> u64 {
        self.partitions.iter().map(|p| p.record_count).sum()
    }

    /// Sum of partition file sizes
    pub fn total_bytes(&self) -> u64 {
        self.partitions.iter().map(|p| p.file_size_bytes).sum()
    }

    /// Stamp the end time and write the document into `output_dir`
    pub fn finalize(&mut self, output_dir: &Path, ended_at: DateTime<Utc>) -> SinkResult<PathBuf> {
        self.end_time = ended_at;

        let path = output_dir.join(METADATA_FILE_NAME);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        Ok(path)
    }

    /// Read a metadata document back
    pub fn load(path: &Path) -> SinkResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Time-bucketed partition directory for `timestamp`
pub fn partition_dir(output_dir: &Path, timestamp: DateTime<Utc>) -> PathBuf {
    output_dir
        .join(format!("year={:04}", timestamp.year()))
        .join(format!("month={:02}", timestamp.month()))
        .join(format!("day={:02}", timestamp.day()))
        .join(format!("hour={:02}", timestamp.hour()))
}

/// `<table>_part_NNNN.<ext>`
pub fn partition_file_name(table: &str, partition_id: u32, extension: &str) -> String {
    format!("{}_part_{:04}.{}", table, partition_id, extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_partition_dir() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        let dir = partition_dir(Path::new("/tmp/test"), ts);
        assert_eq!(
            dir,
            PathBuf::from("/tmp/test/year=2024/month=01/day=15/hour=14")
        );
    }

    #[test]
    fn test_partition_file_name() {
        assert_eq!(partition_file_name("redis_data", 1, "csv"), "redis_data_part_0001.csv");
        assert_eq!(
            partition_file_name("redis_data", 12345, "parquet"),
            "redis_data_part_12345.parquet"
        );
    }

    #[test]
    fn test_export_id_is_time_derived() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        let meta = RunMetadata::new(ts);
        assert_eq!(meta.export_id, format!("export_{}", ts.timestamp()));
        assert!(meta.partitions.is_empty());
    }

    #[test]
    fn test_finalize_roundtrip() {
        let dir = tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap();

        let mut meta = RunMetadata::new(start);
        meta.pattern = "user:*".into();
        meta.total_keys = 2;
        meta.partitions.push(PartitionInfo {
            partition_id: 1,
            file_name: "redis_data_part_0001.csv".into(),
            record_count: 7,
            file_size_bytes: 512,
            start_time: start,
            end_time: end,
        });

        let path = meta.finalize(dir.path(), end).unwrap();
        assert_eq!(path, dir.path().join(METADATA_FILE_NAME));

        let loaded = RunMetadata::load(&path).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.end_time, end);
        assert_eq!(loaded.total_records(), 7);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let keys: Vec<&str> = raw.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for field in [
            "export_id",
            "pattern",
            "start_time",
            "end_time",
            "total_keys",
            "partitions",
        ] {
            assert!(keys.contains(&field), "missing field {}", field);
        }
    }
}
