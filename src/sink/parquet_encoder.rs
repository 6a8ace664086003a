//! Parquet partition encoder
//!
//! Rows accumulate in Arrow column builders for the lifetime of a partition.
//! At [`finish`](RecordEncoder::finish) the builders are frozen into a single
//! `RecordBatch` and written with a ZSTD-compressed `ArrowWriter`, so a
//! partition file on disk is always complete.

use crate::error::{SinkError, SinkResult};
use crate::sink::encoder::RecordEncoder;
use crate::sink::schema::record_schema_ref;
use crate::sink::Record;
use arrow::array::{ArrayRef, Int32Builder, Int64Builder, StringBuilder};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default ZSTD level
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Default rows per row group
const DEFAULT_ROW_GROUP_SIZE: usize = 100_000;

/// Column builders for one partition
struct RowTable {
    key: StringBuilder,
    kind: StringBuilder,
    value: StringBuilder,
    ttl_seconds: Int64Builder,
    exported_at: StringBuilder,
    partition_id: Int32Builder,
}

impl RowTable {
    fn new() -> Self {
        Self {
            key: StringBuilder::new(),
            kind: StringBuilder::new(),
            value: StringBuilder::new(),
            ttl_seconds: Int64Builder::new(),
            exported_at: StringBuilder::new(),
            partition_id: Int32Builder::new(),
        }
    }

    fn append(&mut self, record: &Record, partition_id: i32) {
        self.key.append_value(&record.key);
        self.kind.append_value(record.record_type.as_str());
        self.value.append_value(&record.value);
        self.ttl_seconds.append_value(record.ttl_seconds);
        self.exported_at.append_value(&record.exported_at);
        self.partition_id.append_value(partition_id);
    }

    fn into_batch(mut self) -> SinkResult<RecordBatch> {
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(self.key.finish()),
            Arc::new(self.kind.finish()),
            Arc::new(self.value.finish()),
            Arc::new(self.ttl_seconds.finish()),
            Arc::new(self.exported_at.finish()),
            Arc::new(self.partition_id.finish()),
        ];
        Ok(RecordBatch::try_new(record_schema_ref(), arrays)?)
    }
}

pub struct ParquetEncoder {
    path: Option<PathBuf>,
    table: Option<RowTable>,
    compression_level: i32,
    row_group_size: usize,
}

impl Default for ParquetEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL, DEFAULT_ROW_GROUP_SIZE)
    }
}

impl ParquetEncoder {
    pub fn new(compression_level: i32, row_group_size: usize) -> Self {
        Self {
            path: None,
            table: None,
            compression_level,
            row_group_size,
        }
    }

    /// ZSTD compression with chunk-level column statistics
    fn writer_properties(&self) -> SinkResult<WriterProperties> {
        let zstd_level = ZstdLevel::try_new(self.compression_level)?;

        Ok(WriterProperties::builder()
            .set_compression(Compression::ZSTD(zstd_level))
            .set_dictionary_enabled(true)
            .set_statistics_enabled(EnabledStatistics::Chunk)
            .set_max_row_group_size(self.row_group_size)
            .build())
    }
}

impl RecordEncoder for ParquetEncoder {
    fn extension(&self) -> &'static str {
        "parquet"
    }

    fn begin(&mut self, path: &Path) -> SinkResult<()> {
        self.path = Some(path.to_path_buf());
        self.table = Some(RowTable::new());
        Ok(())
    }

    fn write(&mut self, record: &Record, partition_id: u32) -> SinkResult<()> {
        let partition_id = i32::try_from(partition_id).map_err(|_| {
            SinkError::InvalidRecord(format!("partition id {} out of range", partition_id))
        })?;
        let table = self.table.as_mut().ok_or(SinkError::NotOpen)?;
        table.append(record, partition_id);
        Ok(())
    }

    fn flush(&mut self) -> SinkResult<()> {
        // Rows stay in memory until finish()
        if self.table.is_none() {
            return Err(SinkError::NotOpen);
        }
        Ok(())
    }

    fn finish(&mut self) -> SinkResult<u64> {
        let table = self.table.take().ok_or(SinkError::NotOpen)?;
        let path = self.path.take().ok_or(SinkError::NotOpen)?;

        let batch = table.into_batch()?;
        let props = self.writer_properties()?;

        let file = File::create(&path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        Ok(std::fs::metadata(&path)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordType;
    use arrow::array::{Array, Int32Array, Int64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn record(key: &str, value: &str, ttl: i64) -> Record {
        Record {
            key: key.to_string(),
            record_type: RecordType::ZsetMember,
            value: value.to_string(),
            ttl_seconds: ttl,
            exported_at: "2024-01-15T14:30:00Z".to_string(),
        }
    }

    #[test]
    fn test_file_written_on_finish() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.parquet");

        let mut encoder = ParquetEncoder::default();
        encoder.begin(&path).unwrap();
        encoder
            .write(&record("board:member:alice", "score=10,rank=0", 2700), 4)
            .unwrap();
        encoder
            .write(&record("board:member:bob", "score=7.5,rank=1", 2700), 4)
            .unwrap();
        encoder.flush().unwrap();
        assert!(!path.exists());

        let size = encoder.finish().unwrap();
        assert!(size > 0);
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());

        let file = File::open(&path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();

        let mut rows = 0;
        for batch in reader {
            let batch = batch.unwrap();
            rows += batch.num_rows();
            assert_eq!(batch.num_columns(), 6);

            let keys = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
            let types = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
            let ttls = batch.column(3).as_any().downcast_ref::<Int64Array>().unwrap();
            let parts = batch.column(5).as_any().downcast_ref::<Int32Array>().unwrap();

            assert_eq!(keys.value(0), "board:member:alice");
            assert_eq!(types.value(1), "zset_member");
            assert_eq!(ttls.value(0), 2700);
            assert_eq!(parts.value(1), 4);
            assert_eq!(parts.null_count(), 0);
        }
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_invalid_compression_level() {
        let dir = tempdir().unwrap();
        let mut encoder = ParquetEncoder::new(99, DEFAULT_ROW_GROUP_SIZE);
        encoder.begin(&dir.path().join("bad.parquet")).unwrap();
        assert!(matches!(encoder.finish(), Err(SinkError::Parquet(_))));
    }

    #[test]
    fn test_write_without_begin() {
        let mut encoder = ParquetEncoder::default();
        assert!(matches!(
            encoder.write(&record("k", "v", -1), 1),
            Err(SinkError::NotOpen)
        ));
    }
}
