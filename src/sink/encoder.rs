//! Per-format partition encoders
//!
//! The partitioned sink owns layout, rotation and accounting; an encoder only
//! knows how to turn records into the bytes of one partition file.

use crate::config::OutputFormat;
use crate::error::SinkResult;
use crate::sink::csv_encoder::CsvEncoder;
use crate::sink::parquet_encoder::ParquetEncoder;
use crate::sink::Record;
use std::path::Path;

/// Writes records of one partition at a time
pub trait RecordEncoder {
    /// File extension for partitions written by this encoder
    fn extension(&self) -> &'static str;

    /// Start a new partition file at `path`
    fn begin(&mut self, path: &Path) -> SinkResult<()>;

    /// Append one record tagged with the partition it belongs to
    fn write(&mut self, record: &Record, partition_id: u32) -> SinkResult<()>;

    /// Push buffered rows towards the file; a no-op for encoders that only
    /// materialize the file on [`finish`](Self::finish)
    fn flush(&mut self) -> SinkResult<()>;

    /// Complete the current file and return its size in bytes
    fn finish(&mut self) -> SinkResult<u64>;
}

/// Encoder for an output format
pub fn encoder_for(format: OutputFormat) -> Box<dyn RecordEncoder> {
    match format {
        OutputFormat::Csv => Box::new(CsvEncoder::new()),
        OutputFormat::Parquet => Box::new(ParquetEncoder::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_extensions() {
        assert_eq!(encoder_for(OutputFormat::Csv).extension(), "csv");
        assert_eq!(encoder_for(OutputFormat::Parquet).extension(), "parquet");
    }
}
