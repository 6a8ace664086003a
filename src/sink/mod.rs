//! Partitioned file sink
//!
//! Records are written into size-bounded partition files laid out as
//!
//! ```text
//! <output_dir>/
//! ├── export_metadata.json
//! └── year=YYYY/month=MM/day=DD/hour=HH/
//!     ├── <table>_part_0001.<ext>
//!     └── <table>_part_0002.<ext>
//! ```
//!
//! Lifecycle: idle → open(partition) → ... → closed. A partition is opened
//! lazily by the first write after start or rotation, so a run that writes
//! nothing leaves no partition files behind. When the current partition
//! already holds `max_records_per_file` records, the next write closes it and
//! opens a new one. `close` finalizes the last partition and writes the run
//! metadata exactly once.

mod csv_encoder;
mod encoder;
mod metadata;
mod parquet_encoder;
pub mod schema;

pub use csv_encoder::CsvEncoder;
pub use encoder::{encoder_for, RecordEncoder};
pub use metadata::{
    partition_dir, partition_file_name, PartitionInfo, RunMetadata, METADATA_FILE_NAME,
};
pub use parquet_encoder::ParquetEncoder;

use crate::config::OutputFormat;
use crate::error::{SinkError, SinkResult};
use crate::source::KeyType;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default table name used in partition file names
pub const DEFAULT_TABLE_NAME: &str = "redis_data";

/// Kind of an exported row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordType {
    String,
    HashField,
    SetMember,
    ZsetMember,
    ListItem,
    /// Key-level summary row carrying the native type
    Key(KeyType),
}

impl RecordType {
    pub fn as_str(&self) -> &str {
        match self {
            RecordType::String => "string",
            RecordType::HashField => "hash_field",
            RecordType::SetMember => "set_member",
            RecordType::ZsetMember => "zset_member",
            RecordType::ListItem => "list_item",
            RecordType::Key(key_type) => key_type.as_str(),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flattened row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Synthetic key, e.g. `user:1:field:name`
    pub key: String,
    pub record_type: RecordType,
    pub value: String,
    /// `-1` when the source key has no expiry
    pub ttl_seconds: i64,
    /// RFC 3339 UTC timestamp
    pub exported_at: String,
}

impl Record {
    pub fn new(
        key: impl Into<String>,
        record_type: RecordType,
        value: impl Into<String>,
        ttl_seconds: i64,
        exported_at: &str,
    ) -> Self {
        Self {
            key: key.into(),
            record_type,
            value: value.into(),
            ttl_seconds,
            exported_at: exported_at.to_string(),
        }
    }

    /// Reject rows that would be meaningless downstream
    fn validate(&self) -> SinkResult<()> {
        if self.key.is_empty() {
            return Err(SinkError::InvalidRecord(format!(
                "empty key for {} record",
                self.record_type
            )));
        }
        if self.exported_at.is_empty() {
            return Err(SinkError::InvalidRecord(format!(
                "missing exported_at for '{}'",
                self.key
            )));
        }
        Ok(())
    }
}

/// Sink settings
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub max_records_per_file: u64,
    pub table_name: String,
}

impl SinkConfig {
    pub fn new(output_dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
            max_records_per_file: 100_000,
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }

    pub fn with_max_records(mut self, max_records_per_file: u64) -> Self {
        self.max_records_per_file = max_records_per_file;
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }
}

/// The partition currently receiving records
#[derive(Debug)]
struct OpenPartition {
    partition_id: u32,
    file_name: String,
    path: PathBuf,
    record_count: u64,
    opened_at: DateTime<Utc>,
}

#[derive(Debug)]
enum SinkState {
    Idle,
    Open(OpenPartition),
    Closed,
}

/// Writes records into rotating partition files and tracks run metadata
pub struct PartitionedSink {
    config: SinkConfig,
    encoder: Box<dyn RecordEncoder>,
    state: SinkState,
    next_partition_id: u32,
    records_written: u64,
    metadata: RunMetadata,
}

impl PartitionedSink {
    /// Create the output root and an idle sink for the configured format
    pub fn new(config: SinkConfig) -> SinkResult<Self> {
        let encoder = encoder_for(config.format);
        Self::with_encoder(config, encoder)
    }

    /// Create a sink around an explicit encoder
    pub fn with_encoder(config: SinkConfig, encoder: Box<dyn RecordEncoder>) -> SinkResult<Self> {
        if config.max_records_per_file == 0 {
            return Err(SinkError::InvalidRecord(
                "max_records_per_file must be at least 1".to_string(),
            ));
        }

        create_dir(&config.output_dir)?;

        let metadata = RunMetadata::new(Utc::now());
        info!(
            export_id = %metadata.export_id,
            output_dir = %config.output_dir.display(),
            format = %config.format,
            max_records_per_file = config.max_records_per_file,
            "Sink ready"
        );

        Ok(Self {
            config,
            encoder,
            state: SinkState::Idle,
            next_partition_id: 1,
            records_written: 0,
            metadata,
        })
    }

    /// Pattern recorded in the run metadata
    pub fn set_pattern(&mut self, pattern: &str) {
        self.metadata.pattern = pattern.to_string();
    }

    /// Total key count recorded in the run metadata
    pub fn set_total_keys(&mut self, total_keys: u64) {
        self.metadata.total_keys = total_keys;
    }

    /// Append one record, rotating first if the open partition is full
    pub fn write(&mut self, record: &Record) -> SinkResult<()> {
        if matches!(self.state, SinkState::Closed) {
            return Err(SinkError::Closed);
        }
        record.validate()?;

        if let SinkState::Open(open) = &self.state {
            if open.record_count >= self.config.max_records_per_file {
                self.finish_partition()?;
            }
        }

        if matches!(self.state, SinkState::Idle) {
            self.open_partition()?;
        }

        let SinkState::Open(open) = &mut self.state else {
            return Err(SinkError::NotOpen);
        };
        self.encoder.write(record, open.partition_id)?;
        open.record_count += 1;
        self.records_written += 1;
        Ok(())
    }

    /// Close the current partition if it holds any records.
    ///
    /// The next partition opens on the following write.
    pub fn rotate(&mut self) -> SinkResult<()> {
        match &self.state {
            SinkState::Closed => Err(SinkError::Closed),
            SinkState::Open(open) if open.record_count > 0 => self.finish_partition(),
            _ => Ok(()),
        }
    }

    /// Push buffered rows of the open partition to the encoder's file
    pub fn flush(&mut self) -> SinkResult<()> {
        match &self.state {
            SinkState::Closed => Err(SinkError::Closed),
            SinkState::Open(_) => self.encoder.flush(),
            SinkState::Idle => Ok(()),
        }
    }

    /// Finalize the last partition and write `export_metadata.json`.
    ///
    /// Returns the finished metadata; a second call fails with
    /// [`SinkError::Closed`].
    pub fn close(&mut self) -> SinkResult<RunMetadata> {
        match &self.state {
            SinkState::Closed => return Err(SinkError::Closed),
            SinkState::Open(_) => self.finish_partition()?,
            SinkState::Idle => {}
        }
        self.state = SinkState::Closed;

        let path = self
            .metadata
            .finalize(&self.config.output_dir, Utc::now())?;

        info!(
            export_id = %self.metadata.export_id,
            partitions = self.metadata.partitions.len(),
            records = self.records_written,
            metadata = %path.display(),
            "Export metadata written"
        );

        Ok(self.metadata.clone())
    }

    /// Glob matching every partition file this sink writes
    pub fn query_glob(&self) -> String {
        format!(
            "{}/**/*.{}",
            self.config.output_dir.display(),
            self.encoder.extension()
        )
    }

    /// Metadata accumulated so far
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Records accepted since the sink was created
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Id of the open partition, if any
    pub fn current_partition_id(&self) -> Option<u32> {
        match &self.state {
            SinkState::Open(open) => Some(open.partition_id),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SinkState::Closed)
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    fn open_partition(&mut self) -> SinkResult<()> {
        let opened_at = Utc::now();
        let dir = partition_dir(&self.config.output_dir, opened_at);
        create_dir(&dir)?;

        let partition_id = self.next_partition_id;
        self.next_partition_id += 1;

        let file_name =
            partition_file_name(&self.config.table_name, partition_id, self.encoder.extension());
        let path = dir.join(&file_name);
        self.encoder.begin(&path)?;

        debug!(partition_id, path = %path.display(), "Opened partition");

        self.state = SinkState::Open(OpenPartition {
            partition_id,
            file_name,
            path,
            record_count: 0,
            opened_at,
        });
        Ok(())
    }

    fn finish_partition(&mut self) -> SinkResult<()> {
        let SinkState::Open(open) = std::mem::replace(&mut self.state, SinkState::Idle) else {
            return Ok(());
        };

        let file_size_bytes = self.encoder.finish()?;

        if open.record_count == 0 {
            fs::remove_file(&open.path)?;
            debug!(partition_id = open.partition_id, "Dropped empty partition");
            return Ok(());
        }

        info!(
            partition_id = open.partition_id,
            file = %open.file_name,
            records = open.record_count,
            bytes = file_size_bytes,
            "Closed partition"
        );

        self.metadata.partitions.push(PartitionInfo {
            partition_id: open.partition_id,
            file_name: open.file_name,
            record_count: open.record_count,
            file_size_bytes,
            start_time: open.opened_at,
            end_time: Utc::now(),
        });
        Ok(())
    }
}

fn create_dir(path: &Path) -> SinkResult<()> {
    fs::create_dir_all(path).map_err(|e| SinkError::CreateDir {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
