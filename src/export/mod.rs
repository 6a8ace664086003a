//! Export pipeline
//!
//! ```text
//! KeyScanner ──batch──▶ resolve_metadata ──KeyMeta──▶ flatten_key / key_record
//!   (SCAN)              (TYPE+PTTL pipeline)          (GET/*SCAN/LRANGE)
//!                                                              │ Record
//!                                                              ▼
//!                                                      PartitionedSink
//!                                                       (csv | parquet)
//! ```
//!
//! Everything runs on the caller's thread, one key batch at a time. The
//! [`Exporter`] owns the sink; run metadata is written only when a mode
//! completes cleanly, so a failed run leaves its closed partitions on disk
//! and no `export_metadata.json`.

pub mod batcher;
pub mod flatten;
pub mod scanner;

pub use batcher::{normalize_ttl, resolve_metadata, KeyMeta, MetadataBatch};
pub use flatten::{estimate_key_size, flatten_key, key_record, FlattenOptions};
pub use scanner::KeyScanner;

use crate::error::{KeyOutcome, Result};
use crate::sink::{PartitionedSink, RunMetadata};
use crate::source::KeySource;
use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Pattern used when none is given
pub const DEFAULT_PATTERN: &str = "*";

/// Operating mode of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportMode {
    /// One record per key for the whole key space
    KeysOnly,
    /// One record per key matching the pattern
    KeysOnlyByPattern(String),
    /// Every field, member and element of keys matching the pattern
    Full(String),
}

impl ExportMode {
    pub fn pattern(&self) -> &str {
        match self {
            ExportMode::KeysOnly => DEFAULT_PATTERN,
            ExportMode::KeysOnlyByPattern(p) | ExportMode::Full(p) => p,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ExportMode::Full(_))
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportMode::KeysOnly => f.write_str("keys-only"),
            ExportMode::KeysOnlyByPattern(p) => write!(f, "keys-only ({})", p),
            ExportMode::Full(p) => write!(f, "full ({})", p),
        }
    }
}

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Max keys per SCAN batch
    pub batch_size: usize,
    /// Flush the sink after this many processed keys (0 disables)
    pub flush_every: u64,
    pub flatten: FlattenOptions,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_every: 1000,
            flatten: FlattenOptions::default(),
        }
    }
}

/// Running counters, reported through the progress callback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub keys_scanned: u64,
    pub keys_exported: u64,
    pub keys_skipped: u64,
    pub records_written: u64,
    /// Closed partitions plus the open one, if any
    pub partitions: u64,
    /// Payload bytes read (values in full mode, estimates in keys-only mode)
    pub payload_bytes: u64,
    pub elapsed: Duration,
}

impl ExportStats {
    pub fn keys_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.keys_scanned as f64 / secs
        } else {
            0.0
        }
    }

    fn record(&mut self, outcome: &KeyOutcome) {
        match outcome {
            KeyOutcome::Exported { bytes, .. } => {
                self.keys_exported += 1;
                self.payload_bytes += bytes;
            }
            KeyOutcome::Skipped { .. } => self.keys_skipped += 1,
        }
    }
}

/// Final result of a clean run
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub mode: ExportMode,
    pub stats: ExportStats,
    pub metadata: RunMetadata,
    /// Glob over every partition file of the output root
    pub query_glob: String,
}

impl ExportSummary {
    /// Bytes written across all partition files
    pub fn file_bytes(&self) -> u64 {
        self.metadata.total_bytes()
    }
}

/// Progress callback invoked after every key batch
pub type ProgressCallback = Box<dyn FnMut(&ExportStats)>;

/// Drives one run from a key source into a partitioned sink
pub struct Exporter<S: KeySource> {
    source: S,
    sink: PartitionedSink,
    options: ExportOptions,
    progress: Option<ProgressCallback>,
}

impl<S: KeySource> Exporter<S> {
    pub fn new(source: S, sink: PartitionedSink, options: ExportOptions) -> Self {
        Self {
            source,
            sink,
            options,
            progress: None,
        }
    }

    /// Attach a progress callback
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// One `{key, <native type>, size_estimate=<n>}` record per key
    pub fn export_keys_only(self) -> Result<ExportSummary> {
        self.run(ExportMode::KeysOnly)
    }

    /// Keys-only export restricted to keys matching `pattern`
    pub fn export_keys_only_by_pattern(self, pattern: &str) -> Result<ExportSummary> {
        self.run(ExportMode::KeysOnlyByPattern(pattern.to_string()))
    }

    /// Full-data export of keys matching `pattern`
    pub fn export_by_pattern(self, pattern: &str) -> Result<ExportSummary> {
        self.run(ExportMode::Full(pattern.to_string()))
    }

    /// Run a mode to completion and close the sink
    pub fn run(mut self, mode: ExportMode) -> Result<ExportSummary> {
        let started = Instant::now();
        let pattern = mode.pattern().to_string();
        info!(mode = %mode, pattern = %pattern, "Starting export");

        self.sink.set_pattern(&pattern);

        let mut scanner = KeyScanner::new(&pattern, self.options.batch_size);
        let mut stats = ExportStats::default();
        let mut processed: u64 = 0;

        while let Some(keys) = scanner.next_batch(&mut self.source)? {
            stats.keys_scanned += keys.len() as u64;

            let batch = resolve_metadata(&mut self.source, &keys)?;
            stats.keys_skipped += batch.skipped.len() as u64;

            for meta in &batch.resolved {
                let exported_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

                let outcome = if mode.is_full() {
                    flatten_key(
                        &mut self.source,
                        &mut self.sink,
                        meta,
                        &self.options.flatten,
                        &exported_at,
                    )?
                } else {
                    let record = key_record(meta, &exported_at);
                    self.sink.write(&record)?;
                    KeyOutcome::Exported {
                        records: 1,
                        bytes: estimate_key_size(&meta.raw_key, &meta.key_type),
                    }
                };
                stats.record(&outcome);

                processed += 1;
                if self.options.flush_every > 0 && processed % self.options.flush_every == 0 {
                    self.sink.flush()?;
                    info!(
                        keys = processed,
                        records = self.sink.records_written(),
                        "Flushed sink"
                    );
                }
            }

            stats.records_written = self.sink.records_written();
            stats.partitions = self.partition_count();
            stats.elapsed = started.elapsed();
            debug!(
                scanned = stats.keys_scanned,
                exported = stats.keys_exported,
                skipped = stats.keys_skipped,
                records = stats.records_written,
                "Batch complete"
            );

            if let Some(callback) = self.progress.as_mut() {
                callback(&stats);
            }
        }

        self.sink.set_total_keys(stats.keys_scanned);
        let metadata = self.sink.close()?;

        stats.records_written = self.sink.records_written();
        stats.partitions = metadata.partitions.len() as u64;
        stats.elapsed = started.elapsed();

        info!(
            export_id = %metadata.export_id,
            keys = stats.keys_scanned,
            exported = stats.keys_exported,
            skipped = stats.keys_skipped,
            records = stats.records_written,
            partitions = stats.partitions,
            elapsed_secs = stats.elapsed.as_secs_f64(),
            "Export complete"
        );

        Ok(ExportSummary {
            mode,
            stats,
            metadata,
            query_glob: self.sink.query_glob(),
        })
    }

    fn partition_count(&self) -> u64 {
        let closed = self.sink.metadata().partitions.len() as u64;
        closed + u64::from(self.sink.current_partition_id().is_some())
    }
}
