//! Error types for redis-dumper
//!
//! This module defines the error hierarchy for the export pipeline:
//! - Source errors (Redis transport, command failures, malformed replies)
//! - Sink errors (filesystem, CSV/Parquet encoding, metadata serialization)
//! - Configuration errors
//!
//! Source errors raised while handling a single key are recoverable: the key
//! is skipped and the run continues. Everything else aborts the run.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the redis-dumper application
#[derive(Error, Debug)]
pub enum DumperError {
    /// Key-value store errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Output sink errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by a [`KeySource`](crate::source::KeySource)
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// Could not connect to (or ping) the store
    #[error("Failed to connect to '{url}': {reason}")]
    Connection { url: String, reason: String },

    /// A command failed on the wire or was rejected by the server
    #[error("{command} failed for '{key}': {reason}")]
    Command {
        command: &'static str,
        key: String,
        reason: String,
    },

    /// The server reply did not have the expected shape
    #[error("Malformed {command} reply for '{key}': {reason}")]
    Malformed {
        command: &'static str,
        key: String,
        reason: String,
    },
}

impl SourceError {
    /// Build a command error from any displayable cause
    pub fn command(
        command: &'static str,
        key: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        SourceError::Command {
            command,
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a malformed-reply error
    pub fn malformed(
        command: &'static str,
        key: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        SourceError::Malformed {
            command,
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error only concerns a single key (skip it and continue)
    pub fn is_key_scoped(&self) -> bool {
        matches!(
            self,
            SourceError::Command { .. } | SourceError::Malformed { .. }
        )
    }
}

/// Output sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// Failed to create an output directory
    #[error("Failed to create directory '{path}': {reason}")]
    CreateDir { path: PathBuf, reason: String },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoder error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet writer error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Run metadata serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record rejected before any byte was written
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Encoder used without an open partition file
    #[error("No open partition file")]
    NotOpen,

    /// Sink used after close()
    #[error("Sink is already closed")]
    Closed,
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid scan batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Invalid rotation threshold
    #[error("Invalid max records per file {0}: must be at least 1")]
    InvalidMaxRecords(u64),

    /// Invalid sub-scan or list page size
    #[error("Invalid {name} {size}: must be at least 1")]
    InvalidPageSize { name: &'static str, size: usize },

    /// Unknown output format
    #[error("Unsupported output format '{0}': expected 'csv' or 'parquet'")]
    InvalidFormat(String),

    /// Unusable Redis URL
    #[error("Invalid Redis URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Table name would escape the partition directory
    #[error("Invalid table name '{0}': must be non-empty and contain no path separators")]
    InvalidTableName(String),

    /// TLS requested but not compiled in
    #[error("TLS requested for '{0}' but redis-dumper was built without the 'tls' feature")]
    TlsUnsupported(String),
}

/// Result type alias for DumperError
pub type Result<T> = std::result::Result<T, DumperError>;

/// Result type alias for SourceError
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type alias for SinkError
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Represents the outcome of exporting a single key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Key flattened into `records` rows carrying `bytes` of payload
    Exported { records: u64, bytes: u64 },

    /// Key skipped due to a recoverable error or unsupported type
    Skipped { key: String, reason: String },
}

impl KeyOutcome {
    /// Returns true if this outcome represents an exported key
    pub fn is_exported(&self) -> bool {
        matches!(self, KeyOutcome::Exported { .. })
    }

    /// Number of records written for this key
    pub fn records(&self) -> u64 {
        match self {
            KeyOutcome::Exported { records, .. } => *records,
            KeyOutcome::Skipped { .. } => 0,
        }
    }
}
