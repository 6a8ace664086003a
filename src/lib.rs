//! redis-dumper - Redis keyspace exporter
//!
//! Streams the contents of a Redis server into time-partitioned CSV or
//! Parquet files for offline analysis with DuckDB, Polars or Spark. Memory
//! stays bounded no matter how large the keyspace or any single key is.
//!
//! # Features
//!
//! - **Resumable Enumeration**: Walks the keyspace with SCAN cursors instead
//!   of KEYS, so the server never blocks on a full key listing.
//!
//! - **Pipelined Metadata**: TYPE and PTTL for a whole key batch travel in a
//!   single round trip.
//!
//! - **Bounded Flattening**: Hashes, sets and sorted sets are read with
//!   HSCAN/SSCAN/ZSCAN pages and lists in LRANGE windows; every field,
//!   member or element becomes one flat row.
//!
//! - **Partitioned Output**: Files rotate on a record-count threshold into
//!   `year=/month=/day=/hour=` directories, with an `export_metadata.json`
//!   accounting for every partition of the run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Redis Server                            │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               │ SCAN / TYPE+PTTL pipeline / *SCAN / LRANGE
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Export Pipeline                           │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐      │
//! │  │ KeyScanner  │──▶│  Metadata    │──▶│  Value Flattener │      │
//! │  │ (cursor)    │   │  Batcher     │   │  (per-type rules)│      │
//! │  └─────────────┘   └──────────────┘   └────────┬─────────┘      │
//! │                                                │ Record         │
//! │                                                ▼                │
//! │                        ┌──────────────────────────────┐         │
//! │                        │      PartitionedSink         │         │
//! │                        │  - rotation at max records   │         │
//! │                        │  - run metadata              │         │
//! │                        └──────────────┬───────────────┘         │
//! │                                       │ RecordEncoder           │
//! │                              ┌────────┴────────┐                │
//! │                              ▼                 ▼                │
//! │                        ┌──────────┐      ┌──────────┐           │
//! │                        │   CSV    │      │ Parquet  │           │
//! │                        └──────────┘      └──────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!              <output>/year=YYYY/month=MM/day=DD/hour=HH/
//!                  redis_data_part_0001.parquet ...
//! ```
//!
//! # Example
//!
//! ```bash
//! # One row per key with type, TTL and size estimate
//! redis-dumper keys-only
//!
//! # Every field/member/element of matching keys, as CSV
//! redis-dumper pattern 'user:*' --output-format csv
//!
//! # Query results
//! duckdb -c "SELECT type, count(*) FROM read_parquet('/tmp/dumper/**/*.parquet') GROUP BY 1"
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod progress;
pub mod sink;
pub mod source;

pub use config::{CliArgs, Command, DumpConfig, OutputFormat};
pub use error::{DumperError, KeyOutcome, Result};
pub use export::{ExportMode, ExportOptions, ExportStats, ExportSummary, Exporter};
pub use sink::{PartitionedSink, Record, RecordType, RunMetadata, SinkConfig};
pub use source::{KeySource, KeyType, MemoryStore, RedisSource, RedisSourceConfig};
