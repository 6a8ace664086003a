//! Configuration types for redis-dumper
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros (every global option can
//!   also come from the environment)
//! - Runtime configuration with validation
//! - Output format selection

use crate::error::ConfigError;
use crate::export::{ExportMode, ExportOptions, FlattenOptions, DEFAULT_PATTERN};
use crate::sink::{SinkConfig, DEFAULT_TABLE_NAME};
use crate::source::RedisSourceConfig;
use clap::{Parser, Subcommand};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// SCAN batch size limits
const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 100_000;

/// Pause before a full export unless confirmed with --yes
pub const FULL_EXPORT_DELAY: Duration = Duration::from_secs(5);

/// Export a Redis keyspace to partitioned CSV/Parquet files
#[derive(Parser, Debug, Clone)]
#[command(
    name = "redis-dumper",
    version,
    about = "Export a Redis keyspace to partitioned CSV/Parquet files",
    long_about = "Walks the keyspace with SCAN, resolves TYPE/TTL in pipelined batches and \
                  flattens every value into rows of (key, type, value, ttl_seconds, \
                  exported_at, partition_id).\n\n\
                  Output is laid out as year=/month=/day=/hour= partitions for DuckDB.",
    after_help = "EXAMPLES:\n    \
        redis-dumper keys-only\n    \
        redis-dumper keys-only 'session:*'\n    \
        redis-dumper pattern 'user:*' --output-format csv\n    \
        redis-dumper --redis-url rediss://cache:6380/0 full --yes"
)]
pub struct CliArgs {
    /// Export mode
    #[command(subcommand)]
    pub command: Command,

    /// Redis connection URL
    #[arg(
        long,
        env = "REDIS_URL",
        default_value = "redis://localhost:6379/0",
        value_name = "URL",
        global = true
    )]
    pub redis_url: String,

    /// Output root directory
    #[arg(
        short = 'o',
        long,
        env = "OUTPUT_DIR",
        default_value = "/tmp/dumper",
        value_name = "DIR",
        global = true
    )]
    pub output_dir: PathBuf,

    /// Keys per SCAN batch
    #[arg(
        short = 'b',
        long,
        env = "BATCH_SIZE",
        default_value = "1000",
        value_name = "NUM",
        global = true
    )]
    pub batch_size: usize,

    /// Connect with TLS
    #[arg(long, env = "ENABLE_TLS", global = true)]
    pub enable_tls: bool,

    /// Skip server certificate verification when TLS is on
    #[arg(
        long,
        env = "SKIP_TLS_VERIFY",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_name = "BOOL",
        global = true
    )]
    pub skip_tls_verify: bool,

    /// Output format (csv or parquet)
    #[arg(
        short = 'f',
        long,
        env = "OUTPUT_FORMAT",
        default_value = "parquet",
        value_name = "FORMAT",
        global = true
    )]
    pub output_format: String,

    /// Records per partition file before rotating
    #[arg(
        long,
        env = "MAX_RECORDS_PER_FILE",
        default_value = "100000",
        value_name = "NUM",
        global = true
    )]
    pub max_records_per_file: u64,

    /// COUNT hint for HSCAN/SSCAN/ZSCAN
    #[arg(long, default_value = "1000", value_name = "NUM", global = true)]
    pub subscan_count: usize,

    /// Elements per LRANGE page
    #[arg(long, default_value = "1000", value_name = "NUM", global = true)]
    pub list_page_size: usize,

    /// Flush the sink every N keys (0 disables)
    #[arg(long, default_value = "1000", value_name = "NUM", global = true)]
    pub flush_every: u64,

    /// Partition file name stem
    #[arg(long, default_value = DEFAULT_TABLE_NAME, value_name = "NAME", global = true)]
    pub table_name: String,

    /// Add a per-key size summary row in full exports
    #[arg(long, global = true)]
    pub key_summary: bool,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// One row per key: native type, TTL and a size estimate
    KeysOnly {
        /// Glob pattern; `*` exports every key
        #[arg(value_name = "PATTERN", default_value = DEFAULT_PATTERN)]
        pattern: String,
    },

    /// Full-data export of keys matching a pattern
    Pattern {
        #[arg(value_name = "PATTERN", default_value = DEFAULT_PATTERN)]
        pattern: String,
    },

    /// Full-data export of the whole keyspace
    Full {
        #[arg(value_name = "PATTERN", default_value = DEFAULT_PATTERN)]
        pattern: String,

        /// Start immediately without the warning pause
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

impl Command {
    /// Map the subcommand onto a pipeline mode
    pub fn mode(&self) -> ExportMode {
        match self {
            Command::KeysOnly { pattern } if pattern == DEFAULT_PATTERN => ExportMode::KeysOnly,
            Command::KeysOnly { pattern } => ExportMode::KeysOnlyByPattern(pattern.clone()),
            Command::Pattern { pattern } | Command::Full { pattern, .. } => {
                ExportMode::Full(pattern.clone())
            }
        }
    }

    /// Whether the run should pause with a warning before starting
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Command::Full { yes: false, .. })
    }
}

/// Output format for exported partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Delimited rows with a header (.csv)
    Csv,
    /// ZSTD-compressed columnar files (.parquet)
    #[default]
    Parquet,
}

impl OutputFormat {
    /// DuckDB table function that reads this format
    pub fn duckdb_reader(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "read_csv_auto",
            OutputFormat::Parquet => "read_parquet",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "parquet" => Ok(OutputFormat::Parquet),
            _ => Err(ConfigError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Csv => f.write_str("csv"),
            OutputFormat::Parquet => f.write_str("parquet"),
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// Redis connection settings
    pub redis: RedisSourceConfig,

    /// Partition sink settings
    pub sink: SinkConfig,

    /// Pipeline tuning
    pub export: ExportOptions,

    /// Selected mode
    pub mode: ExportMode,

    /// Pause with a warning before starting
    pub confirm_delay: Option<Duration>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl DumpConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&args.batch_size) {
            return Err(ConfigError::InvalidBatchSize {
                size: args.batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }

        if args.max_records_per_file == 0 {
            return Err(ConfigError::InvalidMaxRecords(args.max_records_per_file));
        }

        if args.subscan_count == 0 {
            return Err(ConfigError::InvalidPageSize {
                name: "subscan count",
                size: args.subscan_count,
            });
        }

        if args.list_page_size == 0 {
            return Err(ConfigError::InvalidPageSize {
                name: "list page size",
                size: args.list_page_size,
            });
        }

        validate_table_name(&args.table_name)?;

        let format: OutputFormat = args.output_format.parse()?;
        let redis = redis_config(&args)?;

        let sink = SinkConfig::new(args.output_dir.clone(), format)
            .with_max_records(args.max_records_per_file)
            .with_table_name(args.table_name.clone());

        let export = ExportOptions {
            batch_size: args.batch_size,
            flush_every: args.flush_every,
            flatten: FlattenOptions {
                subscan_count: args.subscan_count,
                list_page_size: args.list_page_size,
                key_summary: args.key_summary,
            },
        };

        let confirm_delay = args
            .command
            .needs_confirmation()
            .then_some(FULL_EXPORT_DELAY);

        Ok(Self {
            redis,
            sink,
            export,
            mode: args.command.mode(),
            confirm_delay,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }
}

fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(std::path::MAIN_SEPARATOR)
        || name.contains('/');
    if bad {
        return Err(ConfigError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

fn redis_config(args: &CliArgs) -> Result<RedisSourceConfig, ConfigError> {
    let url = args.redis_url.trim();

    let scheme = url.split_once("://").map(|(s, _)| s).ok_or_else(|| {
        ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: "missing scheme".into(),
        }
    })?;

    if !matches!(scheme, "redis" | "rediss" | "unix" | "redis+unix") {
        return Err(ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", scheme),
        });
    }

    let config = RedisSourceConfig {
        url: url.to_string(),
        enable_tls: args.enable_tls,
        skip_tls_verify: args.skip_tls_verify,
        ..Default::default()
    };

    if config.uses_tls() && !cfg!(feature = "tls") {
        return Err(ConfigError::TlsUnsupported(url.to_string()));
    }

    Ok(config)
}
