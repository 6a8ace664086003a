//! redis-dumper - Redis keyspace exporter
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use redis_dumper::config::{CliArgs, DumpConfig};
use redis_dumper::export::{ExportStats, Exporter};
use redis_dumper::progress::{
    print_full_export_warning, print_header, print_summary, ProgressReporter,
};
use redis_dumper::sink::PartitionedSink;
use redis_dumper::source::RedisSource;
use std::process::ExitCode;
use std::rc::Rc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = DumpConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(
            &config.redis.display_url(),
            &config.mode.to_string(),
            config.sink.format,
            &config.sink.output_dir.display().to_string(),
        );
    }

    if let Some(delay) = config.confirm_delay {
        print_full_export_warning(delay);
        std::thread::sleep(delay);
    }

    let source = RedisSource::connect(&config.redis).context("Failed to connect to Redis")?;
    let sink = PartitionedSink::new(config.sink.clone())
        .context("Failed to prepare output directory")?;

    let progress = config.show_progress.then(|| Rc::new(ProgressReporter::new()));

    let mut exporter = Exporter::new(source, sink, config.export.clone());
    if let Some(reporter) = &progress {
        reporter.set_status("Scanning keys...");
        let reporter = Rc::clone(reporter);
        exporter = exporter.with_progress(Box::new(move |stats: &ExportStats| {
            reporter.update(stats)
        }));
    }

    let result = exporter.run(config.mode.clone());

    if let Some(reporter) = &progress {
        match &result {
            Ok(_) => reporter.finish_and_clear(),
            Err(_) => reporter.finish("Export failed"),
        }
    }

    let summary = result.context("Export failed")?;

    if config.show_progress {
        print_summary(&summary, config.sink.format);
    }

    if summary.stats.keys_skipped > 0 {
        info!(skipped = summary.stats.keys_skipped, "Export completed with skipped keys");
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("redis_dumper=debug,warn")
    } else {
        EnvFilter::new("redis_dumper=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
