//! Progress reporting for exports
//!
//! Provides a live spinner fed by the exporter's progress callback, plus the
//! header and summary printed around a run.

use crate::config::OutputFormat;
use crate::export::{ExportStats, ExportSummary};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays export status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, stats: &ExportStats) {
        let mut msg = format!(
            "Keys: {} | Exported: {} | Records: {} | Partitions: {} | Rate: {:.0} keys/s",
            format_number(stats.keys_scanned),
            format_number(stats.keys_exported),
            format_number(stats.records_written),
            stats.partitions,
            stats.keys_per_second(),
        );
        if stats.keys_skipped > 0 {
            msg.push_str(&format!(" | Skipped: {}", format_number(stats.keys_skipped)));
        }

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// DuckDB one-liner that reads every partition of a run
pub fn duckdb_hint(format: OutputFormat, query_glob: &str) -> String {
    format!(
        "SELECT * FROM {}('{}');",
        format.duckdb_reader(),
        query_glob
    )
}

/// Print a summary of the export
pub fn print_summary(summary: &ExportSummary, format: OutputFormat) {
    let stats = &summary.stats;
    let duration_secs = stats.elapsed.as_secs_f64();

    println!();
    println!("{}", style("Export Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Export ID:").bold(), summary.metadata.export_id);
    println!("  {} {}", style("Mode:").bold(), summary.mode);
    println!(
        "  {} {}",
        style("Keys:").bold(),
        format_number(stats.keys_scanned)
    );
    println!(
        "  {} {}",
        style("Exported:").bold(),
        format_number(stats.keys_exported)
    );
    println!(
        "  {} {}",
        style("Records:").bold(),
        format_number(stats.records_written)
    );
    println!(
        "  {} {} ({})",
        style("Partitions:").bold(),
        summary.metadata.partitions.len(),
        format_size(summary.file_bytes(), BINARY)
    );
    println!(
        "  {} {:.1}s ({:.0} keys/sec)",
        style("Duration:").bold(),
        duration_secs,
        stats.keys_per_second()
    );
    if stats.keys_skipped > 0 {
        println!(
            "  {} {}",
            style("Skipped:").yellow().bold(),
            format_number(stats.keys_skipped)
        );
    }
    println!();
    println!("  {}", style("Query with DuckDB:").bold());
    println!("    {}", duckdb_hint(format, &summary.query_glob));
    println!();
}

/// Print a header at the start of the export
pub fn print_header(url: &str, mode: &str, format: OutputFormat, output: &str) {
    println!();
    println!(
        "{} {}",
        style("redis-dumper").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), url);
    println!("  {} {}", style("Mode:").bold(), mode);
    println!("  {} {}", style("Format:").bold(), format);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}

/// Warn before a full-keyspace export
pub fn print_full_export_warning(delay: Duration) {
    eprintln!(
        "{} full export reads every value of every matching key and can load the server.",
        style("Warning:").yellow().bold()
    );
    eprintln!(
        "Starting in {} seconds, press Ctrl+C to abort (use --yes to skip this pause).",
        delay.as_secs()
    );
}
