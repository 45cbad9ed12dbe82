//! Summary rendering: text table, JSON, CSV and SVG charts

pub mod charts;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::config::OutputFormat;
use crate::error::Result;
use crate::orchestrator::{BenchmarkSummary, RowStatus, SummaryRow};
use crate::utils::format;

pub const SUMMARY_JSON: &str = "summary.json";
pub const SUMMARY_CSV: &str = "summary.csv";

/// Render `summary` in the requested format
pub fn render<W: Write>(summary: &BenchmarkSummary, output_format: OutputFormat, out: W) -> Result<()> {
    match output_format {
        OutputFormat::Table => write_table(summary, out)?,
        OutputFormat::Json => write_json(summary, out)?,
        OutputFormat::Csv => write_csv(summary, out)?,
    }
    Ok(())
}

pub fn write_table<W: Write>(summary: &BenchmarkSummary, mut out: W) -> io::Result<()> {
    writeln!(
        out,
        "Rolling metrics benchmark: {} partitions, {} rows, window {}, {} ({} logical / {} physical CPUs)",
        summary.partitions,
        summary.rows_in_dataset,
        summary.window,
        summary.error_policy,
        summary.host.logical_cpus,
        summary.host.physical_cpus,
    )?;
    writeln!(
        out,
        "{:<32} {:>10} {:>10} {:>12} {:>12}  {}",
        "Configuration", "Time (s)", "CPU (%)", "Memory (MB)", "Peak (MB)", "Status"
    )?;
    writeln!(out, "{:-<32} {:->10} {:->10} {:->12} {:->12}  {:-<10}", "", "", "", "", "", "")?;

    for row in &summary.rows {
        writeln!(
            out,
            "{:<32} {:>10.3} {:>10} {:>12} {:>12}  {}",
            row.label,
            row.stats.total_elapsed_seconds,
            format::optional(row.stats.avg_cpu_percent, 1),
            format::optional(row.stats.avg_memory_mb, 1),
            format::optional(row.stats.peak_memory_mb, 1),
            status_text(row),
        )?;
    }

    if let Some(fastest) = summary.fastest() {
        writeln!(out)?;
        writeln!(
            out,
            "Fastest: {} ({:.3}s)",
            fastest.label, fastest.stats.total_elapsed_seconds
        )?;
    }
    Ok(())
}

fn status_text(row: &SummaryRow) -> String {
    let mut text = match &row.status {
        RowStatus::Completed { failed_partitions: 0, .. } => "ok".to_string(),
        RowStatus::Completed {
            partitions,
            failed_partitions,
            ..
        } => format!("{}/{} partitions failed", failed_partitions, partitions),
        RowStatus::Failed { error } => format!("FAILED: {}", error),
    };
    if row.is_degraded() {
        text.push_str(" (no samples)");
    }
    text
}

pub fn write_json<W: Write>(summary: &BenchmarkSummary, mut out: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, summary)?;
    writeln!(out)?;
    Ok(())
}

/// Flat CSV view of one summary row
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    label: &'a str,
    strategy: String,
    backend: String,
    status: &'static str,
    elapsed_seconds: f64,
    avg_cpu_percent: Option<f64>,
    avg_memory_mb: Option<f64>,
    peak_memory_mb: Option<f64>,
    sample_count: usize,
    partitions: Option<usize>,
    failed_partitions: Option<usize>,
    compute_seconds: Option<f64>,
    error: Option<&'a str>,
}

impl<'a> From<&'a SummaryRow> for CsvRow<'a> {
    fn from(row: &'a SummaryRow) -> Self {
        let (partitions, failed_partitions, compute_seconds) = match &row.status {
            RowStatus::Completed {
                partitions,
                failed_partitions,
                compute_seconds,
                ..
            } => (Some(*partitions), Some(*failed_partitions), Some(*compute_seconds)),
            RowStatus::Failed { .. } => (None, None, None),
        };
        Self {
            label: &row.label,
            strategy: row.configuration.strategy.to_string(),
            backend: row.configuration.backend.to_string(),
            status: row.status_label(),
            elapsed_seconds: row.stats.total_elapsed_seconds,
            avg_cpu_percent: row.stats.avg_cpu_percent,
            avg_memory_mb: row.stats.avg_memory_mb,
            peak_memory_mb: row.stats.peak_memory_mb,
            sample_count: row.stats.sample_count,
            partitions,
            failed_partitions,
            compute_seconds,
            error: row.error(),
        }
    }
}

pub fn write_csv<W: Write>(summary: &BenchmarkSummary, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for row in &summary.rows {
        writer.serialize(CsvRow::from(row))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `summary.json` and `summary.csv` into `dir`
pub fn save_summary<P: AsRef<Path>>(summary: &BenchmarkSummary, dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let json = dir.join(SUMMARY_JSON);
    write_json(summary, BufWriter::new(File::create(&json)?))?;

    let csv = dir.join(SUMMARY_CSV);
    write_csv(summary, BufWriter::new(File::create(&csv)?))?;

    info!(dir = %dir.display(), "summary written");
    Ok(vec![json, csv])
}
