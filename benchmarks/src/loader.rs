//! CSV data loader
//!
//! Reads a header row naming `timestamp`, `symbol` and any number of numeric
//! columns. Empty numeric cells load as NaN and surface as undefined cells in
//! computed tables.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::info;

use crate::dataset::Dataset;
use crate::error::{HarnessError, Result};
use crate::monitoring::ResourceMonitor;

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const SYMBOL_COLUMN: &str = "symbol";

const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];
const TIMESTAMP_OUT: &str = "%Y-%m-%d %H:%M:%S";

/// A loaded dataset with load diagnostics
#[derive(Debug)]
pub struct Loaded {
    pub dataset: Dataset,
    pub elapsed_seconds: f64,
    /// `None` when the load finished before the first sample
    pub peak_memory_mb: Option<f64>,
}

/// Load a CSV file, measuring the load with a default [`ResourceMonitor`]
pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Loaded> {
    load_csv_with(path, &ResourceMonitor::default())
}

pub fn load_csv_with<P: AsRef<Path>>(path: P, monitor: &ResourceMonitor) -> Result<Loaded> {
    let path = path.as_ref();
    let source = path.display().to_string();

    let measured = monitor.measure(|| -> Result<Dataset> {
        let file = File::open(path)?;
        read_dataset(BufReader::new(file), &source)
    })?;
    let dataset = measured.value?;

    info!(
        path = %source,
        rows = dataset.len(),
        symbols = dataset.symbols().len(),
        elapsed = measured.stats.total_elapsed_seconds,
        "dataset loaded"
    );

    Ok(Loaded {
        dataset,
        elapsed_seconds: measured.stats.total_elapsed_seconds,
        peak_memory_mb: measured.stats.peak_memory_mb,
    })
}

/// Parse CSV from any reader. `source` names the input in error messages.
pub fn read_dataset<R: Read>(reader: R, source: &str) -> Result<Dataset> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv.headers()?.clone();
    let load_error = |line: u64, message: String| HarnessError::Load {
        path: source.to_string(),
        line,
        message,
    };

    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| load_error(1, format!("missing required column `{}`", name)))
    };
    let ts_idx = position(TIMESTAMP_COLUMN)?;
    let sym_idx = position(SYMBOL_COLUMN)?;

    let numeric: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_idx && *i != sym_idx)
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut timestamps = Vec::new();
    let mut symbols = Vec::new();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); numeric.len()];

    for record in csv.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let field = |i: usize| record.get(i).unwrap_or("");

        let raw_ts = field(ts_idx);
        let ts = parse_timestamp(raw_ts)
            .ok_or_else(|| load_error(line, format!("invalid timestamp `{}`", raw_ts)))?;

        let symbol = field(sym_idx);
        if symbol.is_empty() {
            return Err(load_error(line, "empty symbol".to_string()));
        }

        for (slot, (i, name)) in values.iter_mut().zip(&numeric) {
            let raw = field(*i);
            let value = if raw.is_empty() {
                f64::NAN
            } else {
                raw.parse::<f64>().map_err(|e| {
                    load_error(line, format!("column `{}`: cannot parse `{}`: {}", name, raw, e))
                })?
            };
            slot.push(value);
        }

        timestamps.push(ts);
        symbols.push(symbol.to_string());
    }

    let columns: BTreeMap<String, Vec<f64>> = numeric
        .into_iter()
        .map(|(_, name)| name)
        .zip(values)
        .collect();

    Dataset::new(timestamps, symbols, columns)
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Write a dataset in the format [`read_dataset`] accepts
pub fn write_csv<W: Write>(dataset: &Dataset, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    let names: Vec<&str> = dataset.column_names().collect();

    let mut header = vec![TIMESTAMP_COLUMN, SYMBOL_COLUMN];
    header.extend(&names);
    csv.write_record(&header)?;

    let columns: Vec<&[f64]> = names.iter().filter_map(|n| dataset.column(n)).collect();
    for row in 0..dataset.len() {
        let mut record = vec![
            dataset.timestamps()[row].format(TIMESTAMP_OUT).to_string(),
            dataset.symbol_at(row).to_string(),
        ];
        record.extend(columns.iter().map(|c| {
            let v = c[row];
            if v.is_finite() {
                v.to_string()
            } else {
                String::new()
            }
        }));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::time::Duration;

    const SAMPLE: &str = "\
timestamp,symbol,price,volume
2024-01-02 09:30:00,AAPL,185.5,1000
2024-01-02 09:30:00,MSFT,370.1,
2024-01-02T09:31:00,AAPL,185.9,1200
2024-01-03,MSFT,371.0,900
";

    #[test]
    fn test_read_dataset() {
        let ds = read_dataset(SAMPLE.as_bytes(), "inline").unwrap();
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.symbols(), vec!["AAPL", "MSFT"]);
        assert_eq!(ds.column_names().collect::<Vec<_>>(), vec!["price", "volume"]);
        assert!(ds.column("volume").unwrap()[1].is_nan());
        assert_eq!(ds.partition_rows("MSFT"), vec![1, 3]);
    }

    #[test]
    fn test_missing_symbol_column() {
        let err = read_dataset("timestamp,price\n2024-01-02,1.0\n".as_bytes(), "inline").unwrap_err();
        match err {
            HarnessError::Load { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.contains("symbol"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_bad_value_names_line() {
        let input = "timestamp,symbol,price\n2024-01-02,A,1.0\n2024-01-03,A,abc\n";
        let err = read_dataset(input.as_bytes(), "inline").unwrap_err();
        assert!(matches!(err, HarnessError::Load { line: 3, .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_bad_timestamp() {
        let input = "timestamp,symbol,price\nyesterday,A,1.0\n";
        let err = read_dataset(input.as_bytes(), "inline").unwrap_err();
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn test_load_csv_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let monitor = ResourceMonitor::new(Duration::from_millis(10));
        let loaded = load_csv_with(file.path(), &monitor).unwrap();
        assert_eq!(loaded.dataset.len(), 4);
        assert!(loaded.elapsed_seconds >= 0.0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_csv("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, HarnessError::Io(_)));
    }

    #[test]
    fn test_write_then_read_preserves_rows() {
        let ds = read_dataset(SAMPLE.as_bytes(), "inline").unwrap();
        let mut out = Vec::new();
        write_csv(&ds, &mut out).unwrap();

        let reread = read_dataset(out.as_slice(), "written").unwrap();
        assert_eq!(reread.len(), ds.len());
        assert_eq!(reread.timestamps(), ds.timestamps());
        assert_eq!(reread.column("price"), ds.column("price"));
    }
}
