//! Rolling-window metrics engines
//!
//! An engine computes, for one partition (symbol), the rolling mean and
//! standard deviation of each requested column, its percentage returns, the
//! rolling mean and standard deviation of those returns, and the annualized
//! Sharpe ratio. Two backends produce identical columns:
//!
//! - [`RowwiseEngine`] recomputes every window from scratch
//! - [`StreamingEngine`] maintains running sums and slides them
//!
//! Engines are bound once, at configuration time, from a [`Backend`] tag.

mod rowwise;
mod streaming;

pub use rowwise::RowwiseEngine;
pub use streaming::StreamingEngine;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{Dataset, Table};
use crate::pool::WorkResult;

/// Trading days per year used to annualize the Sharpe ratio
pub const TRADING_DAYS: f64 = 252.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("column `{0}` not found in dataset")]
    MissingColumn(String),

    #[error("no rows for partition `{0}`")]
    EmptyPartition(String),

    #[error("window size must be at least 1")]
    InvalidWindow,

    #[error("no columns requested")]
    NoColumns,
}

/// Per-partition computation capability.
///
/// Implementations hold no mutable state shared across calls, so the same
/// engine can be called from many threads at once.
pub trait MetricsEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Compute the rolling metrics for `key` over `columns`.
    /// The returned elapsed time covers partition extraction and computation.
    fn compute(
        &self,
        dataset: &Dataset,
        key: &str,
        columns: &[String],
        window: usize,
    ) -> Result<WorkResult, EngineError>;

    /// The tag this engine can be rebuilt from in another process.
    /// Engines without one cannot run under the process strategy.
    fn backend(&self) -> Option<Backend> {
        None
    }
}

/// Engine implementations selectable by label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Rowwise,
    Streaming,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Rowwise, Backend::Streaming];

    /// Bind this tag to a concrete engine
    pub fn engine(self) -> Arc<dyn MetricsEngine> {
        match self {
            Backend::Rowwise => Arc::new(RowwiseEngine),
            Backend::Streaming => Arc::new(StreamingEngine),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Rowwise => "rowwise",
            Backend::Streaming => "streaming",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rowwise" => Ok(Backend::Rowwise),
            "streaming" => Ok(Backend::Streaming),
            other => Err(format!(
                "unknown backend `{}` (expected `rowwise` or `streaming`)",
                other
            )),
        }
    }
}

/// Output column names, in table order, for one input column
pub fn metric_columns(column: &str, window: usize) -> [String; 6] {
    [
        format!("{}_MA_{}", column, window),
        format!("{}_STD_{}", column, window),
        format!("{}_rets", column),
        format!("{}_rets_mean_{}", column, window),
        format!("{}_rets_std_{}", column, window),
        format!("{}_sharpe_{}", column, window),
    ]
}

/// Rolling statistics a backend must provide
pub(crate) trait RollingStats {
    fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>>;
    fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>>;
}

/// Shared driver: extract the partition, then fill the table column by column
pub(crate) fn compute_with<S: RollingStats>(
    dataset: &Dataset,
    key: &str,
    columns: &[String],
    window: usize,
) -> Result<WorkResult, EngineError> {
    let start = Instant::now();

    if window == 0 {
        return Err(EngineError::InvalidWindow);
    }
    if columns.is_empty() {
        return Err(EngineError::NoColumns);
    }

    let sources = columns
        .iter()
        .map(|name| {
            dataset
                .column(name)
                .ok_or_else(|| EngineError::MissingColumn(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let rows = dataset.partition_rows(key);
    if rows.is_empty() {
        return Err(EngineError::EmptyPartition(key.to_string()));
    }

    let timestamps: Vec<NaiveDateTime> = rows.iter().map(|&i| dataset.timestamps()[i]).collect();
    let mut table = Table::new(key, timestamps);

    let series: Vec<Vec<Option<f64>>> = sources
        .iter()
        .map(|source| {
            rows.iter()
                .map(|&i| Some(source[i]).filter(|v| v.is_finite()))
                .collect()
        })
        .collect();

    for (name, values) in columns.iter().zip(&series) {
        table.push_column(name.clone(), values.clone());
    }

    for (name, values) in columns.iter().zip(series) {
        let [ma, std, rets_name, rets_mean_name, rets_std_name, sharpe_name] =
            metric_columns(name, window);

        let rets = pct_change(&values);
        let rets_mean = S::rolling_mean(&rets, window);
        let rets_std = S::rolling_std(&rets, window);
        let sharpe = annualized_sharpe(&rets_mean, &rets_std);

        table.push_column(ma, S::rolling_mean(&values, window));
        table.push_column(std, S::rolling_std(&values, window));
        table.push_column(rets_name, rets);
        table.push_column(rets_mean_name, rets_mean);
        table.push_column(rets_std_name, rets_std);
        table.push_column(sharpe_name, sharpe);
    }

    Ok(WorkResult {
        table,
        elapsed_seconds: start.elapsed().as_secs_f64(),
    })
}

/// `x[t] / x[t-1] - 1`, undefined on the first row and after a zero
pub(crate) fn pct_change(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &value in values {
        out.push(match (prev, value) {
            (Some(p), Some(v)) if p != 0.0 => Some(v / p - 1.0),
            _ => None,
        });
        prev = value;
    }
    out
}

pub(crate) fn annualized_sharpe(mean: &[Option<f64>], std: &[Option<f64>]) -> Vec<Option<f64>> {
    mean.iter()
        .zip(std)
        .map(|(m, s)| match (m, s) {
            (Some(m), Some(s)) if *s > 0.0 => Some(m / s * TRADING_DAYS.sqrt()),
            _ => None,
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_change() {
        let out = pct_change(&[Some(100.0), Some(110.0), Some(0.0), Some(5.0), None, Some(2.0)]);
        assert_eq!(out[0], None);
        assert!((out[1].unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(out[2], Some(-1.0));
        assert_eq!(out[3], None);
        assert_eq!(out[4], None);
        assert_eq!(out[5], None);
    }

    #[test]
    fn test_sharpe_undefined_for_zero_std() {
        let out = annualized_sharpe(&[Some(0.1), Some(0.1), None], &[Some(0.0), Some(0.2), Some(0.1)]);
        assert_eq!(out[0], None);
        assert!((out[1].unwrap() - 0.5 * TRADING_DAYS.sqrt()).abs() < 1e-12);
        assert_eq!(out[2], None);
    }

    #[test]
    fn test_backend_labels() {
        assert_eq!("Rowwise".parse::<Backend>(), Ok(Backend::Rowwise));
        assert_eq!(Backend::Streaming.to_string(), "streaming");
        assert!("pandas".parse::<Backend>().is_err());
    }

    #[test]
    fn test_backend_binds_transferable_engine() {
        for backend in Backend::ALL {
            assert_eq!(backend.engine().backend(), Some(backend));
        }
    }

    #[test]
    fn test_metric_column_names() {
        let names = metric_columns("price", 20);
        assert_eq!(names[0], "price_MA_20");
        assert_eq!(names[5], "price_sharpe_20");
    }

    #[test]
    fn test_engines_agree() {
        let ds = test_support::abc_dataset();
        let cols = vec!["price".to_string()];
        for key in ["A", "B", "C"] {
            let a = RowwiseEngine.compute(&ds, key, &cols, 3).unwrap().table;
            let b = StreamingEngine.compute(&ds, key, &cols, 3).unwrap().table;
            assert_eq!(a.column_names(), b.column_names());
            for (ca, cb) in a.columns.iter().zip(&b.columns) {
                for (x, y) in ca.values.iter().zip(&cb.values) {
                    match (x, y) {
                        (Some(x), Some(y)) => assert!((x - y).abs() < 1e-9, "{}: {} vs {}", ca.name, x, y),
                        (None, None) => {}
                        _ => panic!("{}: definedness differs", ca.name),
                    }
                }
            }
        }
    }

    #[test]
    fn test_compute_errors() {
        let ds = test_support::abc_dataset();
        let cols = vec!["price".to_string()];
        assert_eq!(
            RowwiseEngine.compute(&ds, "Z", &cols, 3).unwrap_err(),
            EngineError::EmptyPartition("Z".into())
        );
        assert_eq!(
            StreamingEngine.compute(&ds, "A", &["volume".to_string()], 3).unwrap_err(),
            EngineError::MissingColumn("volume".into())
        );
        assert_eq!(
            RowwiseEngine.compute(&ds, "A", &cols, 0).unwrap_err(),
            EngineError::InvalidWindow
        );
    }
}
