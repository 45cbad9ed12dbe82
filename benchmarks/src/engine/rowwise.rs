//! Window-by-window recomputation

use statrs::statistics::Statistics;

use super::{compute_with, Backend, EngineError, MetricsEngine, RollingStats};
use crate::dataset::Dataset;
use crate::pool::WorkResult;

/// Recomputes every window from scratch: O(n * window) per column.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowwiseEngine;

impl MetricsEngine for RowwiseEngine {
    fn name(&self) -> &str {
        "rowwise"
    }

    fn compute(
        &self,
        dataset: &Dataset,
        key: &str,
        columns: &[String],
        window: usize,
    ) -> Result<WorkResult, EngineError> {
        compute_with::<Self>(dataset, key, columns, window)
    }

    fn backend(&self) -> Option<Backend> {
        Some(Backend::Rowwise)
    }
}

impl RollingStats for RowwiseEngine {
    fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
        rolling(values, window, |w| Some(w.iter().mean()))
    }

    fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
        rolling(values, window, |w| {
            let std = w.iter().std_dev();
            std.is_finite().then_some(std)
        })
    }
}

/// Apply `f` to every full window that has no undefined cell
fn rolling<F>(values: &[Option<f64>], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut buf = Vec::with_capacity(window);
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            buf.clear();
            for v in &values[i + 1 - window..=i] {
                buf.push((*v)?);
            }
            f(&buf)
        })
        .collect()
}
