//! Sliding running sums

use super::{compute_with, Backend, EngineError, MetricsEngine, RollingStats};
use crate::dataset::Dataset;
use crate::pool::WorkResult;

/// Slides shifted running sums across the series: O(n) per column.
///
/// Sums are kept relative to the first defined value to limit cancellation
/// in the variance, and rebuilt from the window contents once per window
/// length so rounding error does not accumulate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingEngine;

impl MetricsEngine for StreamingEngine {
    fn name(&self) -> &str {
        "streaming"
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
        Some(Backend::Streaming)
    }
}

impl RollingStats for StreamingEngine {
    fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
        slide(values, window, |s| Some(s.shift + s.sum / window as f64))
    }

    fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
        if window < 2 {
            return vec![None; values.len()];
        }
        slide(values, window, |s| {
            let n = window as f64;
            let var = (s.sum_sq - s.sum * s.sum / n) / (n - 1.0);
            Some(var.max(0.0).sqrt())
        })
    }
}

#[derive(Debug, Default)]
struct Sums {
    shift: f64,
    sum: f64,
    sum_sq: f64,
    missing: usize,
}

impl Sums {
    fn add(&mut self, value: Option<f64>) {
        match value {
            Some(v) => {
                let d = v - self.shift;
                self.sum += d;
                self.sum_sq += d * d;
            }
            None => self.missing += 1,
        }
    }

    fn remove(&mut self, value: Option<f64>) {
        match value {
            Some(v) => {
                let d = v - self.shift;
                self.sum -= d;
                self.sum_sq -= d * d;
            }
            None => self.missing -= 1,
        }
    }

    fn rebuild(&mut self, window: &[Option<f64>]) {
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.missing = 0;
        for &v in window {
            self.add(v);
        }
    }
}

fn slide<F>(values: &[Option<f64>], window: usize, finish: F) -> Vec<Option<f64>>
where
    F: Fn(&Sums) -> Option<f64>,
{
    let mut sums = Sums {
        shift: values.iter().flatten().next().copied().unwrap_or(0.0),
        ..Sums::default()
    };

    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        sums.add(values[i]);
        if i >= window {
            sums.remove(values[i - window]);
        }
        if i + 1 < window {
            out.push(None);
            continue;
        }
        if i % window == 0 {
            sums.rebuild(&values[i + 1 - window..=i]);
        }
        out.push(if sums.missing > 0 { None } else { finish(&sums) });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_mean_matches_definition() {
        let values: Vec<Option<f64>> = [1.0, 2.0, 3.0, 4.0, 10.0].iter().map(|v| Some(*v)).collect();
        let out = StreamingEngine::rolling_mean(&values, 2);
        assert_eq!(out, vec![None, Some(1.5), Some(2.5), Some(3.5), Some(7.0)]);
    }

    #[test]
    fn test_constant_series_has_zero_std() {
        let values = vec![Some(42.0); 10];
        let out = StreamingEngine::rolling_std(&values, 4);
        assert!(out[3..].iter().all(|v| *v == Some(0.0)));
    }

    #[test]
    fn test_missing_cell_leaves_window_then_recovers() {
        let values = vec![None, Some(1.0), Some(3.0), Some(5.0)];
        let out = StreamingEngine::rolling_mean(&values, 2);
        assert_eq!(out, vec![None, None, Some(2.0), Some(4.0)]);
    }

    #[test]
    fn test_long_series_stays_accurate() {
        let values: Vec<Option<f64>> = (0..5_000)
            .map(|i| Some(1_000.0 + (i as f64 * 0.37).sin()))
            .collect();
        let window = 50;
        let out = StreamingEngine::rolling_std(&values, window);
        let last: Vec<f64> = values[values.len() - window..].iter().flatten().copied().collect();
        let mean = last.iter().sum::<f64>() / window as f64;
        let var = last.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window as f64 - 1.0);
        assert!((out.last().unwrap().unwrap() - var.sqrt()).abs() < 1e-9);
    }
}
