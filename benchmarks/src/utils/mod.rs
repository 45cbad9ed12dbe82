//! Utility modules for rollbench

use std::time::{Duration, Instant};

/// Timer utility for measuring execution time
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Statistical utilities. Each returns `None` on empty input.
pub mod stats {
    pub fn mean(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn median(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let len = sorted.len();
        if len % 2 == 0 {
            Some((sorted[len / 2 - 1] + sorted[len / 2]) / 2.0)
        } else {
            Some(sorted[len / 2])
        }
    }

    pub fn max(values: &[f64]) -> Option<f64> {
        values.iter().copied().reduce(f64::max)
    }
}

/// Format utilities
pub mod format {
    use std::time::Duration;

    pub fn duration_human(duration: Duration) -> String {
        let total_secs = duration.as_secs();
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;
        let millis = duration.subsec_millis();

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else if seconds > 0 {
            format!("{}.{:03}s", seconds, millis)
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    /// Fixed-precision number, or `n/a` when undefined
    pub fn optional(value: Option<f64>, precision: usize) -> String {
        match value {
            Some(v) => format!("{:.*}", precision, v),
            None => "n/a".to_string(),
        }
    }
}

/// Host description attached to every summary
pub mod system {
    use serde::{Deserialize, Serialize};
    use sysinfo::System;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct HostInfo {
        pub os: String,
        pub arch: String,
        pub logical_cpus: usize,
        pub physical_cpus: usize,
        pub total_memory_mb: f64,
    }

    pub fn host_info() -> HostInfo {
        let mut system = System::new();
        system.refresh_memory();

        HostInfo {
            os: System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string()),
            arch: std::env::consts::ARCH.to_string(),
            logical_cpus: num_cpus::get(),
            physical_cpus: num_cpus::get_physical(),
            total_memory_mb: system.total_memory() as f64 / 1_000_000.0,
        }
    }
}

/// Deterministic synthetic market data
pub mod market_data {
    use std::collections::BTreeMap;

    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use rand::distributions::Distribution;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use statrs::distribution::Normal;

    use crate::dataset::Dataset;
    use crate::error::{HarnessError, Result};

    #[derive(Debug, Clone)]
    pub struct MarketDataSpec {
        pub symbols: Vec<String>,
        pub rows_per_symbol: usize,
        pub seed: u64,
        /// Per-step volatility of log returns
        pub volatility: f64,
        pub step: Duration,
    }

    impl Default for MarketDataSpec {
        fn default() -> Self {
            Self {
                symbols: ["AAPL", "MSFT", "GOOG", "AMZN", "NVDA"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                rows_per_symbol: 10_000,
                seed: 42,
                volatility: 0.01,
                step: Duration::minutes(1),
            }
        }
    }

    /// Geometric random walk of `price` and a `volume` column for every
    /// symbol, rows interleaved by timestamp.
    pub fn generate(spec: &MarketDataSpec) -> Result<Dataset> {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let shocks = Normal::new(0.0, spec.volatility)
            .map_err(|e| HarnessError::Configuration(format!("invalid volatility: {}", e)))?;

        let start = start_time();
        let mut prices: Vec<f64> = spec
            .symbols
            .iter()
            .map(|_| rng.gen_range(20.0..500.0))
            .collect();

        let total = spec.rows_per_symbol * spec.symbols.len();
        let mut timestamps = Vec::with_capacity(total);
        let mut symbols = Vec::with_capacity(total);
        let mut price = Vec::with_capacity(total);
        let mut volume = Vec::with_capacity(total);

        for row in 0..spec.rows_per_symbol {
            let ts = start + spec.step * row as i32;
            for (symbol, last) in spec.symbols.iter().zip(prices.iter_mut()) {
                *last *= shocks.sample(&mut rng).exp();
                timestamps.push(ts);
                symbols.push(symbol.clone());
                price.push(*last);
                volume.push(rng.gen_range(100..10_000) as f64);
            }
        }

        let mut columns = BTreeMap::new();
        columns.insert("price".to_string(), price);
        columns.insert("volume".to_string(), volume);
        Dataset::new(timestamps, symbols, columns)
    }

    fn start_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .unwrap_or(NaiveDateTime::MIN)
    }
}
