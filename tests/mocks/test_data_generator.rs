use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollbench::dataset::Dataset;

/// Builds small datasets with shuffled row order
pub struct TestDataGenerator {
    config: DataGeneratorConfig,
    rng: StdRng,
}

#[derive(Clone, Debug)]
pub struct DataGeneratorConfig {
    pub seed: u64,
    pub symbols: Vec<String>,
    pub rows_per_symbol: usize,
    /// Shuffle rows so partitions are not stored in timestamp order
    pub shuffle: bool,
    /// Fraction of price cells left empty (NaN)
    pub gap_ratio: f64,
}

impl Default for DataGeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            symbols: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            rows_per_symbol: 40,
            shuffle: true,
            gap_ratio: 0.0,
        }
    }
}

impl TestDataGenerator {
    pub fn new(config: DataGeneratorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn generate(&mut self) -> Dataset {
        let base = base_time();
        let mut rows: Vec<(NaiveDateTime, String, f64, f64)> = Vec::new();

        for symbol in &self.config.symbols {
            let mut price: f64 = self.rng.gen_range(10.0..200.0);
            for step in 0..self.config.rows_per_symbol {
                price *= 1.0 + self.rng.gen_range(-0.02..0.02);
                let cell = if self.rng.gen_bool(self.config.gap_ratio) {
                    f64::NAN
                } else {
                    price
                };
                let volume = self.rng.gen_range(1.0..1_000.0);
                rows.push((base + Duration::minutes(step as i64), symbol.clone(), cell, volume));
            }
        }

        if self.config.shuffle {
            for i in (1..rows.len()).rev() {
                let j = self.rng.gen_range(0..=i);
                rows.swap(i, j);
            }
        }

        let mut timestamps = Vec::with_capacity(rows.len());
        let mut symbols = Vec::with_capacity(rows.len());
        let mut prices = Vec::with_capacity(rows.len());
        let mut volumes = Vec::with_capacity(rows.len());
        for (ts, symbol, price, volume) in rows {
            timestamps.push(ts);
            symbols.push(symbol);
            prices.push(price);
            volumes.push(volume);
        }

        let mut columns = BTreeMap::new();
        columns.insert("price".to_string(), prices);
        columns.insert("volume".to_string(), volumes);
        Dataset::new(timestamps, symbols, columns).expect("columns have equal length")
    }
}

impl Default for TestDataGenerator {
    fn default() -> Self {
        Self::new(DataGeneratorConfig::default())
    }
}

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(9, 30, 0))
        .expect("valid date")
}
