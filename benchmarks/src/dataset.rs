//! Columnar time-series dataset and per-partition result tables

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Columnar market data: one timestamp and one symbol per row plus any number
/// of numeric columns of the same length.
///
/// A `Dataset` is read-only once built. The thread strategy shares it through
/// an `Arc`; the process strategy serializes it into every worker job.
/// Missing cells are NaN in memory and `null` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    timestamps: Vec<NaiveDateTime>,
    symbols: Vec<String>,
    #[serde(with = "missing_cells")]
    columns: BTreeMap<String, Vec<f64>>,
}

impl Dataset {
    pub fn new(
        timestamps: Vec<NaiveDateTime>,
        symbols: Vec<String>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self> {
        if timestamps.len() != symbols.len() {
            return Err(HarnessError::Dataset(format!(
                "{} timestamps but {} symbols",
                timestamps.len(),
                symbols.len()
            )));
        }
        for (name, values) in &columns {
            if values.len() != timestamps.len() {
                return Err(HarnessError::Dataset(format!(
                    "column `{}` has {} values, expected {}",
                    name,
                    values.len(),
                    timestamps.len()
                )));
            }
        }
        Ok(Self {
            timestamps,
            symbols,
            columns,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn symbol_at(&self, row: usize) -> &str {
        &self.symbols[row]
    }

    /// Distinct symbols in order of first appearance
    pub fn symbols(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.symbols
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }

    /// Row indices belonging to `symbol`, ordered by timestamp.
    /// Ties keep file order.
    pub fn partition_rows(&self, symbol: &str) -> Vec<usize> {
        let mut rows: Vec<usize> = self
            .symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| s.as_str() == symbol)
            .map(|(i, _)| i)
            .collect();
        rows.sort_by_key(|&i| self.timestamps[i]);
        rows
    }
}

/// JSON has no NaN, so non-finite cells are written as `null` and read back as NaN
mod missing_cells {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(columns: &BTreeMap<String, Vec<f64>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let cells: BTreeMap<&str, Vec<Option<f64>>> = columns
            .iter()
            .map(|(name, values)| {
                let values = values.iter().map(|v| v.is_finite().then_some(*v)).collect();
                (name.as_str(), values)
            })
            .collect();
        cells.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<f64>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let cells = BTreeMap::<String, Vec<Option<f64>>>::deserialize(deserializer)?;
        Ok(cells
            .into_iter()
            .map(|(name, values)| {
                let values = values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
                (name, values)
            })
            .collect())
    }
}

/// One named output column. `None` marks an undefined cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Computed output for one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub key: String,
    pub timestamps: Vec<NaiveDateTime>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(key: impl Into<String>, timestamps: Vec<NaiveDateTime>) -> Self {
        Self {
            key: key.into(),
            timestamps,
            columns: Vec::new(),
        }
    }

    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.timestamps.len());
        self.columns.push(Column {
            name: name.into(),
            values,
        });
    }

    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample() -> Dataset {
        let mut columns = BTreeMap::new();
        columns.insert("price".to_string(), vec![10.0, 20.0, 11.0, 21.0, 12.0]);
        Dataset::new(
            vec![ts(1), ts(1), ts(3), ts(2), ts(2)],
            ["A", "B", "A", "B", "A"].iter().map(|s| s.to_string()).collect(),
            columns,
        )
        .unwrap()
    }

    #[test]
    fn test_symbols_in_first_appearance_order() {
        assert_eq!(sample().symbols(), vec!["A", "B"]);
    }

    #[test]
    fn test_partition_rows_sorted_by_timestamp() {
        let ds = sample();
        assert_eq!(ds.partition_rows("A"), vec![0, 4, 2]);
        assert_eq!(ds.partition_rows("B"), vec![1, 3]);
        assert!(ds.partition_rows("C").is_empty());
    }

    #[test]
    fn test_rejects_ragged_columns() {
        let mut columns = BTreeMap::new();
        columns.insert("price".to_string(), vec![1.0]);
        let err = Dataset::new(vec![ts(1), ts(2)], vec!["A".into(), "A".into()], columns);
        assert!(matches!(err, Err(HarnessError::Dataset(_))));
    }

    #[test]
    fn test_table_column_lookup() {
        let mut table = Table::new("A", vec![ts(1), ts(2)]);
        table.push_column("x", vec![Some(1.0), None]);
        assert_eq!(table.column("x"), Some(&[Some(1.0), None][..]));
        assert!(table.column("y").is_none());
        assert_eq!(table.column_names(), vec!["x"]);
    }

    #[test]
    fn test_missing_cells_survive_json() {
        let mut columns = BTreeMap::new();
        columns.insert("price".to_string(), vec![1.0, f64::NAN, 2.0]);
        let ds = Dataset::new(vec![ts(1), ts(2), ts(3)], vec!["A".into(); 3], columns).unwrap();

        let json = serde_json::to_string(&ds).unwrap();
        assert!(json.contains("[1.0,null,2.0]"));

        let back: Dataset = serde_json::from_str(&json).unwrap();
        let price = back.column("price").unwrap();
        assert_eq!(price[0], 1.0);
        assert!(price[1].is_nan());
        assert_eq!(price[2], 2.0);
    }
}
