//! Configuration management for rollbench sweeps

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::Backend;
use crate::error::{HarnessError, Result};
use crate::monitoring::{MonitorScope, ResourceMonitor};
use crate::pool::{ErrorPolicy, Strategy};

pub const DEFAULT_CONFIG_FILE: &str = "rollbench.toml";

/// Main sweep configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataSettings,
    pub sweep: SweepSettings,
    pub monitoring: MonitoringSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// CSV input; when absent the sweep runs on generated market data
    pub path: Option<PathBuf>,
    pub columns: Vec<String>,
    /// Partitions to run; empty means every symbol in the dataset
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub window: usize,
    /// Defaults to one worker per partition
    pub workers: Option<usize>,
    pub strategies: Vec<Strategy>,
    pub backends: Vec<Backend>,
    pub error_policy: ErrorPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub sample_interval_ms: u64,
    pub scope: MonitorScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub format: OutputFormat,
    pub charts: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unknown output format `{}`", other)),
        }
    }
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            path: None,
            columns: vec!["price".to_string()],
            symbols: Vec::new(),
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            window: 1000,
            workers: None,
            strategies: Strategy::ALL.to_vec(),
            backends: Backend::ALL.to_vec(),
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            sample_interval_ms: ResourceMonitor::DEFAULT_INTERVAL.as_millis() as u64,
            scope: MonitorScope::default(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./rollbench_results"),
            format: OutputFormat::default(),
            charts: true,
        }
    }
}

impl MonitoringSettings {
    pub fn monitor(&self) -> ResourceMonitor {
        ResourceMonitor::new(Duration::from_millis(self.sample_interval_ms)).with_scope(self.scope)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            HarnessError::Configuration(format!("{}: {}", path.display(), e))
        })
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Defaults overridden by `ROLLBENCH_*` environment variables
    pub fn load_from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup; unset variables are skipped
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ROLLBENCH_DATA") {
            self.data.path = Some(PathBuf::from(path));
        }

        if let Some(window) = lookup("ROLLBENCH_WINDOW") {
            self.sweep.window = parse_var("ROLLBENCH_WINDOW", &window)?;
        }

        if let Some(workers) = lookup("ROLLBENCH_WORKERS") {
            self.sweep.workers = Some(parse_var("ROLLBENCH_WORKERS", &workers)?);
        }

        if let Some(strategies) = lookup("ROLLBENCH_STRATEGIES") {
            self.sweep.strategies = parse_list("ROLLBENCH_STRATEGIES", &strategies)?;
        }

        if let Some(backends) = lookup("ROLLBENCH_BACKENDS") {
            self.sweep.backends = parse_list("ROLLBENCH_BACKENDS", &backends)?;
        }

        if let Some(policy) = lookup("ROLLBENCH_ERROR_POLICY") {
            self.sweep.error_policy = parse_var("ROLLBENCH_ERROR_POLICY", &policy)?;
        }

        if let Some(interval) = lookup("ROLLBENCH_SAMPLE_INTERVAL_MS") {
            self.monitoring.sample_interval_ms = parse_var("ROLLBENCH_SAMPLE_INTERVAL_MS", &interval)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sweep.window == 0 {
            return Err(config_error("window size must be greater than 0"));
        }

        if self.sweep.workers == Some(0) {
            return Err(config_error("worker count must be greater than 0"));
        }

        if self.monitoring.sample_interval_ms == 0 {
            return Err(config_error("monitoring sample interval must be greater than 0"));
        }

        if self.data.columns.is_empty() {
            return Err(config_error("at least one input column is required"));
        }

        if self.sweep.strategies.is_empty() || self.sweep.backends.is_empty() {
            return Err(config_error("at least one strategy and one backend are required"));
        }

        ensure_unique("strategy", &self.sweep.strategies)?;
        ensure_unique("backend", &self.sweep.backends)?;
        ensure_unique("column", &self.data.columns)?;
        ensure_unique("symbol", &self.data.symbols)?;

        Ok(())
    }
}

fn config_error(message: &str) -> HarnessError {
    HarnessError::Configuration(message.to_string())
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| HarnessError::Configuration(format!("{}=`{}`: {}", name, raw, e)))
}

fn parse_list<T>(name: &str, raw: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| parse_var(name, item))
        .collect()
}

fn ensure_unique<T>(what: &str, items: &[T]) -> Result<()>
where
    T: std::hash::Hash + Eq + fmt::Display,
{
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item) {
            return Err(HarnessError::Configuration(format!("duplicate {} `{}`", what, item)));
        }
    }
    Ok(())
}
