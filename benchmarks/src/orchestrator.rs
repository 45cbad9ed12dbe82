//! Benchmark Orchestrator
//!
//! Runs every configured (strategy, backend) pair in sequence. Each pool run
//! is wrapped in its own resource measurement and produces exactly one
//! summary row, whether it succeeded or not.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::config::Config;
use crate::dataset::Dataset;
use crate::engine::Backend;
use crate::error::{HarnessError, Result};
use crate::monitoring::{ResourceMonitor, RunStatistics};
use crate::pool::{ErrorPolicy, Job, ResultSet, Strategy, WorkerCommand, WorkerPool};
use crate::utils::stats;
use crate::utils::system::{self, HostInfo};

/// One cell of the strategy x backend matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration {
    pub strategy: Strategy,
    pub backend: Backend,
}

impl Configuration {
    pub fn new(strategy: Strategy, backend: Backend) -> Self {
        Self { strategy, backend }
    }

    pub fn label(&self) -> String {
        self.to_string()
    }

    /// Every strategy paired with every backend, strategy-major
    pub fn matrix(strategies: &[Strategy], backends: &[Backend]) -> Vec<Configuration> {
        strategies
            .iter()
            .flat_map(|&s| backends.iter().map(move |&b| Configuration::new(s, b)))
            .collect()
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.strategy, self.backend)
    }
}

/// Everything one sweep needs besides the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub configurations: Vec<Configuration>,
    pub keys: Vec<String>,
    pub columns: Vec<String>,
    pub window: usize,
    pub workers: Option<usize>,
    pub policy: ErrorPolicy,
}

impl SweepPlan {
    /// Build a plan from configuration. Without explicit symbols every
    /// symbol in `dataset` becomes a partition.
    pub fn from_config(config: &Config, dataset: &Dataset) -> Self {
        let keys = if config.data.symbols.is_empty() {
            dataset.symbols()
        } else {
            config.data.symbols.clone()
        };

        Self {
            configurations: Configuration::matrix(&config.sweep.strategies, &config.sweep.backends),
            keys,
            columns: config.data.columns.clone(),
            window: config.sweep.window,
            workers: config.sweep.workers,
            policy: config.sweep.error_policy,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.configurations.is_empty() {
            return Err(HarnessError::Configuration(
                "no configurations to run".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for configuration in &self.configurations {
            if !seen.insert(configuration) {
                return Err(HarnessError::Configuration(format!(
                    "duplicate configuration `{}`",
                    configuration
                )));
            }
        }
        if self.keys.is_empty() {
            return Err(HarnessError::Configuration(
                "no partition keys to run".to_string(),
            ));
        }
        let mut keys = HashSet::with_capacity(self.keys.len());
        for key in &self.keys {
            if !keys.insert(key.as_str()) {
                return Err(HarnessError::Configuration(format!(
                    "duplicate partition key `{}`",
                    key
                )));
            }
        }
        if self.window == 0 {
            return Err(HarnessError::Configuration(
                "window size must be greater than 0".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(HarnessError::Configuration(
                "worker count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RowStatus {
    Completed {
        partitions: usize,
        failed_partitions: usize,
        /// Sum of per-partition engine time
        compute_seconds: f64,
        median_partition_seconds: Option<f64>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub label: String,
    pub configuration: Configuration,
    pub stats: RunStatistics,
    pub status: RowStatus,
}

impl SummaryRow {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, RowStatus::Failed { .. })
    }

    pub fn is_degraded(&self) -> bool {
        self.stats.is_degraded()
    }

    pub fn status_label(&self) -> &'static str {
        match &self.status {
            RowStatus::Completed { failed_partitions: 0, .. } => "completed",
            RowStatus::Completed { .. } => "partial",
            RowStatus::Failed { .. } => "failed",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            RowStatus::Failed { error } => Some(error),
            RowStatus::Completed { .. } => None,
        }
    }
}

/// Ordered rows, one per configuration, plus sweep context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub started_at: DateTime<Utc>,
    pub host: HostInfo,
    pub rows_in_dataset: usize,
    pub partitions: usize,
    pub window: usize,
    pub workers: Option<usize>,
    pub error_policy: ErrorPolicy,
    pub rows: Vec<SummaryRow>,
}

impl BenchmarkSummary {
    pub fn row(&self, configuration: &Configuration) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.configuration == *configuration)
    }

    pub fn failed_rows(&self) -> impl Iterator<Item = &SummaryRow> {
        self.rows.iter().filter(|r| r.is_failed())
    }

    /// Completed row with the lowest wall-clock time
    pub fn fastest(&self) -> Option<&SummaryRow> {
        self.rows
            .iter()
            .filter(|r| !r.is_failed())
            .min_by(|a, b| {
                a.stats
                    .total_elapsed_seconds
                    .total_cmp(&b.stats.total_elapsed_seconds)
            })
    }
}

/// A finished sweep: the summary plus each configuration's result set
#[derive(Debug)]
pub struct SweepReport {
    pub summary: BenchmarkSummary,
    pub results: Vec<(Configuration, ResultSet)>,
}

impl SweepReport {
    pub fn results_for(&self, configuration: &Configuration) -> Option<&ResultSet> {
        self.results
            .iter()
            .find(|(c, _)| c == configuration)
            .map(|(_, r)| r)
    }
}

/// Composes the resource monitor around the worker pool
#[derive(Debug, Clone, Default)]
pub struct BenchmarkOrchestrator {
    monitor: ResourceMonitor,
    worker_command: Option<WorkerCommand>,
}

impl BenchmarkOrchestrator {
    pub fn new(monitor: ResourceMonitor) -> Self {
        Self {
            monitor,
            worker_command: None,
        }
    }

    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    /// Run every configuration of `plan` strictly in order.
    ///
    /// `on_row` is called after each configuration finishes. Plan problems
    /// fail the sweep before anything runs; configuration failures become
    /// `Failed` rows and the sweep carries on.
    pub fn run_sweep<F>(&self, dataset: &Dataset, plan: &SweepPlan, mut on_row: F) -> Result<SweepReport>
    where
        F: FnMut(&SummaryRow),
    {
        plan.validate()?;

        let mut summary = BenchmarkSummary {
            started_at: Utc::now(),
            host: system::host_info(),
            rows_in_dataset: dataset.len(),
            partitions: plan.keys.len(),
            window: plan.window,
            workers: plan.workers,
            error_policy: plan.policy,
            rows: Vec::with_capacity(plan.configurations.len()),
        };
        let mut results = Vec::new();

        for configuration in &plan.configurations {
            let (row, result_set) = self.run_configuration(dataset, plan, *configuration);
            on_row(&row);
            summary.rows.push(row);
            if let Some(result_set) = result_set {
                results.push((*configuration, result_set));
            }
        }

        info!(
            configurations = summary.rows.len(),
            failed = summary.failed_rows().count(),
            "sweep finished"
        );
        Ok(SweepReport { summary, results })
    }

    fn run_configuration(
        &self,
        dataset: &Dataset,
        plan: &SweepPlan,
        configuration: Configuration,
    ) -> (SummaryRow, Option<ResultSet>) {
        let label = configuration.label();
        let span = info_span!("configuration", label = %label);
        let _enter = span.enter();

        let engine = configuration.backend.engine();
        let mut pool = WorkerPool::new(configuration.strategy)
            .with_policy(plan.policy)
            .with_workers(plan.workers);
        if let Some(command) = &self.worker_command {
            pool = pool.with_worker_command(command.clone());
        }

        let job = Job {
            dataset,
            keys: &plan.keys,
            columns: &plan.columns,
            window: plan.window,
        };

        info!("running configuration");
        let measured = match self.monitor.measure(|| pool.run(&job, engine.as_ref())) {
            Ok(measured) => measured,
            Err(e) => {
                warn!(error = %e, "configuration could not be measured");
                let row = SummaryRow {
                    label,
                    configuration,
                    stats: RunStatistics::from_samples(0.0, &[]),
                    status: RowStatus::Failed { error: e.to_string() },
                };
                return (row, None);
            }
        };
        let run_stats = measured.stats;

        let (status, result_set) = match measured.value {
            Ok(result_set) => {
                let partition_seconds: Vec<f64> =
                    result_set.completed().map(|(_, r)| r.elapsed_seconds).collect();
                let status = RowStatus::Completed {
                    partitions: result_set.len(),
                    failed_partitions: result_set.failed_count(),
                    compute_seconds: result_set.total_compute_seconds(),
                    median_partition_seconds: stats::median(&partition_seconds),
                };
                info!(
                    elapsed = run_stats.total_elapsed_seconds,
                    avg_cpu = ?run_stats.avg_cpu_percent,
                    avg_memory_mb = ?run_stats.avg_memory_mb,
                    failed_partitions = result_set.failed_count(),
                    "configuration completed"
                );
                (status, Some(result_set))
            }
            Err(e) => {
                warn!(elapsed = run_stats.total_elapsed_seconds, error = %e, "configuration failed");
                (RowStatus::Failed { error: e.to_string() }, None)
            }
        };

        (
            SummaryRow {
                label,
                configuration,
                stats: run_stats,
                status,
            },
            result_set,
        )
    }
}
