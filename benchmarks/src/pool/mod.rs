//! Worker Pool Coordinator
//!
//! Runs one independent engine computation per partition key under a chosen
//! [`Strategy`] and collects the outcomes into a [`ResultSet`].
//!
//! - [`Strategy::Threads`] runs partitions on a dedicated rayon pool. Workers
//!   borrow the dataset and the engine directly. Native code holds no global
//!   execution lock, so speed-up is bounded only by available cores and by
//!   how CPU-bound the engine is.
//! - [`Strategy::Processes`] runs every partition in a freshly spawned worker
//!   process. The work item, including the full dataset, is serialized to the
//!   worker and the result is deserialized back; both costs are part of the
//!   run.
//!
//! Failures follow an explicit [`ErrorPolicy`]. Nothing is silently dropped:
//! under collect-all a failed key keeps a [`PartitionOutcome::Failed`] entry,
//! under fail-fast the run returns [`PoolError::PartitionCompute`] naming
//! every failed key alongside the partial results.

pub mod process;
mod threads;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::{Dataset, Table};
use crate::engine::MetricsEngine;
use crate::error::PoolError;

/// Concurrency strategy for one coordinated run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "thread-parallel")]
    Threads,
    #[serde(rename = "process-parallel")]
    Processes,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::Threads, Strategy::Processes];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Threads => "thread-parallel",
            Strategy::Processes => "process-parallel",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread-parallel" | "threads" | "thread" => Ok(Strategy::Threads),
            "process-parallel" | "processes" | "process" => Ok(Strategy::Processes),
            other => Err(format!(
                "unknown strategy `{}` (expected `thread-parallel` or `process-parallel`)",
                other
            )),
        }
    }
}

/// How partition failures propagate out of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Stop dispatching on the first failure and return an aggregate error
    FailFast,
    /// Run every key; failures become entries in the result set
    #[default]
    CollectAll,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorPolicy::FailFast => "fail-fast",
            ErrorPolicy::CollectAll => "collect-all",
        })
    }
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" => Ok(ErrorPolicy::FailFast),
            "collect-all" => Ok(ErrorPolicy::CollectAll),
            other => Err(format!(
                "unknown error policy `{}` (expected `fail-fast` or `collect-all`)",
                other
            )),
        }
    }
}

/// The inputs shared by every work item of one run
#[derive(Debug, Clone, Copy)]
pub struct Job<'a> {
    pub dataset: &'a Dataset,
    pub keys: &'a [String],
    pub columns: &'a [String],
    pub window: usize,
}

/// Computed table plus engine time for one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub table: Table,
    pub elapsed_seconds: f64,
}

/// Failure marker for one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFailure {
    pub key: String,
    pub message: String,
}

impl PartitionFailure {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PartitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartitionOutcome {
    Completed(WorkResult),
    Failed(PartitionFailure),
}

impl PartitionOutcome {
    pub fn result(&self) -> Option<&WorkResult> {
        match self {
            PartitionOutcome::Completed(result) => Some(result),
            PartitionOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&PartitionFailure> {
        match self {
            PartitionOutcome::Completed(_) => None,
            PartitionOutcome::Failed(failure) => Some(failure),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PartitionOutcome::Failed(_))
    }
}

/// Outcomes keyed by partition. Unordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    entries: HashMap<String, PartitionOutcome>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PartitionOutcome> {
        self.entries.get(key)
    }

    pub fn result(&self, key: &str) -> Option<&WorkResult> {
        self.get(key).and_then(PartitionOutcome::result)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in sorted order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn completed(&self) -> impl Iterator<Item = (&str, &WorkResult)> {
        self.entries
            .iter()
            .filter_map(|(k, o)| o.result().map(|r| (k.as_str(), r)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &PartitionFailure> {
        self.entries.values().filter_map(PartitionOutcome::failure)
    }

    pub fn completed_count(&self) -> usize {
        self.completed().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    /// Sum of per-partition engine time
    pub fn total_compute_seconds(&self) -> f64 {
        self.completed().map(|(_, r)| r.elapsed_seconds).sum()
    }

    pub(crate) fn insert(&mut self, key: String, outcome: PartitionOutcome) {
        self.entries.insert(key, outcome);
    }
}

/// Program and arguments that start one worker process.
/// The worker reads a job on stdin and answers on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The running executable re-invoked with the `worker` subcommand
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("worker"))
    }
}

/// Per-key result of dispatch; `None` when fail-fast skipped the key
pub(crate) type Dispatched = Vec<(String, Option<PartitionOutcome>)>;

/// Dispatches one work item per key and gathers a [`ResultSet`]
#[derive(Debug, Clone)]
pub struct WorkerPool {
    strategy: Strategy,
    policy: ErrorPolicy,
    workers: Option<usize>,
    worker_command: Option<WorkerCommand>,
}

impl WorkerPool {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            policy: ErrorPolicy::default(),
            workers: None,
            worker_command: None,
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Worker count; defaults to one worker per key
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    /// Command used to start worker processes; defaults to
    /// [`WorkerCommand::current_exe`]
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Run `engine` once per key of `job`.
    ///
    /// Configuration problems are reported before anything is dispatched.
    pub fn run(&self, job: &Job<'_>, engine: &dyn MetricsEngine) -> Result<ResultSet, PoolError> {
        validate(job, self.workers)?;
        let workers = self.workers.unwrap_or(job.keys.len()).min(job.keys.len());

        info!(
            strategy = %self.strategy,
            engine = engine.name(),
            keys = job.keys.len(),
            workers,
            policy = %self.policy,
            "dispatching partitions"
        );

        let dispatched = match self.strategy {
            Strategy::Threads => threads::dispatch(job, engine, workers, self.policy)?,
            Strategy::Processes => {
                let backend = engine.backend().ok_or_else(|| {
                    PoolError::Serialization(format!(
                        "engine `{}` has no form that can cross a process boundary",
                        engine.name()
                    ))
                })?;
                let command = match &self.worker_command {
                    Some(command) => command.clone(),
                    None => WorkerCommand::current_exe()?,
                };
                process::dispatch(job, backend, workers, self.policy, &command)?
            }
        };

        collect(dispatched, self.policy)
    }
}

fn validate(job: &Job<'_>, workers: Option<usize>) -> Result<(), PoolError> {
    if job.keys.is_empty() {
        return Err(PoolError::Configuration(
            "at least one partition key is required".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(job.keys.len());
    for key in job.keys {
        if !seen.insert(key.as_str()) {
            return Err(PoolError::Configuration(format!(
                "duplicate partition key `{}`",
                key
            )));
        }
    }
    if job.window == 0 {
        return Err(PoolError::Configuration(
            "window size must be at least 1".to_string(),
        ));
    }
    if workers == Some(0) {
        return Err(PoolError::Configuration(
            "worker count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn collect(dispatched: Dispatched, policy: ErrorPolicy) -> Result<ResultSet, PoolError> {
    let mut results = ResultSet::default();
    let mut failures = Vec::new();
    let mut skipped = 0usize;

    for (key, outcome) in dispatched {
        match outcome {
            Some(PartitionOutcome::Failed(failure)) if policy == ErrorPolicy::FailFast => {
                failures.push(failure);
            }
            Some(outcome) => results.insert(key, outcome),
            None => skipped += 1,
        }
    }

    if !failures.is_empty() {
        debug!(
            failed = failures.len(),
            completed = results.len(),
            skipped,
            "fail-fast run stopped"
        );
        return Err(PoolError::PartitionCompute {
            failures,
            partial: Box::new(results),
        });
    }

    Ok(results)
}
