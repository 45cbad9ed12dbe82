//! Error types for the rollbench harness
//!
//! `HarnessError` is the crate-wide error. `PoolError` covers one coordinated
//! run and keeps the distinction between configuration problems, partition
//! compute failures and process-boundary serialization failures.

use std::io;

use thiserror::Error;

use crate::pool::{PartitionFailure, ResultSet};

/// Errors raised by a single Worker Pool Coordinator run
#[derive(Error, Debug)]
pub enum PoolError {
    /// Invalid input detected before any work was dispatched
    #[error("configuration error: {0}")]
    Configuration(String),

    /// One or more partitions failed under the fail-fast policy
    #[error("partition compute failed for {}", failed_keys(.failures))]
    PartitionCompute {
        failures: Vec<PartitionFailure>,
        /// Results of partitions that completed before dispatch stopped
        partial: Box<ResultSet>,
    },

    /// A work item or result could not cross a process boundary
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A worker process could not be started or supervised
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] io::Error),

    /// The thread pool or async runtime could not be built
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl PoolError {
    /// Keys named by a partition compute error, sorted
    pub fn failed_keys(&self) -> Vec<&str> {
        match self {
            PoolError::PartitionCompute { failures, .. } => {
                let mut keys: Vec<&str> = failures.iter().map(|f| f.key.as_str()).collect();
                keys.sort_unstable();
                keys
            }
            _ => Vec::new(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PoolError::Configuration(_))
    }

    pub fn is_serialization(&self) -> bool {
        matches!(self, PoolError::Serialization(_))
    }
}

fn failed_keys(failures: &[PartitionFailure]) -> String {
    let mut keys: Vec<&str> = failures.iter().map(|f| f.key.as_str()).collect();
    keys.sort_unstable();
    keys.join(", ")
}

/// The main error type for the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("resource monitor error: {0}")]
    Monitor(String),

    #[error("failed to load {path} at line {line}: {message}")]
    Load {
        path: String,
        line: u64,
        message: String,
    },

    #[error("invalid dataset: {0}")]
    Dataset(String),

    #[error("chart rendering failed: {0}")]
    Chart(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl HarnessError {
    /// Process exit code used by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Configuration(_) => 2,
            HarnessError::Pool(PoolError::Configuration(_)) => 2,
            HarnessError::Load { .. } | HarnessError::Dataset(_) => 3,
            HarnessError::Pool(PoolError::Serialization(_)) => 4,
            HarnessError::Pool(_) => 5,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
