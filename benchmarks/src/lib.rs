//! Rolling-window metrics benchmarking
//!
//! Measures how fast per-symbol rolling statistics (moving average, standard
//! deviation, returns, Sharpe ratio) can be computed across a dataset under
//! two concurrency strategies and two engine backends, while sampling CPU and
//! memory usage of each run:
//!
//! - [`engine`]: the per-partition computation and its backends
//! - [`pool`]: thread-parallel and process-parallel dispatch over partitions
//! - [`monitoring`]: resource sampling around a blocking operation
//! - [`orchestrator`]: the strategy x backend sweep and its summary
//! - [`report`]: table, JSON, CSV and SVG renderings of a summary
//! - [`loader`]: CSV input

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod loader;
pub mod monitoring;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod utils;

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub use config::Config;
pub use dataset::{Dataset, Table};
pub use engine::{Backend, MetricsEngine};
pub use error::{HarnessError, PoolError, Result};
pub use monitoring::{ResourceMonitor, RunStatistics};
pub use orchestrator::{BenchmarkOrchestrator, BenchmarkSummary, Configuration, SweepPlan};
pub use pool::{ErrorPolicy, ResultSet, Strategy, WorkerPool};

pub const LOG_FILE_PREFIX: &str = "rollbench.log";

/// Install the global tracing subscriber.
///
/// Events go to stderr so stdout stays free for reports and the worker
/// protocol. `RUST_LOG` overrides the default filter. With `log_dir`, events
/// are also written as JSON lines to a daily file; keep the returned guard
/// alive until exit so buffered lines are flushed.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_filter = if verbose { "rollbench=debug" } else { "rollbench=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()
        .map_err(|e| HarnessError::Configuration(format!("logging: {}", e)))?;

    Ok(guard)
}
