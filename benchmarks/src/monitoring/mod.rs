//! Resource Monitor
//!
//! [`ResourceMonitor::measure`] runs a blocking operation on the calling
//! thread while a dedicated monitor thread samples CPU utilization and
//! resident memory at a fixed interval. The main path times the operation,
//! raises the stop signal once, then joins the monitor before aggregating.
//!
//! Every measurement builds its own sampler and buffers, so no baseline or
//! sample leaks from one run into the next.

mod sampler;

pub use sampler::{MonitorScope, ProcessSampler};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};
use crate::utils::stats;

const BYTES_PER_MB: f64 = 1_000_000.0;

/// One observation taken by the monitor thread
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the monitor took its baseline
    pub offset_seconds: f64,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

impl Sample {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / BYTES_PER_MB
    }
}

/// Timing and resource aggregates for one measured run.
///
/// Averages are `None` when no sample was collected; that is reported as
/// undefined rather than zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_elapsed_seconds: f64,
    pub avg_cpu_percent: Option<f64>,
    pub avg_memory_mb: Option<f64>,
    pub peak_memory_mb: Option<f64>,
    pub sample_count: usize,
}

impl RunStatistics {
    pub fn from_samples(total_elapsed_seconds: f64, samples: &[Sample]) -> Self {
        let cpu: Vec<f64> = samples.iter().map(|s| s.cpu_percent).collect();
        let memory: Vec<f64> = samples.iter().map(Sample::memory_mb).collect();

        Self {
            total_elapsed_seconds,
            avg_cpu_percent: stats::mean(&cpu),
            avg_memory_mb: stats::mean(&memory),
            peak_memory_mb: stats::max(&memory),
            sample_count: samples.len(),
        }
    }

    /// True when the monitor collected nothing
    pub fn is_degraded(&self) -> bool {
        self.sample_count == 0
    }
}

/// Result of a measured operation
#[derive(Debug)]
pub struct Measured<T> {
    pub value: T,
    pub stats: RunStatistics,
    pub samples: Vec<Sample>,
}

/// Samples CPU and memory around a blocking operation
#[derive(Debug, Clone, Copy)]
pub struct ResourceMonitor {
    interval: Duration,
    scope: MonitorScope,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

impl ResourceMonitor {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            scope: MonitorScope::default(),
        }
    }

    pub fn with_scope(mut self, scope: MonitorScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn scope(&self) -> MonitorScope {
        self.scope
    }

    /// Run `operation` while sampling, and report its wall-clock time and
    /// resource averages.
    pub fn measure<T, F>(&self, operation: F) -> Result<Measured<T>>
    where
        F: FnOnce() -> T,
    {
        if self.interval.is_zero() {
            return Err(HarnessError::Monitor(
                "sampling interval must be greater than zero".to_string(),
            ));
        }

        // Baseline refresh happens here, before the operation starts.
        let sampler = ProcessSampler::start(self.scope).map_err(HarnessError::Monitor)?;
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name("resource-monitor".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                let interval = self.interval;
                move || poll(sampler, interval, &stop)
            })
            .map_err(|e| HarnessError::Monitor(format!("failed to start monitor thread: {}", e)))?;

        let signal = StopSignal {
            flag: stop,
            monitor: handle.thread().clone(),
            fired: false,
        };

        let start = Instant::now();
        let value = operation();
        let elapsed = start.elapsed();

        signal.fire();

        let samples = handle
            .join()
            .map_err(|_| HarnessError::Monitor("monitor thread panicked".to_string()))?;

        let stats = RunStatistics::from_samples(elapsed.as_secs_f64(), &samples);
        if stats.is_degraded() {
            warn!(
                elapsed = stats.total_elapsed_seconds,
                interval_ms = self.interval.as_millis() as u64,
                "no resource samples collected; averages undefined"
            );
        } else {
            debug!(samples = stats.sample_count, "resource monitor joined");
        }

        Ok(Measured {
            value,
            stats,
            samples,
        })
    }
}

/// Single-shot stop for the monitor thread. Also fires on unwind so a
/// panicking operation does not leave the monitor polling forever.
struct StopSignal {
    flag: Arc<AtomicBool>,
    monitor: Thread,
    fired: bool,
}

impl StopSignal {
    fn fire(mut self) {
        self.raise();
    }

    fn raise(&mut self) {
        if !self.fired {
            self.fired = true;
            let was_set = self.flag.swap(true, Ordering::Release);
            debug_assert!(!was_set, "stop signal raised twice");
            self.monitor.unpark();
        }
    }
}

impl Drop for StopSignal {
    fn drop(&mut self) {
        self.raise();
    }
}

fn poll(mut sampler: ProcessSampler, interval: Duration, stop: &AtomicBool) -> Vec<Sample> {
    let mut samples = Vec::new();
    loop {
        let deadline = Instant::now() + interval;
        loop {
            if stop.load(Ordering::Acquire) {
                return samples;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
        if let Some(sample) = sampler.sample() {
            samples.push(sample);
        }
    }
}
