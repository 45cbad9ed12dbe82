//! Engines with scripted behavior, all delegating real work to the rowwise
//! backend so their tables stay comparable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rollbench::dataset::Dataset;
use rollbench::engine::{Backend, EngineError, MetricsEngine, RowwiseEngine};
use rollbench::pool::WorkResult;

/// Fails every key in its list with an empty-partition error
pub struct FailingEngine {
    fail_on: HashSet<String>,
}

impl FailingEngine {
    pub fn new(keys: &[&str]) -> Self {
        Self {
            fail_on: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl MetricsEngine for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    fn compute(
        &self,
        dataset: &Dataset,
        key: &str,
        columns: &[String],
        window: usize,
    ) -> Result<WorkResult, EngineError> {
        if self.fail_on.contains(key) {
            return Err(EngineError::EmptyPartition(key.to_string()));
        }
        RowwiseEngine.compute(dataset, key, columns, window)
    }
}

/// Sleeps before computing, so runs last long enough to be sampled
pub struct SleepyEngine {
    delay: Duration,
}

impl SleepyEngine {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl MetricsEngine for SleepyEngine {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn compute(
        &self,
        dataset: &Dataset,
        key: &str,
        columns: &[String],
        window: usize,
    ) -> Result<WorkResult, EngineError> {
        std::thread::sleep(self.delay);
        RowwiseEngine.compute(dataset, key, columns, window)
    }
}

/// Counts calls; optionally fails one key
#[derive(Default)]
pub struct CountingEngine {
    calls: AtomicUsize,
    fail_on: Option<String>,
}

impl CountingEngine {
    pub fn failing_on(key: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(key.to_string()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MetricsEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn compute(
        &self,
        dataset: &Dataset,
        key: &str,
        columns: &[String],
        window: usize,
    ) -> Result<WorkResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.as_deref() == Some(key) {
            return Err(EngineError::EmptyPartition(key.to_string()));
        }
        RowwiseEngine.compute(dataset, key, columns, window)
    }

    fn backend(&self) -> Option<Backend> {
        Some(Backend::Rowwise)
    }
}
