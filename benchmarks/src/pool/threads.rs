//! Thread-parallel dispatch on a dedicated rayon pool

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

use super::{Dispatched, ErrorPolicy, Job, PartitionFailure, PartitionOutcome};
use crate::engine::MetricsEngine;
use crate::error::PoolError;

pub(crate) fn dispatch(
    job: &Job<'_>,
    engine: &dyn MetricsEngine,
    workers: usize,
    policy: ErrorPolicy,
) -> Result<Dispatched, PoolError> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("partition-worker-{}", i))
        .build()
        .map_err(|e| PoolError::Runtime(e.to_string()))?;

    let abort = AtomicBool::new(false);

    let dispatched = pool.install(|| {
        job.keys
            .par_iter()
            .with_max_len(1)
            .map(|key| {
                if abort.load(Ordering::Acquire) {
                    return (key.clone(), None);
                }

                let computed = panic::catch_unwind(AssertUnwindSafe(|| {
                    engine.compute(job.dataset, key, job.columns, job.window)
                }));

                let outcome = match computed {
                    Ok(Ok(result)) => {
                        debug!(key = %key, elapsed = result.elapsed_seconds, "partition completed");
                        PartitionOutcome::Completed(result)
                    }
                    Ok(Err(e)) => {
                        warn!(key = %key, error = %e, "partition failed");
                        PartitionOutcome::Failed(PartitionFailure::new(key.as_str(), e.to_string()))
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        warn!(key = %key, panic = %message, "partition panicked");
                        PartitionOutcome::Failed(PartitionFailure::new(
                            key.as_str(),
                            format!("engine panicked: {}", message),
                        ))
                    }
                };

                if outcome.is_failed() && policy == ErrorPolicy::FailFast {
                    abort.store(true, Ordering::Release);
                }
                (key.clone(), Some(outcome))
            })
            .collect()
    });

    Ok(dispatched)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::engine::test_support::abc_dataset;
    use crate::engine::EngineError;
    use crate::pool::WorkResult;

    struct Panics;

    impl MetricsEngine for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn compute(&self, _: &Dataset, key: &str, _: &[String], _: usize) -> Result<WorkResult, EngineError> {
            panic!("boom on {}", key);
        }
    }

    #[test]
    fn test_panic_becomes_failure_marker() {
        let ds = abc_dataset();
        let keys = vec!["A".to_string()];
        let columns = vec!["price".to_string()];
        let job = Job { dataset: &ds, keys: &keys, columns: &columns, window: 2 };

        let dispatched = dispatch(&job, &Panics, 1, ErrorPolicy::CollectAll).unwrap();
        let (key, outcome) = &dispatched[0];
        assert_eq!(key, "A");
        let failure = outcome.as_ref().and_then(PartitionOutcome::failure).unwrap();
        assert!(failure.message.contains("boom on A"));
    }

    #[test]
    fn test_single_worker_fail_fast_skips_remaining() {
        struct AlwaysFails;
        impl MetricsEngine for AlwaysFails {
            fn name(&self) -> &str {
                "always-fails"
            }
            fn compute(&self, _: &Dataset, key: &str, _: &[String], _: usize) -> Result<WorkResult, EngineError> {
                Err(EngineError::EmptyPartition(key.to_string()))
            }
        }

        let ds = abc_dataset();
        let keys: Vec<String> = (0..16).map(|i| format!("K{}", i)).collect();
        let columns = vec!["price".to_string()];
        let job = Job { dataset: &ds, keys: &keys, columns: &columns, window: 2 };

        let dispatched = dispatch(&job, &AlwaysFails, 1, ErrorPolicy::FailFast).unwrap();
        let ran = dispatched.iter().filter(|(_, o)| o.is_some()).count();
        assert_eq!(dispatched.len(), 16);
        assert_eq!(ran, 1);
    }
}
