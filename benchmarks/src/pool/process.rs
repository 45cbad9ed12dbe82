//! Process-parallel dispatch and the worker side of its protocol
//!
//! The supervisor spawns one worker process per work item, writes a JSON
//! [`WorkerJob`] to its stdin, closes stdin, and reads exactly one JSON
//! [`WorkerResponse`] from its stdout. Worker logs go to stderr.
//!
//! Exit status is 0 when the worker produced `completed` or `failed`, and
//! [`EXIT_REJECTED`] when the job could not be decoded.

use std::io::{self, Read, Write};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{Dispatched, ErrorPolicy, Job, PartitionFailure, PartitionOutcome, WorkResult, WorkerCommand};
use crate::dataset::Dataset;
use crate::engine::Backend;
use crate::error::PoolError;

/// Exit status of a worker that could not decode its job
pub const EXIT_REJECTED: i32 = 2;

const STDERR_TAIL: usize = 400;

/// Supervisor-side view of a job; borrows everything
#[derive(Serialize)]
struct WorkerRequest<'a> {
    backend: Backend,
    dataset: &'a Dataset,
    key: &'a str,
    columns: &'a [String],
    window: usize,
}

/// Worker-side view of a job; owns everything
#[derive(Debug, Deserialize)]
pub struct WorkerJob {
    pub backend: Backend,
    pub dataset: Dataset,
    pub key: String,
    pub columns: Vec<String>,
    pub window: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum WorkerResponse {
    Completed { result: WorkResult },
    Failed { message: String },
    Rejected { message: String },
}

/// Worker entry point: answer one job read from `input` on `output`.
/// Returns the exit status the worker process should use.
pub fn serve<R: Read, W: Write>(mut input: R, mut output: W) -> io::Result<i32> {
    let mut buf = Vec::new();
    input.read_to_end(&mut buf)?;

    let (response, status) = match serde_json::from_slice::<WorkerJob>(&buf) {
        Ok(job) => {
            debug!(key = %job.key, backend = %job.backend, rows = job.dataset.len(), "worker received job");
            let engine = job.backend.engine();
            match engine.compute(&job.dataset, &job.key, &job.columns, job.window) {
                Ok(result) => (WorkerResponse::Completed { result }, 0),
                Err(e) => (WorkerResponse::Failed { message: e.to_string() }, 0),
            }
        }
        Err(e) => (
            WorkerResponse::Rejected {
                message: e.to_string(),
            },
            EXIT_REJECTED,
        ),
    };

    serde_json::to_writer(&mut output, &response)?;
    output.flush()?;
    Ok(status)
}

/// [`serve`] over the process's stdin and stdout
pub fn serve_stdio() -> io::Result<i32> {
    serve(io::stdin().lock(), io::stdout().lock())
}

pub(crate) fn dispatch(
    job: &Job<'_>,
    backend: Backend,
    workers: usize,
    policy: ErrorPolicy,
    command: &WorkerCommand,
) -> Result<Dispatched, PoolError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| PoolError::Runtime(e.to_string()))?;

    runtime.block_on(supervise(job, backend, workers, policy, command))
}

async fn supervise(
    job: &Job<'_>,
    backend: Backend,
    workers: usize,
    policy: ErrorPolicy,
    command: &WorkerCommand,
) -> Result<Dispatched, PoolError> {
    let slots = Semaphore::new(workers);
    let abort = AtomicBool::new(false);

    let tasks = job.keys.iter().map(|key| {
        let slots = &slots;
        let abort = &abort;
        async move {
            let _permit = slots
                .acquire()
                .await
                .map_err(|e| PoolError::Runtime(e.to_string()))?;
            if abort.load(Ordering::Acquire) {
                return Ok((key.clone(), None));
            }

            let request = WorkerRequest {
                backend,
                dataset: job.dataset,
                key,
                columns: job.columns,
                window: job.window,
            };
            let outcome = match serde_json::to_vec(&request) {
                Ok(payload) => run_worker(command, key, payload).await,
                Err(e) => Err(PoolError::Serialization(format!(
                    "failed to encode work item for `{}`: {}",
                    key, e
                ))),
            };

            match &outcome {
                Err(_) => abort.store(true, Ordering::Release),
                Ok(PartitionOutcome::Failed(_)) if policy == ErrorPolicy::FailFast => {
                    abort.store(true, Ordering::Release)
                }
                _ => {}
            }
            outcome.map(|o| (key.clone(), Some(o)))
        }
    });

    futures::future::join_all(tasks)
        .await
        .into_iter()
        .collect()
}

async fn run_worker(
    command: &WorkerCommand,
    key: &str,
    payload: Vec<u8>,
) -> Result<PartitionOutcome, PoolError> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PoolError::Runtime("worker stdin was not captured".to_string()))?;

    let feed = async move {
        stdin.write_all(&payload).await?;
        stdin.shutdown().await
    };
    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    let output = output?;

    if let Err(e) = fed {
        debug!(key, error = %e, "worker closed stdin early");
    }

    decode(key, output.status, &output.stdout, &output.stderr)
}

fn decode(
    key: &str,
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<PartitionOutcome, PoolError> {
    match serde_json::from_slice::<WorkerResponse>(stdout) {
        Ok(WorkerResponse::Completed { result }) => {
            debug!(key, elapsed = result.elapsed_seconds, "worker completed");
            Ok(PartitionOutcome::Completed(result))
        }
        Ok(WorkerResponse::Failed { message }) => {
            warn!(key, error = %message, "worker reported failure");
            Ok(PartitionOutcome::Failed(PartitionFailure::new(key, message)))
        }
        Ok(WorkerResponse::Rejected { message }) => Err(PoolError::Serialization(format!(
            "worker rejected work item for `{}`: {}",
            key, message
        ))),
        Err(e) if status.success() => Err(PoolError::Serialization(format!(
            "undecodable worker response for `{}`: {}",
            key, e
        ))),
        Err(_) => {
            let message = format!("worker exited with {}: {}", status, stderr_tail(stderr));
            warn!(key, error = %message, "worker crashed");
            Ok(PartitionOutcome::Failed(PartitionFailure::new(key, message)))
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "no diagnostics".to_string();
    }
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::abc_dataset;

    fn job_bytes(key: &str, window: usize) -> Vec<u8> {
        let ds = abc_dataset();
        let columns = vec!["price".to_string()];
        serde_json::to_vec(&WorkerRequest {
            backend: Backend::Streaming,
            dataset: &ds,
            key,
            columns: &columns,
            window,
        })
        .unwrap()
    }

    fn respond(input: &[u8]) -> (WorkerResponse, i32) {
        let mut out = Vec::new();
        let status = serve(input, &mut out).unwrap();
        (serde_json::from_slice(&out).unwrap(), status)
    }

    #[test]
    fn test_serve_completes_job() {
        let (response, status) = respond(&job_bytes("A", 3));
        assert_eq!(status, 0);
        match response {
            WorkerResponse::Completed { result } => {
                assert_eq!(result.table.key, "A");
                assert_eq!(result.table.row_count(), 8);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_serve_reports_compute_failure() {
        let (response, status) = respond(&job_bytes("B-missing", 3));
        assert_eq!(status, 0);
        assert!(matches!(response, WorkerResponse::Failed { ref message } if message.contains("B-missing")));
    }

    #[test]
    fn test_serve_rejects_garbage() {
        let (response, status) = respond(b"{\"backend\": 7}");
        assert_eq!(status, EXIT_REJECTED);
        assert!(matches!(response, WorkerResponse::Rejected { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_decode_distinguishes_crash_from_garbage() {
        use std::os::unix::process::ExitStatusExt;

        let crashed = decode("A", ExitStatus::from_raw(1 << 8), b"", b"thread 'main' panicked").unwrap();
        assert!(crashed.failure().unwrap().message.contains("panicked"));

        let garbage = decode("A", ExitStatus::from_raw(0), b"not json", b"");
        assert!(matches!(garbage, Err(PoolError::Serialization(_))));
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let long = "x".repeat(10_000);
        assert_eq!(stderr_tail(long.as_bytes()).len(), STDERR_TAIL);
        let exact = "y".repeat(STDERR_TAIL);
        assert_eq!(stderr_tail(exact.as_bytes()), exact);
        assert_eq!(stderr_tail(b"  "), "no diagnostics");
    }
}
