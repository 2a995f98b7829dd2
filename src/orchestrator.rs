//! Run orchestration.
//!
//! # Architecture
//!
//! ```text
//!  Vec<TestUnit> ──► Scheduler ──► Vec<Bucket>
//!                                     │
//!          ┌──────────────────────────┼──────────────────────────┐
//!          ▼                          ▼                          ▼
//!   bucket task 0              bucket task 1        ...   bucket task B-1
//!   RetryController            RetryController            RetryController
//!   Executor + TestFramework   Executor + TestFramework   Executor + TestFramework
//!          │                          │                          │
//!          └──────── ClassifiedResult over mpsc ─────────────────┘
//!                                     │
//!                                     ▼
//!                            aggregation task ──► Reporter
//!                                     │
//!                                     ▼
//!                                 RunResult
//! ```
//!
//! # Execution Flow
//!
//! 1. **Start**: Log `Time: <now>` to the reporter
//! 2. **Scheduling**: Split units into `min(B, units)` buckets
//! 3. **Execution**: Run every bucket concurrently, retrying failures
//! 4. **Aggregation**: Fold statuses and report each bucket as it finishes
//!
//! A bucket that cannot even launch its runner aborts the whole run: the
//! other buckets are cancelled and [`Orchestrator::run`] returns the error.
//! External cancellation abandons outstanding buckets and marks the result
//! as interrupted.
//!
//! # Example
//!
//! ```no_run
//! use bucketrun::config::RunConfig;
//! use bucketrun::framework::{TestUnit, pytest::PytestFramework};
//! use bucketrun::orchestrator::Orchestrator;
//! use bucketrun::provider::{LocalLauncher, Supervisor};
//! use bucketrun::report::ConsoleReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::builder().bucket_count(4).build()?;
//!     let framework = PytestFramework::from_config(&config);
//!     let executor = Supervisor::new(LocalLauncher::new());
//!
//!     let orchestrator = Orchestrator::new(config, executor, framework, ConsoleReporter::new());
//!     let result = orchestrator
//!         .run(&[TestUnit::new("tests/test_a.py"), TestUnit::new("tests/test_b.py")])
//!         .await?;
//!
//!     std::process::exit(result.exit_code());
//! }
//! ```

pub mod aggregate;
pub mod retry;
pub mod scheduler;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::framework::{ClassifiedResult, Status, TestFramework, TestUnit};
use crate::provider::{Executor, ProviderError};
use crate::report::{LogEntry, Reporter};

pub use aggregate::{Aggregator, RunStatus, fold_statuses};
pub use retry::RetryController;
pub use scheduler::{
    Bucket, LongestFirst, Partitioner, RoundRobin, Scheduler, SchedulerError, partitioner_for,
};

/// Results of an entire run.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | Every bucket passed |
/// | 1 | A bucket failed, timed out, or was not understood, or the run was interrupted |
/// | 2 | Every bucket passed, some only after a retry |
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Folded status of all completed buckets.
    pub status: Status,

    /// Per-bucket results, in completion order.
    pub results: Vec<ClassifiedResult>,

    /// Wall-clock duration of the run.
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,

    /// Whether the run was cancelled before every bucket finished.
    pub interrupted: bool,
}

impl RunResult {
    /// Returns `true` if every bucket passed on its first trial.
    pub fn success(&self) -> bool {
        self.status == Status::Success && !self.interrupted
    }

    /// Process exit code for this result.
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            return 0;
        }
        if self.interrupted {
            return 1;
        }
        match self.status {
            Status::Success => 0,
            Status::Flaky => 2,
            Status::Failed | Status::Timeout | Status::Internal => 1,
        }
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// A bucket whose runner could not be launched.
#[derive(Debug, thiserror::Error)]
#[error("Bucket `{bucket}` could not be run")]
pub struct BucketFailure {
    pub bucket: String,
    #[source]
    pub source: ProviderError,
}

/// Runs buckets of test units concurrently.
pub struct Orchestrator<E, F, R> {
    config: Arc<RunConfig>,
    executor: Arc<E>,
    framework: Arc<F>,
    reporter: Arc<R>,
    cancel: CancellationToken,
}

impl<E, F, R> Orchestrator<E, F, R>
where
    E: Executor + 'static,
    F: TestFramework + 'static,
    R: Reporter + 'static,
{
    /// Creates a new orchestrator with the given components.
    pub fn new(config: RunConfig, executor: E, framework: F, reporter: R) -> Self {
        Self {
            config: Arc::new(config),
            executor: Arc::new(executor),
            framework: Arc::new(framework),
            reporter: Arc::new(reporter),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` to interrupt the run from outside (e.g. on Ctrl-C).
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Forms the buckets `run` would execute, without running anything.
    pub fn plan(&self, units: &[TestUnit]) -> Result<Vec<Bucket>, SchedulerError> {
        Scheduler::new(self.config.bucket_count(), self.config.threads())
            .with_partitioner(partitioner_for(self.config.strategy()))
            .schedule(units)
    }

    /// Runs `units` and returns the aggregated result.
    ///
    /// # Errors
    ///
    /// Returns an error if a bucket's runner could not be launched. The
    /// remaining buckets are cancelled first.
    pub async fn run(&self, units: &[TestUnit]) -> anyhow::Result<RunResult> {
        let start = Instant::now();
        self.report(LogEntry::now(format!(
            "Time: {}",
            chrono::Local::now().to_rfc3339()
        )))
        .await;

        if units.is_empty() {
            warn!("No test units to run");
            return Ok(RunResult {
                status: Status::Success,
                results: Vec::new(),
                duration: start.elapsed(),
                interrupted: false,
            });
        }

        let buckets = self.plan(units).context("Failed to form buckets")?;
        info!(
            "Scheduled {} units into {} buckets",
            units.len(),
            buckets.len()
        );

        let run_token = self.cancel.child_token();
        let (tx, rx) = mpsc::channel(buckets.len());
        let aggregator = tokio::spawn(Aggregator::new().run(rx, Arc::clone(&self.reporter)));
        let retry = RetryController::from_config(&self.config);

        let mut tasks = JoinSet::new();
        for bucket in buckets {
            let executor = Arc::clone(&self.executor);
            let framework = Arc::clone(&self.framework);
            let retry = retry.clone();
            let tx = tx.clone();
            let token = run_token.clone();

            tasks.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!("Abandoning bucket {}", bucket.name());
                        return Ok(());
                    }
                    outcome = retry.run(executor.as_ref(), framework.as_ref(), &bucket) => outcome,
                };
                match outcome {
                    Ok(result) => {
                        if tx.send(result).await.is_err() {
                            warn!("Aggregation stopped before bucket {} finished", bucket.name());
                        }
                        Ok(())
                    }
                    Err(ProviderError::Cancelled) => Ok(()),
                    Err(source) => Err(BucketFailure {
                        bucket: bucket.name(),
                        source,
                    }),
                }
            });
        }
        drop(tx);

        let mut failure: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => anyhow::Error::new(err),
                Err(err) => anyhow::Error::new(err).context("Bucket task panicked"),
            };
            error!("{:#}", err);
            if failure.is_none() {
                run_token.cancel();
                failure = Some(err);
            }
        }

        let (status, results) = aggregator
            .await
            .context("Aggregation task failed")?
            .into_parts();

        if let Some(err) = failure {
            return Err(err.context("Run aborted"));
        }

        let interrupted = self.cancel.is_cancelled();
        if interrupted {
            warn!("Run interrupted after {} buckets", results.len());
        }
        info!("Run finished with {}", status);

        Ok(RunResult {
            status,
            results,
            duration: start.elapsed(),
            interrupted,
        })
    }

    async fn report(&self, entry: LogEntry) {
        if let Err(err) = self.reporter.log(&entry).await {
            warn!("Reporter failed: {}", err);
        }
    }
}
