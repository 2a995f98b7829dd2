//! Retry and flakiness detection for one bucket.
//!
//! ```text
//! trial 0 ──► SUCCESS / TIMEOUT / INTERNAL ──► done
//!    │
//!    └─► FAILED ──► trial 1 ──► SUCCESS ──► FLAKY (trial 0's details)
//!                      │
//!                      └─► FAILED ──► ... until the budget is spent
//! ```
//!
//! At most `max(1, retries)` trials run, one after another. Timeouts and
//! unparsable output are never retried.

use std::time::Duration;

use tracing::{debug, info};

use super::scheduler::Bucket;
use crate::config::RunConfig;
use crate::framework::{ClassifiedResult, Status, TestFramework};
use crate::provider::{Command, Executor, ProviderResult};

/// Runs a bucket, retrying failed trials within a budget.
#[derive(Debug, Clone)]
pub struct RetryController {
    retries: usize,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl RetryController {
    /// Creates a controller performing at most `max(1, retries)` trials,
    /// each with the given deadline.
    pub fn new(retries: usize, timeout: Duration) -> Self {
        Self {
            retries,
            timeout,
            env: Vec::new(),
        }
    }

    /// Creates a controller from the retry budget, timeout and environment
    /// overrides of a run configuration.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            retries: config.retry(),
            timeout: config.timeout(),
            env: config.env().to_vec(),
        }
    }

    /// Maximum number of trials for one bucket.
    pub fn max_trials(&self) -> usize {
        self.retries.max(1)
    }

    /// Runs `bucket` until it no longer fails or the budget is spent.
    ///
    /// # Errors
    ///
    /// A launch failure on any trial ends the sequence and is returned as is.
    pub async fn run<E, F>(
        &self,
        executor: &E,
        framework: &F,
        bucket: &Bucket,
    ) -> ProviderResult<ClassifiedResult>
    where
        E: Executor + ?Sized,
        F: TestFramework + ?Sized,
    {
        let name = bucket.name();
        let cmd = framework
            .produce_command(bucket.units(), bucket.threads())
            .envs(&self.env);

        let mut result = self.trial(executor, framework, bucket, &cmd, &name, 1).await?;
        let mut trials = 1;
        while result.status() == Status::Failed && trials < self.retries {
            trials += 1;
            let retry = self
                .trial(executor, framework, bucket, &cmd, &name, trials)
                .await?;
            if retry.status() == Status::Success {
                result = result.into_flaky();
            }
        }
        Ok(result)
    }

    async fn trial<E, F>(
        &self,
        executor: &E,
        framework: &F,
        bucket: &Bucket,
        cmd: &Command,
        name: &str,
        trial: usize,
    ) -> ProviderResult<ClassifiedResult>
    where
        E: Executor + ?Sized,
        F: TestFramework + ?Sized,
    {
        debug!("{}: trial {} of {}", name, trial, self.max_trials());
        let outcome = executor.execute(cmd, self.timeout).await?;
        let classified = framework.classify(&outcome, name, bucket.threads());
        info!(
            "{}: trial {} finished with {} in {:.2}s",
            name,
            trial,
            classified.status(),
            classified.elapsed_secs()
        );
        Ok(classified)
    }
}
