//! Deadline-enforcing supervisor for a single subprocess.
//!
//! # Lifecycle
//!
//! ```text
//!  start ──► ┌──────────────┐   drain stdout ──┐
//!            │ ChildProcess │   drain stderr ──┤
//!            └──────┬───────┘                  │
//!                   │        watcher: finished │ deadline │ cancelled
//!                   │                 ─────────┴─────┬────┘
//!                   ▼                                ▼
//!                 wait() ◄────────── kill ─────── terminate()
//!                   │
//!                   ▼
//!     join watcher + drains (bounded by a grace period)
//!                   │
//!                   ▼
//!               RawOutcome
//! ```
//!
//! Both pipes are drained for the whole life of the process so that a
//! runner writing a lot to one stream never blocks on a full pipe buffer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    ChildProcess, Command, ExecStatus, Executor, ExitState, Launcher, OutputPipe, ProviderError,
    ProviderResult, RawOutcome,
};

/// How long to keep reading output after the process has exited.
///
/// A backgrounded grandchild can inherit the pipes and keep them open
/// indefinitely; whatever it has not written by then is dropped.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// What ended the watcher task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watch {
    Finished,
    DeadlineElapsed,
    Cancelled,
}

/// Runs commands through a [`Launcher`] and enforces a deadline on each.
pub struct Supervisor<L> {
    launcher: L,
    cancel: CancellationToken,
    drain_grace: Duration,
}

impl<L: Launcher> Supervisor<L> {
    /// Creates a supervisor that never gets cancelled from outside.
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            cancel: CancellationToken::new(),
            drain_grace: DRAIN_GRACE,
        }
    }

    /// Ties in-flight processes to a run-wide cancellation token.
    ///
    /// When the token fires, running processes are killed and
    /// [`execute`](Executor::execute) returns [`ProviderError::Cancelled`].
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Overrides [`DRAIN_GRACE`].
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

#[async_trait]
impl<L: Launcher> Executor for Supervisor<L> {
    async fn execute(&self, cmd: &Command, deadline: Duration) -> ProviderResult<RawOutcome> {
        if self.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        debug!("Executing: {}", cmd.to_shell_string());
        let started = Instant::now();
        let mut child = self.launcher.start(cmd).await?;

        let stdout =
            take_stream(&mut child, <L::Child as ChildProcess>::take_stdout, "stdout").await?;
        let stderr =
            take_stream(&mut child, <L::Child as ChildProcess>::take_stderr, "stderr").await?;

        let stop_drain = CancellationToken::new();
        let stdout_task = tokio::spawn(drain(stdout, stop_drain.clone(), "stdout"));
        let stderr_task = tokio::spawn(drain(stderr, stop_drain.clone(), "stderr"));

        let finished = CancellationToken::new();
        let kill = CancellationToken::new();
        let watcher = tokio::spawn(watch(
            deadline,
            finished.clone(),
            self.cancel.clone(),
            kill.clone(),
        ));

        let exit = wait_or_kill(&mut child, &kill).await;
        let elapsed = started.elapsed();
        finished.cancel();

        let exit = match exit {
            Ok(exit) => exit,
            Err(err) => {
                stop_drain.cancel();
                watcher.abort();
                return Err(err);
            }
        };

        let watched = watcher.await?;

        let grace = self.drain_grace;
        let stopper = {
            let stop = stop_drain.clone();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                stop.cancel();
            })
        };
        let drained = tokio::try_join!(stdout_task, stderr_task);
        stopper.abort();
        let (stdout, stderr) = drained?;

        let status = match watched {
            Watch::Cancelled => return Err(ProviderError::Cancelled),
            Watch::DeadlineElapsed => ExecStatus::Timeout,
            Watch::Finished if exit.success() => ExecStatus::Success,
            Watch::Finished => ExecStatus::Failed,
        };
        debug!(
            "{} finished: {:?} (exit {:?}) in {:.2}s",
            cmd.program,
            status,
            exit.code,
            elapsed.as_secs_f64()
        );

        Ok(RawOutcome {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            elapsed,
        })
    }
}

/// Takes one pipe, killing the child if it is missing.
async fn take_stream<C: ChildProcess>(
    child: &mut C,
    take: fn(&mut C) -> Option<OutputPipe>,
    name: &'static str,
) -> ProviderResult<OutputPipe> {
    match take(child) {
        Some(pipe) => Ok(pipe),
        None => {
            if let Err(err) = child.terminate().await {
                warn!("Failed to terminate child after losing {}: {}", name, err);
            }
            let _ = child.wait().await;
            Err(ProviderError::StreamUnavailable(name))
        }
    }
}

async fn wait_or_kill<C: ChildProcess>(
    child: &mut C,
    kill: &CancellationToken,
) -> ProviderResult<ExitState> {
    tokio::select! {
        exit = child.wait() => exit,
        _ = kill.cancelled() => {
            child.terminate().await?;
            child.wait().await
        }
    }
}

async fn watch(
    deadline: Duration,
    finished: CancellationToken,
    cancel: CancellationToken,
    kill: CancellationToken,
) -> Watch {
    let outcome = tokio::select! {
        biased;
        _ = finished.cancelled() => Watch::Finished,
        _ = tokio::time::sleep(deadline) => Watch::DeadlineElapsed,
        _ = cancel.cancelled() => Watch::Cancelled,
    };
    match outcome {
        Watch::Finished => {}
        Watch::DeadlineElapsed => {
            debug!("Deadline of {:?} elapsed, killing process", deadline);
            kill.cancel();
        }
        Watch::Cancelled => {
            debug!("Run cancelled, killing process");
            kill.cancel();
        }
    }
    outcome
}

async fn drain(mut pipe: OutputPipe, stop: CancellationToken, name: &'static str) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!("Stopped draining {} with the pipe still open", name);
                break;
            }
            read = pipe.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(err) => {
                    warn!("Failed reading {} of child process: {}", name, err);
                    break;
                }
            },
        }
    }
    buf
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::provider::LocalLauncher;

    fn sh(script: &str) -> Command {
        Command::new("sh").arg("-c").arg(script)
    }

    fn supervisor() -> Supervisor<LocalLauncher> {
        Supervisor::new(LocalLauncher::new()).with_drain_grace(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_success_captures_both_streams() {
        let outcome = supervisor()
            .execute(&sh("echo out; echo err >&2"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Success);
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_not_error() {
        let outcome = supervisor()
            .execute(&sh("echo partial; exit 1"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Failed);
        assert_eq!(outcome.stdout, "partial\n");
    }

    #[tokio::test]
    async fn test_deadline_kills_and_reports_timeout() {
        let deadline = Duration::from_millis(300);
        let outcome = supervisor()
            .execute(&sh("echo started; sleep 30"), deadline)
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Timeout);
        assert_eq!(outcome.stdout, "started\n");
        assert!(outcome.elapsed >= deadline);
        assert!(outcome.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams_does_not_block() {
        let script = "i=0; while [ $i -lt 20000 ]; do \
                      echo \"line $i of stdout\"; echo \"line $i of stderr\" >&2; \
                      i=$((i+1)); done";
        let outcome = supervisor()
            .execute(&sh(script), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Success);
        assert_eq!(outcome.stdout.lines().count(), 20000);
        assert_eq!(outcome.stderr.lines().count(), 20000);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let err = supervisor()
            .execute(
                &Command::new("/nonexistent/bucketrun-missing-binary"),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn test_env_override_wins_over_inherited() {
        let cmd = sh("printf %s \"$HOME\"").env("HOME", "/bucketrun-home");
        let outcome = supervisor()
            .execute(&cmd, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "/bucketrun-home");
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let token = CancellationToken::new();
        let supervisor = supervisor().with_cancellation_token(token.clone());
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                token.cancel();
            })
        };
        let started = Instant::now();
        let err = supervisor
            .execute(&sh("sleep 30"), Duration::from_secs(60))
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, ProviderError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_launch() {
        let token = CancellationToken::new();
        token.cancel();
        let err = supervisor()
            .with_cancellation_token(token)
            .execute(&sh("echo never"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[tokio::test]
    async fn test_grandchild_holding_pipe_does_not_hang() {
        let started = Instant::now();
        let outcome = supervisor()
            .execute(&sh("sleep 30 & echo done"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Success);
        assert_eq!(outcome.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
