//! Subprocess execution: commands, raw outcomes, and process control.
//!
//! This module defines how bucketrun launches the external test runner and
//! what it gets back. Nothing here knows about retries or about the shape of
//! the runner's output; a failing exit code is a perfectly normal outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Executor                              │
//! │  (runs one command to completion or deadline)               │
//! │                                                              │
//! │  execute(Command, deadline) ──────────► RawOutcome          │
//! └────────────────────────────────┼────────────────────────────┘
//!                                  │ implemented by Supervisor
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Launcher / ChildProcess                      │
//! │  (platform capability)                                      │
//! │                                                              │
//! │  start(Command) ───► ChildProcess                           │
//! │  wait()                                                      │
//! │  terminate()                                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Type | Module | Description |
//! |------|--------|-------------|
//! | [`Supervisor`] | [`supervisor`] | Drains output, enforces the deadline |
//! | [`LocalLauncher`] | [`local`] | Starts local child processes |
//!
//! # Error Handling
//!
//! Only failures to start a process or to get hold of its output streams
//! are errors ([`ProviderError`]). Exit codes and timeouts are reported
//! through [`ExecStatus`].

pub mod local;
pub mod supervisor;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

pub use local::LocalLauncher;
pub use supervisor::Supervisor;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur while launching or controlling a subprocess.
///
/// None of these describe a test failure. A command that starts and exits
/// with a non-zero code produces an [`ExecStatus::Failed`] outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The command line could not be turned into a program invocation.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The operating system refused to start the process.
    #[error("Failed to start `{program}`: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process started but one of its output pipes was not available.
    #[error("Failed to capture {0} of child process")]
    StreamUnavailable(&'static str),

    /// Waiting for the process to exit failed.
    #[error("Failed to wait for child process: {0}")]
    WaitFailed(#[source] std::io::Error),

    /// The process could not be killed.
    #[error("Failed to terminate child process: {0}")]
    TerminateFailed(#[source] std::io::Error),

    /// The run was cancelled while the process was in flight.
    #[error("Execution cancelled")]
    Cancelled,

    /// A drain or watcher task panicked.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A command to execute.
///
/// Built with a fluent API, like the runner invocations produced by
/// [`TestFramework`](crate::framework::TestFramework) implementations.
///
/// # Example
///
/// ```
/// use bucketrun::provider::Command;
///
/// let cmd = Command::new("python3")
///     .arg("-m")
///     .arg("pytest")
///     .args(["tests/test_a.py", "tests/test_b.py"])
///     .env("PYTHONHASHSEED", "0");
///
/// assert_eq!(cmd.program, "python3");
/// assert_eq!(cmd.args.len(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program/executable to run.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Environment overrides, applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl Command {
    /// Creates a new command with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Creates a command from a split command line (program first).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidCommand`] when `parts` is empty.
    pub fn from_parts<I, S>(parts: I) -> ProviderResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts = parts.into_iter().map(Into::into);
        let program = parts
            .next()
            .ok_or_else(|| ProviderError::InvalidCommand("empty command line".to_string()))?;
        Ok(Self::new(program).args(parts))
    }

    /// Adds a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable override.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds several environment variable overrides.
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        self.env.extend(vars.into_iter().cloned());
        self
    }

    /// Renders the command as a shell-quoted string, for logs.
    ///
    /// ```
    /// use bucketrun::provider::Command;
    /// let cmd = Command::new("python3").arg("-m").arg("not slow");
    /// assert_eq!(cmd.to_shell_string(), "python3 -m 'not slow'");
    /// ```
    pub fn to_shell_string(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

/// How a single subprocess execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecStatus {
    /// Exited with code 0 before the deadline.
    Success,
    /// Exited with a non-zero code (or was killed by a signal) before the deadline.
    Failed,
    /// Still running when the deadline elapsed, and was killed.
    Timeout,
}

/// The unprocessed result of one subprocess execution.
///
/// Produced by an [`Executor`] and consumed right away by a classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutcome {
    /// How the process ended.
    pub status: ExecStatus,

    /// Everything the process wrote to stdout.
    pub stdout: String,

    /// Everything the process wrote to stderr.
    pub stderr: String,

    /// Wall-clock time from launch to completion.
    pub elapsed: Duration,
}

impl RawOutcome {
    /// Elapsed time in fractional seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Exit information returned by [`ChildProcess::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
    /// The exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl ExitState {
    /// Returns `true` if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A readable output pipe of a child process.
pub type OutputPipe = Box<dyn AsyncRead + Send + Unpin>;

/// A started child process.
///
/// This is the platform capability the supervisor is written against:
/// a process can be waited for and forcibly terminated, and its two output
/// pipes can be taken exactly once.
#[async_trait]
pub trait ChildProcess: Send {
    /// Takes ownership of the stdout pipe. Returns `None` on the second call.
    fn take_stdout(&mut self) -> Option<OutputPipe>;

    /// Takes ownership of the stderr pipe. Returns `None` on the second call.
    fn take_stderr(&mut self) -> Option<OutputPipe>;

    /// Waits for the process to exit.
    ///
    /// Must be cancel-safe: the supervisor races it against a kill request.
    async fn wait(&mut self) -> ProviderResult<ExitState>;

    /// Forcibly terminates the process and anything it spawned.
    ///
    /// Terminating a process that already exited is not an error.
    async fn terminate(&mut self) -> ProviderResult<()>;
}

/// Starts child processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// The concrete process handle produced by this launcher.
    type Child: ChildProcess;

    /// Starts `cmd` with piped stdout and stderr.
    ///
    /// # Errors
    ///
    /// - `ProviderError::LaunchFailed` - the program could not be started
    async fn start(&self, cmd: &Command) -> ProviderResult<Self::Child>;
}

/// Runs one command to completion or deadline.
///
/// The retry controller talks to this trait only, which keeps retry and
/// classification logic independent of how processes are started.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes `cmd`, killing it once `deadline` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the process could not be started, its output
    /// could not be captured, or the run was cancelled.
    async fn execute(&self, cmd: &Command, deadline: Duration) -> ProviderResult<RawOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_splits_program_and_args() {
        let cmd = Command::from_parts(["python3", "-X", "dev"]).unwrap();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["-X", "dev"]);
    }

    #[test]
    fn test_from_parts_rejects_empty() {
        let err = Command::from_parts(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidCommand(_)));
    }

    #[test]
    fn test_envs_appends_overrides() {
        let vars = vec![("A".to_string(), "1".to_string())];
        let cmd = Command::new("env").env("B", "2").envs(&vars);
        assert_eq!(
            cmd.env,
            vec![
                ("B".to_string(), "2".to_string()),
                ("A".to_string(), "1".to_string())
            ]
        );
    }

    #[test]
    fn test_exit_state_success() {
        assert!(ExitState { code: Some(0) }.success());
        assert!(!ExitState { code: Some(1) }.success());
        assert!(!ExitState { code: None }.success());
    }
}
