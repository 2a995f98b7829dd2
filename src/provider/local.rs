//! Local child process launcher.
//!
//! Runs the test runner as a child of bucketrun itself. On Unix every child
//! is placed in its own process group so that a timeout kills the runner
//! together with any workers it forked (pytest-xdist spawns several).
//!
//! # Characteristics
//!
//! | Feature | Support |
//! |---------|---------|
//! | Isolation | None (shared filesystem and network) |
//! | Environment | Inherited, with per-command overrides on top |
//! | Stdin | Closed (`/dev/null`) |
//! | Termination | Whole process group on Unix, single process elsewhere |

use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use super::{ChildProcess, Command, ExitState, Launcher, OutputPipe, ProviderError, ProviderResult};

/// Launcher that starts commands as local child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

impl LocalLauncher {
    /// Creates a new local launcher.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    type Child = LocalChild;

    async fn start(&self, cmd: &Command) -> ProviderResult<LocalChild> {
        let mut process = tokio::process::Command::new(&cmd.program);
        process.args(&cmd.args);
        for (key, value) in &cmd.env {
            process.env(key, value);
        }

        process.stdin(Stdio::null());
        process.stdout(Stdio::piped());
        process.stderr(Stdio::piped());
        process.kill_on_drop(true);

        #[cfg(unix)]
        process.process_group(0);

        let child = process.spawn().map_err(|source| ProviderError::LaunchFailed {
            program: cmd.program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!("Started {} (pid {:?})", cmd.program, pid);

        Ok(LocalChild {
            child,
            pid,
            reaped: false,
        })
    }
}

/// A running local child process.
pub struct LocalChild {
    child: tokio::process::Child,
    pid: Option<u32>,
    reaped: bool,
}

impl LocalChild {
    #[cfg(unix)]
    fn kill_group(&self) -> std::io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let Ok(pgid) = libc::pid_t::try_from(pid) else {
            return Ok(());
        };
        // SAFETY: kill(2) with a negative pid signals the process group
        // created by `process_group(0)` at spawn time.
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl ChildProcess for LocalChild {
    fn take_stdout(&mut self) -> Option<OutputPipe> {
        self.child
            .stdout
            .take()
            .map(|pipe| Box::new(pipe) as OutputPipe)
    }

    fn take_stderr(&mut self) -> Option<OutputPipe> {
        self.child
            .stderr
            .take()
            .map(|pipe| Box::new(pipe) as OutputPipe)
    }

    async fn wait(&mut self) -> ProviderResult<ExitState> {
        let status = self.child.wait().await.map_err(ProviderError::WaitFailed)?;
        self.reaped = true;
        Ok(ExitState {
            code: status.code(),
        })
    }

    async fn terminate(&mut self) -> ProviderResult<()> {
        if self.reaped {
            return Ok(());
        }

        #[cfg(unix)]
        {
            match self.kill_group() {
                Ok(()) => return Ok(()),
                Err(err) => debug!("Process group kill failed, killing child only: {}", err),
            }
        }

        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(ProviderError::TerminateFailed(err)),
        }
    }
}

impl Drop for LocalChild {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if !self.reaped {
                let _ = self.kill_group();
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_start_and_wait_reports_exit_code() {
        let cmd = Command::new("sh").arg("-c").arg("exit 3");
        let mut child = LocalLauncher::new().start(&cmd).await.unwrap();
        let exit = child.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
    }

    #[tokio::test]
    async fn test_env_overrides_are_visible() {
        let cmd = Command::new("sh")
            .arg("-c")
            .arg("printf %s \"$BUCKETRUN_PROBE\"")
            .env("BUCKETRUN_PROBE", "hello");
        let mut child = LocalLauncher::new().start(&cmd).await.unwrap();
        let mut stdout = child.take_stdout().unwrap();
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).await.unwrap();
        child.wait().await.unwrap();
        assert_eq!(buf, "hello");
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let cmd = Command::new("/nonexistent/bucketrun-missing-binary");
        let err = LocalLauncher::new().start(&cmd).await.err().unwrap();
        assert!(matches!(err, ProviderError::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn test_pipes_can_be_taken_once() {
        let cmd = Command::new("true");
        let mut child = LocalLauncher::new().start(&cmd).await.unwrap();
        assert!(child.take_stdout().is_some());
        assert!(child.take_stdout().is_none());
        assert!(child.take_stderr().is_some());
        child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_kills_running_process() {
        let cmd = Command::new("sleep").arg("30");
        let mut child = LocalLauncher::new().start(&cmd).await.unwrap();
        child.terminate().await.unwrap();
        let exit = child.wait().await.unwrap();
        assert_eq!(exit.code, None);
        // Second terminate after reaping is a no-op.
        child.terminate().await.unwrap();
    }
}
