//! Run reporting.
//!
//! Reporters receive plain text entries: one `Time: ...` entry when a run
//! starts, then the report text of every bucket as soon as it completes.
//! The caller stamps each entry with the time it was produced.
//!
//! | Reporter | Destination |
//! |----------|-------------|
//! | [`NullReporter`] | Nowhere |
//! | [`ConsoleReporter`] | Terminal, with styled status tags |
//! | [`FileReporter`] | Appends to a log file |
//! | [`MultiReporter`] | Every reporter it holds |
//!
//! A failing reporter never aborts a run; the orchestrator logs the error
//! and carries on.

pub mod console;
pub mod file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::framework::Status;
use crate::orchestrator::RunResult;

pub use console::ConsoleReporter;
pub use file::FileReporter;

/// Errors raised by reporters.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Writing to the destination failed.
    #[error("Failed to write report entry: {0}")]
    Io(#[from] std::io::Error),
}

/// One timestamped report entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub text: String,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            text: text.into(),
        }
    }
}

/// A sink for run progress.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Records one entry.
    async fn log(&self, entry: &LogEntry) -> Result<(), ReportError>;
}

/// A reporter that does nothing (for testing or when output is not needed).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn log(&self, _entry: &LogEntry) -> Result<(), ReportError> {
        Ok(())
    }
}

/// A reporter that combines multiple reporters.
#[derive(Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    /// Create a new multi-reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reporter to the multi-reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    /// Logs to every reporter, even after one fails; returns the first error.
    async fn log(&self, entry: &LogEntry) -> Result<(), ReportError> {
        let mut first_error = None;
        for reporter in &self.reporters {
            if let Err(err) = reporter.log(entry).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Styles a status label for the terminal.
pub fn styled_status(status: Status) -> ::console::StyledObject<&'static str> {
    let label = ::console::style(status.as_str());
    match status {
        Status::Success => label.green(),
        Status::Flaky => label.yellow(),
        Status::Failed | Status::Timeout | Status::Internal => label.red(),
    }
}

/// Prints a summary of the run to the console.
pub fn print_summary(result: &RunResult) {
    println!();
    println!("Bucket Results:");
    for bucket in &result.results {
        println!(
            "  [{}] {} ({:.1}s)",
            styled_status(bucket.status()),
            bucket.summary(),
            bucket.elapsed_secs()
        );
    }
    println!("  Duration: {:.1}s", result.duration.as_secs_f64());

    println!();
    if result.interrupted {
        println!("{}", ::console::style("Run interrupted.").red().bold());
    }
    match result.status {
        Status::Success if !result.interrupted => {
            println!("{}", ::console::style("All buckets passed!").green().bold());
        }
        Status::Flaky => {
            println!(
                "{}",
                ::console::style("All buckets passed, some after a retry.")
                    .yellow()
                    .bold()
            );
        }
        Status::Success => {}
        status => {
            println!(
                "{} {}",
                ::console::style("Run finished with").red().bold(),
                styled_status(status).bold()
            );
        }
    }
}
