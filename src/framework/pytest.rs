//! pytest support.
//!
//! Runs a bucket as a single `python -m pytest` invocation and reads the
//! verdict from the final summary line pytest prints, e.g.
//!
//! ```text
//! ========================= 3 passed, 1 skipped in 0.52 seconds =========================
//! ```
//!
//! # Classification
//!
//! | Raw status | Last stdout line | Result |
//! |------------|------------------|--------|
//! | TIMEOUT | (not read) | TIMEOUT |
//! | any | does not start with `=` | INTERNAL |
//! | any | `N deselected in X seconds` | SUCCESS |
//! | SUCCESS / FAILED | other `=` line | unchanged |
//!
//! pytest exits with code 5 when every collected test was deselected by the
//! marker expression; that bucket did nothing wrong, hence the override.

use std::sync::LazyLock;

use regex::Regex;

use super::{ClassifiedResult, Status, TestFramework, TestUnit, combine_output};
use crate::config::RunConfig;
use crate::provider::{Command, ExecStatus, RawOutcome};

static ALL_DESELECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+ deselected in \d+(\.\d+)?( seconds|s)$")
        .expect("deselected pattern is a valid regex")
});

/// Test framework for Python pytest projects.
#[derive(Debug, Clone)]
pub struct PytestFramework {
    program: String,
    prefix_args: Vec<String>,
    marker: String,
}

impl PytestFramework {
    /// Creates a framework that runs `<python> -m pytest`.
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            program: python.into(),
            prefix_args: Vec::new(),
            marker: String::new(),
        }
    }

    /// Creates a framework from the runner and marker of a run configuration.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            program: config.runner_program().to_string(),
            prefix_args: config.runner_args().to_vec(),
            marker: config.marker().to_string(),
        }
    }

    /// Sets the `-m` marker expression. Empty means no filter.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }
}

impl TestFramework for PytestFramework {
    fn produce_command(&self, units: &[TestUnit], threads: usize) -> Command {
        let mut cmd = Command::new(&self.program)
            .args(&self.prefix_args)
            .arg("-m")
            .arg("pytest");
        if !self.marker.is_empty() {
            cmd = cmd.arg("-m").arg(&self.marker);
        }
        if threads > 0 {
            cmd = cmd.arg("-n").arg(threads.to_string());
        }
        cmd.args(units.iter().map(TestUnit::id))
    }

    fn classify(&self, outcome: &RawOutcome, name: &str, threads: usize) -> ClassifiedResult {
        classify_pytest(outcome, name, threads)
    }
}

/// Classifies the raw outcome of a pytest run.
pub fn classify_pytest(outcome: &RawOutcome, name: &str, threads: usize) -> ClassifiedResult {
    let procs = if threads > 0 {
        format!(" * {} procs", threads)
    } else {
        String::new()
    };

    let (status, summary) = match outcome.status {
        ExecStatus::Timeout => (
            Status::Timeout,
            format!("{} ({:.0} seconds{})", name, outcome.elapsed_secs(), procs),
        ),
        raw => {
            let last_line = outcome.stdout.trim().lines().last().unwrap_or("");
            let (mut status, result_text) = if last_line.starts_with('=') {
                let status = match raw {
                    ExecStatus::Success => Status::Success,
                    _ => Status::Failed,
                };
                (status, last_line.trim_matches(&['=', ' '][..]))
            } else {
                (Status::Internal, "")
            };
            if ALL_DESELECTED.is_match(result_text) {
                status = Status::Success;
            }
            let summary = if result_text.is_empty() {
                name.to_string()
            } else {
                format!("{} ({}{})", name, result_text, procs)
            };
            (status, summary)
        }
    };

    ClassifiedResult::new(
        status,
        name,
        summary,
        combine_output(&outcome.stdout, &outcome.stderr),
        outcome.elapsed_secs(),
    )
}
