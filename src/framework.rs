//! Test units, result classification, and the test framework seam.
//!
//! A [`TestFramework`] knows two things about an external test runner: how
//! to build the command line for a set of units, and how to turn the raw
//! output of that command into a [`ClassifiedResult`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     TestFramework                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  produce_command(&units, threads) ──────────► Command           │
//! │                                                  │               │
//! │                                                  ▼ (Executor)    │
//! │  classify(&RawOutcome, name, threads) ──► ClassifiedResult      │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Frameworks
//!
//! | Implementation | Target | Result source |
//! |----------------|--------|---------------|
//! | [`pytest::PytestFramework`] | pytest | Final `=====` summary line of stdout |

pub mod pytest;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::{Command, RawOutcome};

/// Outputs longer than this many lines are shortened.
pub const SHORTEN_THRESHOLD: usize = 300;
/// Lines kept from the start of a shortened output.
pub const SHORTEN_HEAD: usize = 200;
/// Lines kept from the end of a shortened output.
pub const SHORTEN_TAIL: usize = 100;

/// One externally defined test unit, usually a test file.
///
/// The identifier is opaque to bucketrun and handed to the runner verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestUnit {
    id: String,
    weight: f64,
}

impl TestUnit {
    /// Creates a unit with the default weight of 1.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weight: 1.0,
        }
    }

    /// Sets the scheduling weight.
    ///
    /// Non-finite and negative weights are ignored.
    pub fn with_weight(mut self, weight: f64) -> Self {
        if weight.is_finite() && weight >= 0.0 {
            self.weight = weight;
        }
        self
    }

    /// The unit identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The scheduling weight (expected relative duration).
    pub fn weight(&self) -> f64 {
        self.weight
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Classified status of a bucket run, and of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// All tests passed.
    Success,
    /// At least one test failed on every trial.
    Failed,
    /// Failed at first, then passed on a retry.
    Flaky,
    /// Killed at the deadline.
    Timeout,
    /// The runner output could not be understood.
    Internal,
}

impl Status {
    /// Position in the aggregation precedence; higher wins.
    ///
    /// `SUCCESS < FLAKY < INTERNAL < TIMEOUT < FAILED`
    pub fn severity(self) -> u8 {
        match self {
            Status::Success => 0,
            Status::Flaky => 1,
            Status::Internal => 2,
            Status::Timeout => 3,
            Status::Failed => 4,
        }
    }

    /// Upper-case label used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
            Status::Flaky => "FLAKY",
            Status::Timeout => "TIMEOUT",
            Status::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured result of one bucket run.
///
/// Immutable once created. The retry controller derives a FLAKY copy from
/// a first-trial result rather than editing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedResult {
    status: Status,
    name: String,
    summary: String,
    output: String,
    elapsed_secs: f64,
}

impl ClassifiedResult {
    /// Creates a classified result. Called by [`TestFramework::classify`].
    pub fn new(
        status: Status,
        name: impl Into<String>,
        summary: impl Into<String>,
        output: impl Into<String>,
        elapsed_secs: f64,
    ) -> Self {
        Self {
            status,
            name: name.into(),
            summary: summary.into(),
            output: output.into(),
            elapsed_secs,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Display name of the bucket.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line summary, e.g. `tests/test_a.py (3 passed in 0.50 seconds)`.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Combined, shortened stdout and stderr.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    /// `[STATUS] summary`
    pub fn headline(&self) -> String {
        format!("[{}] {}", self.status, self.summary)
    }

    /// The text sent to reporters: the headline, followed by the output
    /// unless the run succeeded.
    pub fn report_text(&self) -> String {
        if self.status == Status::Success {
            self.headline()
        } else {
            format!("{}\n{}", self.headline(), self.output)
                .trim()
                .to_string()
        }
    }

    pub(crate) fn into_flaky(self) -> Self {
        Self {
            status: Status::Flaky,
            ..self
        }
    }
}

/// Builds runner commands and classifies their output.
pub trait TestFramework: Send + Sync {
    /// Produces the command that runs `units` with `threads` internal workers.
    fn produce_command(&self, units: &[TestUnit], threads: usize) -> Command;

    /// Classifies the raw outcome of a command built by
    /// [`produce_command`](Self::produce_command).
    fn classify(&self, outcome: &RawOutcome, name: &str, threads: usize) -> ClassifiedResult;
}

/// Trims `text` and keeps only its head and tail when it is very long.
///
/// More than [`SHORTEN_THRESHOLD`] lines become the first [`SHORTEN_HEAD`]
/// lines, a `...(N lines skipped)...` marker, and the last [`SHORTEN_TAIL`]
/// lines, where `N` is the line count minus the threshold.
pub fn shorten_output(text: &str) -> String {
    let trimmed = text.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() <= SHORTEN_THRESHOLD {
        return trimmed.to_string();
    }

    let marker = format!("...({} lines skipped)...", lines.len() - SHORTEN_THRESHOLD);
    let mut kept: Vec<&str> = Vec::with_capacity(SHORTEN_HEAD + SHORTEN_TAIL + 1);
    kept.extend_from_slice(&lines[..SHORTEN_HEAD]);
    kept.push(marker.as_str());
    kept.extend_from_slice(&lines[lines.len() - SHORTEN_TAIL..]);
    kept.join("\n")
}

/// Shortens stdout and stderr independently and joins them.
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    format!("{}\n{}", shorten_output(stdout), shorten_output(stderr))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (1..=n)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_shorten_keeps_exactly_threshold() {
        let text = numbered(300);
        assert_eq!(shorten_output(&text), text);
    }

    #[test]
    fn test_shorten_301_lines() {
        let shortened = shorten_output(&numbered(301));
        let lines: Vec<&str> = shortened.lines().collect();
        assert_eq!(lines.len(), 301);
        assert_eq!(lines[0], "line 1");
        assert_eq!(lines[199], "line 200");
        assert_eq!(lines[200], "...(1 lines skipped)...");
        assert_eq!(lines[201], "line 202");
        assert_eq!(lines[300], "line 301");
    }

    #[test]
    fn test_shorten_trims_surrounding_whitespace() {
        assert_eq!(shorten_output("\n\n  hello\n\n"), "hello");
    }

    #[test]
    fn test_combine_output_drops_empty_stderr() {
        assert_eq!(combine_output("out\n", ""), "out");
        assert_eq!(combine_output("", "err\n"), "err");
        assert_eq!(combine_output("out", "err"), "out\nerr");
    }

    #[test]
    fn test_severity_order() {
        let ordered = [
            Status::Success,
            Status::Flaky,
            Status::Internal,
            Status::Timeout,
            Status::Failed,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].severity() < pair[1].severity());
        }
    }

    #[test]
    fn test_report_text_success_is_headline_only() {
        let result = ClassifiedResult::new(Status::Success, "a", "a (1 passed)", "noise", 0.1);
        assert_eq!(result.report_text(), "[SUCCESS] a (1 passed)");
    }

    #[test]
    fn test_report_text_failure_includes_output() {
        let result = ClassifiedResult::new(Status::Failed, "a", "a (1 failed)", "trace", 0.1);
        assert_eq!(result.report_text(), "[FAILED] a (1 failed)\ntrace");
    }

    #[test]
    fn test_into_flaky_keeps_fields() {
        let result = ClassifiedResult::new(Status::Failed, "a", "a (1 failed)", "trace", 2.5);
        let flaky = result.clone().into_flaky();
        assert_eq!(flaky.status(), Status::Flaky);
        assert_eq!(flaky.summary(), result.summary());
        assert_eq!(flaky.output(), result.output());
        assert_eq!(flaky.elapsed_secs(), 2.5);
    }

    #[test]
    fn test_unit_weight_rejects_invalid() {
        assert_eq!(TestUnit::new("a").with_weight(-1.0).weight(), 1.0);
        assert_eq!(TestUnit::new("a").with_weight(f64::NAN).weight(), 1.0);
        assert_eq!(TestUnit::new("a").with_weight(4.5).weight(), 4.5);
    }

    #[test]
    fn test_status_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&Status::Timeout).unwrap(),
            "\"TIMEOUT\""
        );
    }
}
