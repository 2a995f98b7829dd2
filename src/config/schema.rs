//! Configuration file schema.
//!
//! ```text
//! ConfigFile (root)
//! └── RunSettings [run]     - Runner, marker, retry, timeout, buckets
//!     └── env               - Environment overrides for the runner
//! ```
//!
//! Every field is optional. Values left out fall back to the defaults of
//! [`RunConfig`](super::RunConfig), and command line flags override values
//! from the file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root of a bucketrun configuration file.
///
/// # TOML Structure
///
/// ```toml
/// [run]
/// python = "python3 -X dev"
/// marker = "not slow and not gpu"
/// retry = 3
/// timeout_secs = 600
/// bucket = 8
/// thread = 2
/// strategy = "longest-first"
/// hint = "ci/hints.toml"
/// log_file = "~/bucketrun.log"
///
/// [run.env]
/// PYTHONHASHSEED = "0"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Run settings.
    #[serde(default)]
    pub run: RunSettings,
}

/// The `[run]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    /// Runner command line; `-m pytest` is appended to it.
    pub python: Option<String>,

    /// pytest marker expression passed with `-m`. Empty disables filtering.
    pub marker: Option<String>,

    /// Maximum number of trials for a failing bucket.
    pub retry: Option<usize>,

    /// Deadline for a single trial, in seconds.
    pub timeout_secs: Option<f64>,

    /// Number of buckets run concurrently.
    pub bucket: Option<usize>,

    /// Workers requested from pytest-xdist (`-n`). 0 disables it.
    pub thread: Option<usize>,

    /// Environment overrides for the runner.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Partitioning strategy.
    pub strategy: Option<Strategy>,

    /// Hint file with per-unit weights.
    pub hint: Option<PathBuf>,

    /// File the run log is appended to.
    pub log_file: Option<PathBuf>,
}

impl RunSettings {
    /// Overlays `other` on top of `self`; values set in `other` win.
    pub fn merge(mut self, other: RunSettings) -> Self {
        self.python = other.python.or(self.python);
        self.marker = other.marker.or(self.marker);
        self.retry = other.retry.or(self.retry);
        self.timeout_secs = other.timeout_secs.or(self.timeout_secs);
        self.bucket = other.bucket.or(self.bucket);
        self.thread = other.thread.or(self.thread);
        self.env.extend(other.env);
        self.strategy = other.strategy.or(self.strategy);
        self.hint = other.hint.or(self.hint);
        self.log_file = other.log_file.or(self.log_file);
        self
    }
}

/// How units are spread over buckets.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Heaviest unit first, into the lightest bucket.
    #[default]
    LongestFirst,
    /// Unit `i` into bucket `i % B`.
    RoundRobin,
}
