//! Run configuration.
//!
//! A [`RunConfig`] is built once, validated, and then shared read-only by
//! every bucket. It can be assembled in code with [`RunConfig::builder`] or
//! from a TOML file ([`load_config`]) overlaid with command line flags.

pub mod schema;

pub use schema::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default runner command.
pub const DEFAULT_PYTHON: &str = "python3";
/// Default pytest marker expression.
pub const DEFAULT_MARKER: &str = "not slow";
/// Default maximum number of trials per bucket.
pub const DEFAULT_RETRY: usize = 2;
/// Default per-trial deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors raised while validating a run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The runner command line is empty.
    #[error("Runner command must not be empty")]
    EmptyRunner,

    /// The runner command line could not be split into words.
    #[error("Invalid runner command `{runner}`: {source}")]
    InvalidRunner {
        runner: String,
        #[source]
        source: shell_words::ParseError,
    },

    /// The timeout is zero, negative, or not a number.
    #[error("Timeout must be a positive number of seconds, got {0}")]
    InvalidTimeout(f64),

    /// The bucket count is zero.
    #[error("Bucket count must be at least 1")]
    ZeroBuckets,

    /// An environment override is not of the form `KEY=VALUE`.
    #[error("Invalid environment override `{0}`, expected KEY=VALUE")]
    InvalidEnv(String),
}

/// Validated, immutable run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    runner: Vec<String>,
    marker: String,
    retry: usize,
    timeout: Duration,
    bucket_count: usize,
    threads: usize,
    env: Vec<(String, String)>,
    strategy: Strategy,
}

impl RunConfig {
    /// Starts a builder with the default settings.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// The runner program, e.g. `python3`.
    pub fn runner_program(&self) -> &str {
        &self.runner[0]
    }

    /// Arguments placed between the runner program and `-m pytest`.
    pub fn runner_args(&self) -> &[String] {
        &self.runner[1..]
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Maximum number of trials for a failing bucket (at least one runs).
    pub fn retry(&self) -> usize {
        self.retry
    }

    /// Per-trial deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Workers requested from the runner. 0 means none.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

/// Builder for [`RunConfig`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use bucketrun::config::RunConfig;
///
/// let config = RunConfig::builder()
///     .runner("python3 -X dev")
///     .marker("")
///     .retry(3)
///     .timeout(Duration::from_secs(120))
///     .bucket_count(4)
///     .env("PYTHONHASHSEED", "0")
///     .build()?;
///
/// assert_eq!(config.runner_program(), "python3");
/// assert_eq!(config.runner_args(), ["-X", "dev"]);
/// # Ok::<(), bucketrun::config::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    runner: String,
    marker: String,
    retry: usize,
    timeout_secs: f64,
    bucket_count: usize,
    threads: usize,
    env: Vec<(String, String)>,
    strategy: Strategy,
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self {
            runner: DEFAULT_PYTHON.to_string(),
            marker: DEFAULT_MARKER.to_string(),
            retry: DEFAULT_RETRY,
            timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
            bucket_count: 1,
            threads: 0,
            env: Vec::new(),
            strategy: Strategy::default(),
        }
    }
}

impl RunConfigBuilder {
    /// Sets the runner command line. It is split like a shell would split it.
    pub fn runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = runner.into();
        self
    }

    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn retry(mut self, retry: usize) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs_f64();
        self
    }

    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn bucket_count(mut self, bucket_count: usize) -> Self {
        self.bucket_count = bucket_count;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Adds an environment override. A later value for the same key wins.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.into()));
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Applies every value set in `settings`.
    pub fn apply(mut self, settings: &RunSettings) -> Self {
        if let Some(python) = &settings.python {
            self = self.runner(python.clone());
        }
        if let Some(marker) = &settings.marker {
            self = self.marker(marker.clone());
        }
        if let Some(retry) = settings.retry {
            self = self.retry(retry);
        }
        if let Some(secs) = settings.timeout_secs {
            self = self.timeout_secs(secs);
        }
        if let Some(bucket) = settings.bucket {
            self = self.bucket_count(bucket);
        }
        if let Some(thread) = settings.thread {
            self = self.threads(thread);
        }
        for (key, value) in &settings.env {
            self = self.env(key.clone(), value.clone());
        }
        if let Some(strategy) = settings.strategy {
            self = self.strategy(strategy);
        }
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyRunner`] / [`ConfigError::InvalidRunner`]
    /// - [`ConfigError::InvalidTimeout`] if the timeout is not positive
    /// - [`ConfigError::ZeroBuckets`] if the bucket count is 0
    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let mut runner =
            shell_words::split(&self.runner).map_err(|source| ConfigError::InvalidRunner {
                runner: self.runner.clone(),
                source,
            })?;
        let Some(program) = runner.first_mut() else {
            return Err(ConfigError::EmptyRunner);
        };
        *program = shellexpand::tilde(program.as_str()).into_owned();

        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }
        let timeout = Duration::try_from_secs_f64(self.timeout_secs)
            .map_err(|_| ConfigError::InvalidTimeout(self.timeout_secs))?;

        if self.bucket_count == 0 {
            return Err(ConfigError::ZeroBuckets);
        }

        Ok(RunConfig {
            runner,
            marker: self.marker,
            retry: self.retry,
            timeout,
            bucket_count: self.bucket_count,
            threads: self.threads,
            env: self.env,
            strategy: self.strategy,
        })
    }
}

/// Parses a `KEY=VALUE` environment override.
pub fn parse_env_pair(pair: &str) -> Result<(String, String), ConfigError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ConfigError::InvalidEnv(pair.to_string())),
    }
}

/// Loads a configuration file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The file has keys this schema does not know
///
/// # Example
///
/// ```no_run
/// use bucketrun::config::load_config;
/// use std::path::Path;
///
/// let file = load_config(Path::new("bucketrun.toml"))?;
/// println!("Buckets: {:?}", file.run.bucket);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads a configuration from a TOML string.
///
/// # Example
///
/// ```
/// use bucketrun::config::load_config_str;
///
/// let file = load_config_str(r#"
///     [run]
///     bucket = 4
///     retry = 3
/// "#)?;
///
/// assert_eq!(file.run.bucket, Some(4));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
