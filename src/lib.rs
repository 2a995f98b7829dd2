//! bucketrun: a bucketed parallel test runner.
//!
//! This crate splits a test suite into buckets, runs every bucket as one
//! invocation of an external test runner (pytest by default), retries
//! failing buckets to tell flaky tests from broken ones, and folds the
//! bucket results into one verdict.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Provider**: Launches the runner, drains its output, enforces deadlines
//! - **Framework**: Builds runner commands and classifies their output
//! - **Orchestrator**: Schedules buckets, retries them, aggregates results
//! - **Discovery / Hint**: Find test units and their expected durations
//! - **Report**: Stream progress to the console and log files
//!
//! # Example
//!
//! ```no_run
//! use bucketrun::config::RunConfig;
//! use bucketrun::discovery::Discovery;
//! use bucketrun::framework::pytest::PytestFramework;
//! use bucketrun::orchestrator::Orchestrator;
//! use bucketrun::provider::{LocalLauncher, Supervisor};
//! use bucketrun::report::NullReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut discovery = Discovery::new();
//!     discovery.add_pattern("tests/**/test_*.py")?;
//!
//!     let config = RunConfig::builder().bucket_count(4).build()?;
//!     let framework = PytestFramework::from_config(&config);
//!     let executor = Supervisor::new(LocalLauncher::new());
//!     let orchestrator = Orchestrator::new(config, executor, framework, NullReporter);
//!
//!     let result = orchestrator.run(&discovery.into_units()).await?;
//!     println!("{}", result.status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod framework;
pub mod hint;
pub mod orchestrator;
pub mod provider;
pub mod report;

// Re-export commonly used types
pub use config::{RunConfig, load_config};
pub use framework::{ClassifiedResult, Status, TestFramework, TestUnit};
pub use orchestrator::{Orchestrator, RunResult};
pub use provider::{Executor, RawOutcome};
pub use report::Reporter;
