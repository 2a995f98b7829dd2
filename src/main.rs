//! bucketrun CLI - Bucketed parallel test runner.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bucketrun::config::{self, RunConfig, RunSettings, Strategy, parse_env_pair};
use bucketrun::discovery::Discovery;
use bucketrun::framework::TestUnit;
use bucketrun::framework::pytest::PytestFramework;
use bucketrun::hint::load_hints;
use bucketrun::orchestrator::{Bucket, Orchestrator};
use bucketrun::provider::{LocalLauncher, Supervisor};
use bucketrun::report::{ConsoleReporter, FileReporter, MultiReporter, print_summary};

/// Configuration file read when `--config` is not given and it exists.
const DEFAULT_CONFIG: &str = "bucketrun.toml";

#[derive(Parser)]
#[command(name = "bucketrun")]
#[command(about = "Bucketed parallel test runner with retry and flaky detection", long_about = None)]
#[command(version)]
struct Cli {
    /// Test file patterns, e.g. 'tests/**/test_*.py'
    #[arg(required = true)]
    patterns: Vec<String>,

    /// Python command used to run pytest
    #[arg(long)]
    python: Option<String>,

    /// pytest marker expression (empty string disables it)
    #[arg(short = 'm', long)]
    marker: Option<String>,

    /// Maximum number of trials for a failing bucket
    #[arg(long)]
    retry: Option<usize>,

    /// Deadline for one trial, in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Number of buckets run concurrently
    #[arg(long)]
    bucket: Option<usize>,

    /// pytest-xdist workers per bucket (0 disables xdist)
    #[arg(long)]
    thread: Option<usize>,

    /// Hint file with per-unit weights (TOML or JSON)
    #[arg(long)]
    hint: Option<PathBuf>,

    /// Append the run log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// How units are spread over buckets
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// Environment override for the runner (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Only show the bucket assignment, don't run anything
    #[arg(long)]
    collect_only: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn settings(&self) -> RunSettings {
        RunSettings {
            python: self.python.clone(),
            marker: self.marker.clone(),
            retry: self.retry,
            timeout_secs: self.timeout,
            bucket: self.bucket,
            thread: self.thread,
            env: self.env.iter().cloned().collect(),
            strategy: self.strategy,
            hint: self.hint.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so that --json output stays parseable.
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let code = run(cli).await?;
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let settings = load_settings(cli.config.as_deref())?.merge(cli.settings());
    let config = RunConfig::builder()
        .apply(&settings)
        .build()
        .context("Invalid configuration")?;

    let units = discover(&cli.patterns, settings.hint.as_deref())?;
    info!("Discovered {} test units", units.len());

    let framework = PytestFramework::from_config(&config);
    let cancel = CancellationToken::new();
    let executor = Supervisor::new(LocalLauncher::new()).with_cancellation_token(cancel.clone());

    let mut reporter = MultiReporter::new();
    if !cli.json {
        reporter = reporter.with_reporter(ConsoleReporter::new());
    }
    if let Some(path) = &settings.log_file {
        let path = expand_path(path);
        let file = FileReporter::open(&path)
            .await
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        info!("Logging run to {}", file.path().display());
        reporter = reporter.with_reporter(file);
    }

    let orchestrator = Orchestrator::new(config, executor, framework, reporter)
        .with_cancellation_token(cancel.clone());

    if cli.collect_only {
        let buckets = orchestrator.plan(&units)?;
        print_plan(&buckets, cli.json)?;
        return Ok(0);
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping running buckets");
            cancel.cancel();
        }
    });

    let result = orchestrator.run(&units).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    Ok(result.exit_code())
}

fn load_settings(path: Option<&Path>) -> Result<RunSettings> {
    let path = match path {
        Some(path) => expand_path(path),
        None if Path::new(DEFAULT_CONFIG).exists() => PathBuf::from(DEFAULT_CONFIG),
        None => return Ok(RunSettings::default()),
    };
    let file = config::load_config(&path)?;
    info!("Loaded configuration from {}", path.display());
    Ok(file.run)
}

fn discover(patterns: &[String], hint: Option<&Path>) -> Result<Vec<TestUnit>> {
    let mut discovery = Discovery::new();
    for pattern in patterns {
        discovery
            .add_pattern(pattern)
            .with_context(|| format!("Failed to add tests from `{}`", pattern))?;
    }
    let units = discovery.into_units();

    match hint {
        Some(path) => {
            let hints = load_hints(&expand_path(path)).context("Failed to load hints")?;
            info!("Applying {} hints", hints.len());
            Ok(hints.apply(units))
        }
        None => Ok(units),
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn print_plan(buckets: &[Bucket], json: bool) -> Result<()> {
    if json {
        let plan: Vec<_> = buckets
            .iter()
            .map(|bucket| {
                serde_json::json!({
                    "bucket": bucket.index(),
                    "weight": bucket.total_weight(),
                    "units": bucket.units().iter().map(TestUnit::id).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    for bucket in buckets {
        println!(
            "Bucket {} ({} units, weight {:.1}):",
            bucket.index(),
            bucket.units().len(),
            bucket.total_weight()
        );
        for unit in bucket.units() {
            println!("  {}", unit);
        }
    }
    Ok(())
}
