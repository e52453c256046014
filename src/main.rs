use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use rigger::cancel::cancel_pair;
use rigger::config::JobConfig;
use rigger::control::{ControlPlane, HttpControlPlane, InMemoryControlPlane};
use rigger::env::Environment;
use rigger::job::{JobPhase, JobRunner, JobRunnerOptions};

/// Run one CI job: hooks, plugins, checkout, command, artifacts.
///
/// Everything is configured through the `BUILDKITE_*` environment seed
/// the control plane dispatches; flags below override the seed for local
/// runs and debugging.
#[derive(Parser)]
#[command(name = "rigger")]
#[command(version, about = "Build-agent job executor")]
struct Cli {
    /// Control plane base URL.
    #[arg(long, default_value = "https://agent.buildkite.com/v3")]
    endpoint: String,

    /// Restrict execution to a subset of phases (plugin, checkout,
    /// command). Environment setup and pre-exit always run.
    #[arg(long, value_delimiter = ',')]
    phases: Vec<String>,

    /// Record control-plane calls in memory instead of sending them.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rigger=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let seed = Environment::from_process();
    let config = JobConfig::from_env(&seed).context("invalid job environment")?;

    let phases = if cli.phases.is_empty() {
        None
    } else {
        let mut set = HashSet::new();
        for phase in &cli.phases {
            set.insert(phase.parse::<JobPhase>()?);
        }
        Some(set)
    };

    let control: Arc<dyn ControlPlane> = if cli.dry_run {
        Arc::new(InMemoryControlPlane::new())
    } else {
        Arc::new(HttpControlPlane::new(&cli.endpoint, &config.access_token)?)
    };

    let (cancel_src, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, cancelling job");
            cancel_src.cancel();
        }
    });

    let runner = JobRunner::new(
        config,
        control,
        JobRunnerOptions {
            phases,
            ..Default::default()
        },
    );
    let result = runner.run(seed, cancel).await?;

    tracing::info!(
        exit_code = result.exit_code,
        failed_chunks = result.failed_chunks,
        "job finished",
    );
    std::process::exit(result.exit_code);
}
