//! flake-triage CLI
//!
//! Runs the full pipeline once: load, classify, retry, merge.

#![forbid(unsafe_code)]

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use flake_triage::classifier::Classifier;
use flake_triage::cli::{self, OracleKind, OutputMode};
use flake_triage::config::Config;
use flake_triage::oracle::{HeuristicOracle, OpenAiOracle, Oracle};
use flake_triage::pipeline::{PipelineContext, run_pipeline};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: cli::Cli) -> Result<()> {
    let config = Config::load_or_default(&cli.config);
    let settings = config.resolve(cli.overrides());
    tracing::info!(
        project_root = %settings.project_root.display(),
        command = %settings.command.argv().join(" "),
        max_attempts = settings.max_attempts,
        "resolved settings"
    );

    let oracle: Arc<dyn Oracle> = match cli.oracle {
        OracleKind::Openai => {
            let api_key = settings.require_api_key()?;
            Arc::new(
                OpenAiOracle::new(settings.model.clone(), api_key)?
                    .with_base_url(settings.base_url.clone()),
            )
        }
        OracleKind::Heuristic => Arc::new(HeuristicOracle::new()),
    };
    let classifier = Classifier::new(oracle)
        .with_stacktrace_budget(settings.stacktrace_budget)
        .with_concurrency(settings.concurrency);
    let policy = settings.retry_policy()?;
    let executor = settings.command_executor();

    let mut context = PipelineContext::new(&settings.project_root);
    let summary = run_pipeline(
        &mut context,
        &cli.input,
        &cli.output,
        &classifier,
        &policy,
        &executor,
    )
    .await
    .with_context(|| format!("triage of {} failed", cli.input.display()))?;

    match cli.mode {
        OutputMode::Text => print!("{}", summary.render_text()),
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }
    Ok(())
}
