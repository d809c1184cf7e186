//! CLI argument parsing using Clap.

use crate::config::{ConfigOverrides, DEFAULT_CONFIG_PATH};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// flake-triage - classify failed tests and retry the flaky ones
#[derive(Parser, Debug)]
#[command(name = "flake-triage")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  flake-triage                                   Triage input/test_results.json
  flake-triage --input report.json --output out.json
  flake-triage --oracle heuristic                Classify offline, no API key needed
  flake-triage --max-attempts 5 --mode json      Larger retry budget, JSON summary
")]
pub struct Cli {
    // === Files ===
    /// Test report to triage (JSON array of test results)
    #[arg(long, default_value = "input/test_results.json")]
    pub input: PathBuf,

    /// Where to write the merged report
    #[arg(long, default_value = "outputs/ai_test_analysis.json")]
    pub output: PathBuf,

    /// Config file path
    #[arg(long, env = "TRIAGE_CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Directory the retry command runs in and file paths resolve against
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    // === Oracle ===
    /// Classification backend
    #[arg(long, value_enum, default_value_t = OracleKind::Openai)]
    pub oracle: OracleKind,

    /// Model ID for the OpenAI oracle (e.g., gpt-4o-mini)
    #[arg(long, env = "TRIAGE_MODEL")]
    pub model: Option<String>,

    /// API key (overrides config file and environment variable)
    #[arg(long)]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long)]
    pub base_url: Option<String>,

    // === Retry ===
    /// Maximum re-executions per retryable test
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// Oracle calls and test re-executions in flight at once
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..256))]
    pub concurrency: Option<u64>,

    // === Output ===
    /// Summary format
    #[arg(long, value_enum, default_value_t = OutputMode::Text)]
    pub mode: OutputMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OracleKind {
    /// OpenAI Chat Completions with a forced function call
    Openai,
    /// Offline pattern matching over the failure evidence
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    Text,
    Json,
}

impl Cli {
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            project_root: self.project_root.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            max_attempts: self.max_attempts,
            concurrency: self
                .concurrency
                .and_then(|value| usize::try_from(value).ok()),
        }
    }
}
