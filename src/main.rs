//! lazygit-llm - CLI entry point.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use lazygit_llm::config::{self, AppConfig};
use lazygit_llm::git::{StagedDiff, open_repository, read_diff_from, read_staged_diff};
use lazygit_llm::retry::retry_provider_call;
use lazygit_llm::{ProviderError, ProviderRegistry};

/// Generate a commit message for the staged changes using a local AI CLI.
#[derive(Parser, Debug)]
#[command(name = "lazygit-llm")]
#[command(about = "Generate a commit message for the staged changes using a local AI CLI")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to <config dir>/lazygit-llm/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print debug logs to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Validate the config and check that the provider answers
    #[arg(long)]
    test_config: bool,

    /// List available providers and exit
    #[arg(long)]
    list_providers: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(provider_error) = e.downcast_ref::<ProviderError>() {
                eprintln!("Suggestion: {}", provider_error.suggested_action());
            }
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr: stdout carries the commit message.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lazygit_llm={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let registry = ProviderRegistry::with_defaults();

    if cli.list_providers {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()
            .context("Could not determine the config directory. Pass --config explicitly.")?,
    };
    let config = config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    debug!(
        "Using provider '{}' ({})",
        config.provider.name, config.provider.kind
    );

    let provider = registry
        .create(&config.provider)
        .context("Failed to initialize provider")?;

    if cli.test_config {
        println!("Config OK: {}", config_path.display());
        let ok = provider
            .test_connection()
            .await
            .context("Connection test failed")?;
        return if ok {
            println!("Provider '{}' responded", provider.name());
            Ok(ExitCode::SUCCESS)
        } else {
            println!(
                "Provider '{}' did not respond correctly. Run with --verbose for details.",
                provider.name()
            );
            Ok(ExitCode::FAILURE)
        };
    }

    let diff = read_diff(&config).context("Failed to read the staged diff")?;
    if diff.is_empty() {
        println!("No staged changes found");
        return Ok(ExitCode::SUCCESS);
    }
    info!(
        "Staged diff: {} files, {} bytes{}",
        diff.files_changed,
        diff.text.len(),
        if diff.truncated { " (truncated)" } else { "" }
    );

    let message = retry_provider_call(config.retry.max_attempts, || {
        provider.generate_commit_message(&diff.text, &config.prompt_template)
    })
    .await
    .context("Failed to generate commit message")?;

    println!("{message}");
    Ok(ExitCode::SUCCESS)
}

/// Read the diff LazyGit pipes in, or collect it from the index.
fn read_diff(config: &AppConfig) -> Result<StagedDiff> {
    let max_bytes = config.git.max_diff_bytes;
    let stdin = std::io::stdin();

    if !stdin.is_terminal() {
        let diff = read_diff_from(stdin.lock(), max_bytes)?;
        if !diff.is_empty() {
            debug!("Read diff from stdin");
            return Ok(diff);
        }
    }

    let cwd = std::env::current_dir().context("Failed to determine the working directory")?;
    let repo = open_repository(&cwd)?;
    Ok(read_staged_diff(&repo, max_bytes)?)
}
