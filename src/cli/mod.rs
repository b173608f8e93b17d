//! CLI module for Mender
//!
//! - `repair`: run the pipeline on a failure context, optionally committing the fix
//! - `validate`: check a fix against a local checkout
//! - `apply`: commit a previously produced fix

use crate::settings::{AppConfig, GitHubSettings, LlmSettings};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mender_github::{GitHubClient, GitHubConfig};
use mender_llm::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

pub mod apply;
pub mod repair;
pub mod validate;

/// Repair failing end-to-end tests
#[derive(Parser, Debug)]
#[command(name = "mender")]
#[command(about = "Agentic repair for failing end-to-end tests")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the repair pipeline on a failure context
    Repair(repair::RepairArgs),
    /// Validate a fix against a local checkout
    Validate(validate::ValidateArgs),
    /// Commit a fix to a new branch
    Apply(apply::ApplyArgs),
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> Result<ExitCode> {
    match cli.command {
        Commands::Repair(args) => repair::run(args, &config).await,
        Commands::Validate(args) => validate::run(args).await,
        Commands::Apply(args) => apply::run(args, &config).await,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn llm_provider(settings: &LlmSettings) -> Result<Arc<OpenAiCompatibleProvider>> {
    let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set")?;
    let config = OpenAiCompatibleConfig::new(api_key)
        .with_base_url(&settings.base_url)
        .with_model(&settings.model)
        .with_timeout(Duration::from_secs(settings.request_timeout_secs));
    Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
}

fn github_client(settings: &GitHubSettings) -> Result<Arc<GitHubClient>> {
    let token = std::env::var("GITHUB_TOKEN").context("GITHUB_TOKEN not set")?;
    let config = GitHubConfig::new(token).with_api_base(&settings.api_base);
    Ok(Arc::new(GitHubClient::new(config)?))
}
