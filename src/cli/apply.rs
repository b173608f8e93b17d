//! `mender apply`

use super::{github_client, print_json, read_json};
use crate::settings::AppConfig;
use anyhow::Result;
use clap::Args;
use mender_core::{FixRecommendation, RepoTarget};
use mender_github::PatchApplier;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Fix recommendation as JSON
    #[arg(long)]
    pub fix: PathBuf,

    /// Repository owner
    #[arg(long)]
    pub owner: String,

    /// Repository name
    #[arg(long)]
    pub repo: String,

    /// Base branch, overriding the configured one
    #[arg(long)]
    pub base: Option<String>,
}

pub async fn run(args: ApplyArgs, config: &AppConfig) -> Result<ExitCode> {
    let fix: FixRecommendation = read_json(&args.fix)?;
    let mut applier_config = config.github.applier_config();
    if let Some(base) = args.base {
        applier_config = applier_config.with_base_branch(base);
    }
    let repo = RepoTarget::new(args.owner, args.repo, applier_config.base_branch.clone());

    let applier = PatchApplier::new(github_client(&config.github)?, applier_config);
    let result = applier.apply_fix(&repo, &fix).await;
    print_json(&result)?;
    Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
