//! `mender repair`

use super::{github_client, llm_provider, print_json, read_json};
use crate::settings::AppConfig;
use anyhow::Result;
use clap::Args;
use mender_core::{LocalSource, Orchestrator, RepairContext, SourceFetcher};
use mender_github::{HostingSource, PatchApplier};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Failure context as JSON
    #[arg(long)]
    pub context: PathBuf,

    /// Read sources from a local checkout instead of GitHub
    #[arg(long)]
    pub local_root: Option<PathBuf>,

    /// Commit an accepted fix to a new branch
    #[arg(long)]
    pub apply: bool,
}

pub async fn run(args: RepairArgs, config: &AppConfig) -> Result<ExitCode> {
    let mut context: RepairContext = read_json(&args.context)?;
    let provider = llm_provider(&config.llm)?;

    let source: Arc<dyn SourceFetcher> = match &args.local_root {
        Some(root) => Arc::new(LocalSource::new(root)),
        None => Arc::new(HostingSource::new(github_client(&config.github)?).with_retry(config.github.retry())),
    };

    let orchestrator = Orchestrator::new(provider, source, config.orchestrator.to_config())
        .with_agent_config(config.llm.agent_config());

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling repair");
            shutdown.cancel();
        }
    });

    info!(test_file = %context.test_file, provider = orchestrator.provider_name(), "Starting repair");
    let result = orchestrator.orchestrate(&mut context).await;

    let apply = match (&result.fix, args.apply) {
        (Some(fix), true) if result.success => {
            let applier = PatchApplier::new(github_client(&config.github)?, config.github.applier_config());
            if applier.can_apply(fix) {
                Some(applier.apply_fix(&context.repository, fix).await)
            } else {
                warn!(confidence = fix.confidence, "Fix is below the apply threshold, not committing");
                None
            }
        }
        _ => None,
    };

    let succeeded = result.success && apply.as_ref().map_or(true, |a| a.success);
    print_json(&serde_json::json!({ "repair": result, "apply": apply }))?;

    Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
