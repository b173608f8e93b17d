//! Patch applier
//!
//! Commits an accepted [`FixRecommendation`] to a fresh branch off the
//! base branch, one commit per change. Substitution uses the same anchored
//! replacement as the validator. A branch that ends up without commits is
//! always deleted before returning.

use crate::branch::branch_name;
use crate::client::{FileUpdate, HostingApi};
use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryConfig};
use chrono::Utc;
use mender_core::{replace_anchored, CodeChange, FixRecommendation, RepoTarget};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Runs created this long before the dispatch still count as ours
const CLOCK_SKEW_SECS: i64 = 10;

/// Applier configuration
#[derive(Debug, Clone)]
pub struct ApplierConfig {
    /// Branch fixes are based on
    pub base_branch: String,
    /// Prefix for fix branches
    pub branch_prefix: String,
    /// Fixes below this confidence are refused
    pub min_confidence: u8,
    /// Backoff policy for hosting calls
    pub retry: RetryConfig,
    /// Workflow dispatched after a successful apply
    pub validation_workflow: Option<String>,
    /// Polls when correlating the dispatched run
    pub poll_attempts: u32,
    /// Delay between polls
    pub poll_interval: Duration,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            branch_prefix: "fix/mender/".to_string(),
            min_confidence: 70,
            retry: RetryConfig::default(),
            validation_workflow: None,
            poll_attempts: 5,
            poll_interval: Duration::from_secs(3),
        }
    }
}

impl ApplierConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base branch
    #[must_use]
    pub fn with_base_branch(mut self, branch: impl Into<String>) -> Self {
        self.base_branch = branch.into();
        self
    }

    /// Set the branch prefix
    #[must_use]
    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    /// Set the confidence floor
    #[must_use]
    pub fn with_min_confidence(mut self, min: u8) -> Self {
        self.min_confidence = min.min(100);
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Dispatch `workflow` after each successful apply
    #[must_use]
    pub fn with_validation_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.validation_workflow = Some(workflow.into());
        self
    }

    /// Set run-correlation polling
    #[must_use]
    pub fn with_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }
}

/// Outcome of [`PatchApplier::apply_fix`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    /// At least one file was committed
    pub success: bool,
    /// Files committed, in first-modified order
    pub modified_files: Vec<String>,
    /// Indices of changes that could not be applied
    pub skipped_changes: Vec<usize>,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last commit on the fix branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    /// Fix branch, absent when it was never created or was cleaned up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    /// Correlated validation run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_run_id: Option<u64>,
    /// Status of the validation run, or `dispatched` when uncorrelated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<String>,
}

impl ApplyResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// A dispatched validation workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRun {
    /// Run id, when a matching run was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
    /// Run status
    pub status: String,
    /// Web URL of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Default)]
struct Applied {
    modified_files: Vec<String>,
    skipped: Vec<usize>,
    commit_sha: Option<String>,
}

fn commit_message(fix: &FixRecommendation, change: &CodeChange) -> String {
    let subject = [change.justification.trim(), fix.summary.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or("update failing test");
    let subject = subject.lines().next().unwrap_or(subject);
    format!(
        "fix(test): {subject}\n\nConfidence: {}%\nFile: {}",
        fix.confidence, change.file
    )
}

/// Applies fixes through a [`HostingApi`]
pub struct PatchApplier {
    api: Arc<dyn HostingApi>,
    config: ApplierConfig,
}

impl PatchApplier {
    /// Create a new applier
    #[must_use]
    pub fn new(api: Arc<dyn HostingApi>, config: ApplierConfig) -> Self {
        Self { api, config }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &ApplierConfig {
        &self.config
    }

    /// Confidence meets the floor and there is something to apply
    #[must_use]
    pub fn can_apply(&self, fix: &FixRecommendation) -> bool {
        fix.confidence >= self.config.min_confidence && !fix.proposed_changes.is_empty()
    }

    /// Commit `fix` to a new branch off the base branch
    #[instrument(skip(self, fix), fields(repo = %repo.full_name(), changes = fix.proposed_changes.len()))]
    pub async fn apply_fix(&self, repo: &RepoTarget, fix: &FixRecommendation) -> ApplyResult {
        if !self.can_apply(fix) {
            return ApplyResult::failed(format!(
                "Fix cannot be applied: confidence {}% (minimum {}%), {} change(s)",
                fix.confidence,
                self.config.min_confidence,
                fix.proposed_changes.len()
            ));
        }

        let base = &self.config.base_branch;
        let base_sha = match with_retry(&self.config.retry, || self.api.branch_head(repo, base)).await {
            Ok(sha) => sha,
            Err(e) => return ApplyResult::failed(format!("Failed to resolve {base}: {e}")),
        };

        let branch = match self.create_branch(repo, fix, &base_sha).await {
            Ok(branch) => branch,
            Err(e) => return ApplyResult::failed(format!("Failed to create branch: {e}")),
        };
        info!(%branch, base_sha = %base_sha, "Created fix branch");

        let applied = match self.commit_changes(repo, &branch, fix).await {
            Ok(applied) => applied,
            Err(e) => {
                warn!(%branch, error = %e, "Apply failed, removing branch");
                self.cleanup(repo, &branch).await;
                return ApplyResult::failed(format!("Failed to apply fix: {e}"));
            }
        };

        if applied.modified_files.is_empty() {
            warn!(%branch, skipped = applied.skipped.len(), "No change could be applied, removing branch");
            self.cleanup(repo, &branch).await;
            return ApplyResult {
                skipped_changes: applied.skipped,
                ..ApplyResult::failed("No changes could be applied")
            };
        }

        info!(
            %branch,
            files = applied.modified_files.len(),
            skipped = applied.skipped.len(),
            "Fix applied"
        );
        let mut result = ApplyResult {
            success: true,
            modified_files: applied.modified_files,
            skipped_changes: applied.skipped,
            error: None,
            commit_sha: applied.commit_sha,
            branch_name: Some(branch.clone()),
            validation_run_id: None,
            validation_status: None,
        };

        if let Some(workflow) = &self.config.validation_workflow {
            match self.trigger_validation(repo, workflow, &branch).await {
                Ok(run) => {
                    result.validation_run_id = run.run_id;
                    result.validation_status = Some(run.status);
                }
                Err(e) => warn!(%workflow, error = %e, "Validation trigger failed"),
            }
        }
        result
    }

    async fn create_branch(&self, repo: &RepoTarget, fix: &FixRecommendation, sha: &str) -> Result<String> {
        let file = fix
            .proposed_changes
            .first()
            .map_or("fix", |c| c.file.as_str());
        let now = Utc::now();
        let retry = &self.config.retry;

        let name = branch_name(&self.config.branch_prefix, file, now, false);
        match with_retry(retry, || self.api.create_branch(repo, &name, sha)).await {
            Ok(()) => Ok(name),
            Err(Error::AlreadyExists(_)) => {
                let unique = branch_name(&self.config.branch_prefix, file, now, true);
                debug!(taken = %name, retry = %unique, "Branch name taken, retrying with suffix");
                with_retry(retry, || self.api.create_branch(repo, &unique, sha)).await?;
                Ok(unique)
            }
            Err(e) => Err(e),
        }
    }

    async fn commit_changes(&self, repo: &RepoTarget, branch: &str, fix: &FixRecommendation) -> Result<Applied> {
        let retry = &self.config.retry;
        let mut applied = Applied::default();

        for (index, change) in fix.proposed_changes.iter().enumerate() {
            let file = match with_retry(retry, || self.api.get_file(repo, &change.file, branch)).await {
                Ok(file) => file,
                Err(Error::NotFound(_)) => {
                    warn!(index, file = %change.file, "File not found on branch, skipping change");
                    applied.skipped.push(index);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let patched = replace_anchored(&file.content, &change.old_code, &change.new_code, change.line);
            let Some(patched) = patched.filter(|p| *p != file.content) else {
                warn!(index, file = %change.file, line = change.line, "oldCode not found, skipping change");
                applied.skipped.push(index);
                continue;
            };

            let update = FileUpdate {
                path: change.file.clone(),
                branch: branch.to_string(),
                content: patched,
                sha: file.sha,
                message: commit_message(fix, change),
            };
            let sha = with_retry(retry, || self.api.update_file(repo, &update)).await?;
            debug!(index, file = %change.file, commit = %sha, "Committed change");

            if !applied.modified_files.contains(&change.file) {
                applied.modified_files.push(change.file.clone());
            }
            applied.commit_sha = Some(sha);
        }
        Ok(applied)
    }

    /// Best-effort branch deletion; failures are only logged
    async fn cleanup(&self, repo: &RepoTarget, branch: &str) {
        if let Err(e) = self.api.delete_branch(repo, branch).await {
            debug!(%branch, error = %e, "Branch cleanup failed");
        }
    }

    /// Dispatch `workflow` on `branch` and try to find the run it started
    ///
    /// Correlation is best effort: when no matching run shows up within the
    /// polling window the status is `dispatched` and no id is returned.
    #[instrument(skip(self), fields(repo = %repo.full_name()))]
    pub async fn trigger_validation(&self, repo: &RepoTarget, workflow: &str, branch: &str) -> Result<ValidationRun> {
        let retry = &self.config.retry;
        let dispatched_at = Utc::now() - chrono::Duration::seconds(CLOCK_SKEW_SECS);
        let inputs = serde_json::json!({});
        with_retry(retry, || self.api.dispatch_workflow(repo, workflow, branch, &inputs)).await?;
        info!(%workflow, %branch, "Validation workflow dispatched");

        for attempt in 1..=self.config.poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;
            let runs = with_retry(retry, || self.api.list_workflow_runs(repo, workflow, branch)).await?;
            let found = runs
                .into_iter()
                .filter(|r| r.head_branch.as_deref() == Some(branch) && r.created_at >= dispatched_at)
                .max_by_key(|r| r.created_at);
            if let Some(run) = found {
                debug!(attempt, run_id = run.id, status = %run.status, "Correlated validation run");
                return Ok(ValidationRun {
                    run_id: Some(run.id),
                    status: run.status,
                    url: run.html_url,
                });
            }
        }

        debug!(%workflow, "No validation run correlated");
        Ok(ValidationRun {
            run_id: None,
            status: "dispatched".to_string(),
            url: None,
        })
    }
}
