//! GitHub REST client
//!
//! `HostingApi` is the seam the applier and the source fetcher talk to.
//! Every call takes the target repository explicitly.

use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use mender_core::RepoTarget;
use mender_llm::util::mask_api_key;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default API base URL
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// REST API version header value
pub const GITHUB_API_VERSION: &str = "2022-11-28";

/// A file read from a branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Decoded content
    pub content: String,
    /// Blob SHA, required to update the file
    pub sha: String,
}

/// A single-file commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    /// Repository-relative path
    pub path: String,
    /// Branch to commit on
    pub branch: String,
    /// New content
    pub content: String,
    /// Blob SHA of the content being replaced
    pub sha: String,
    /// Commit message
    pub message: String,
}

/// A workflow run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Run id
    pub id: u64,
    /// queued / in_progress / completed
    pub status: String,
    /// Set once completed
    #[serde(default)]
    pub conclusion: Option<String>,
    /// Branch the run was started on
    #[serde(default)]
    pub head_branch: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Web URL
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Source-hosting operations used by the pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Head commit SHA of `branch`
    async fn branch_head(&self, repo: &RepoTarget, branch: &str) -> Result<String>;

    /// Create `branch` pointing at `sha`
    async fn create_branch(&self, repo: &RepoTarget, branch: &str, sha: &str) -> Result<()>;

    /// Delete `branch`
    async fn delete_branch(&self, repo: &RepoTarget, branch: &str) -> Result<()>;

    /// Read `path` at `git_ref`
    async fn get_file(&self, repo: &RepoTarget, path: &str, git_ref: &str) -> Result<RemoteFile>;

    /// Commit new content for one file, returning the commit SHA
    async fn update_file(&self, repo: &RepoTarget, update: &FileUpdate) -> Result<String>;

    /// Dispatch a `workflow_dispatch` workflow on `git_ref`
    async fn dispatch_workflow(
        &self,
        repo: &RepoTarget,
        workflow: &str,
        git_ref: &str,
        inputs: &serde_json::Value,
    ) -> Result<()>;

    /// Recent dispatched runs of `workflow` on `branch`, newest first
    async fn list_workflow_runs(
        &self,
        repo: &RepoTarget,
        workflow: &str,
        branch: &str,
    ) -> Result<Vec<WorkflowRun>>;
}

/// Client configuration
#[derive(Clone)]
pub struct GitHubConfig {
    /// Access token
    pub token: String,
    /// API base URL
    pub api_base: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// User-Agent header
    pub user_agent: String,
}

// SECURITY: Custom Debug implementation to mask the token
impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &mask_api_key(&self.token))
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl GitHubConfig {
    /// Create a configuration with a token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: GITHUB_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("mender/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Create from `GITHUB_TOKEN` (and optional `GITHUB_API_URL`)
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| Error::PermissionDenied("GITHUB_TOKEN not set".to_string()))?;
        let mut config = Self::new(token);
        if let Ok(base) = std::env::var("GITHUB_API_URL") {
            config.api_base = base;
        }
        Ok(config)
    }

    /// Set the API base URL
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the User-Agent
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

#[derive(Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    content: Option<String>,
    encoding: Option<String>,
    sha: String,
}

#[derive(Deserialize)]
struct UpdateResponse {
    commit: CommitRef,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct RunsResponse {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Decode a contents-API base64 body (GitHub wraps it at 60 columns)
pub(crate) fn decode_content(encoded: &str) -> Result<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| Error::Decode(format!("invalid base64 content: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Decode(format!("content is not UTF-8: {e}")))
}

/// Seconds to wait, from `retry-after` or the rate-limit reset epoch
fn retry_hint(response: &Response) -> (Option<Duration>, Option<u64>) {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    let remaining = header("x-ratelimit-remaining");
    let retry_after = header("retry-after").map(Duration::from_secs).or_else(|| {
        let reset = header("x-ratelimit-reset")?;
        let now = u64::try_from(Utc::now().timestamp()).ok()?;
        (remaining == Some(0)).then(|| Duration::from_secs(reset.saturating_sub(now)))
    });
    (retry_after, remaining)
}

/// GitHub REST implementation of [`HostingApi`]
pub struct GitHubClient {
    client: Client,
    config: GitHubConfig,
}

impl GitHubClient {
    /// Create a new client
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GitHubConfig::from_env()?)
    }

    fn repo_url(&self, repo: &RepoTarget, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_base,
            repo.owner,
            repo.repo,
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let (retry_after, remaining) = retry_hint(&response);
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);
        debug!(status = status.as_u16(), %message, "GitHub API error");
        Err(Error::from_status(status.as_u16(), &message, retry_after, remaining))
    }
}

#[async_trait]
impl HostingApi for GitHubClient {
    #[instrument(skip(self), fields(repo = %repo.full_name()))]
    async fn branch_head(&self, repo: &RepoTarget, branch: &str) -> Result<String> {
        let url = self.repo_url(repo, &format!("git/ref/heads/{branch}"));
        let response: RefResponse = self.send(self.client.get(url)).await?.json().await?;
        Ok(response.object.sha)
    }

    #[instrument(skip(self), fields(repo = %repo.full_name()))]
    async fn create_branch(&self, repo: &RepoTarget, branch: &str, sha: &str) -> Result<()> {
        let url = self.repo_url(repo, "git/refs");
        let body = serde_json::json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo.full_name()))]
    async fn delete_branch(&self, repo: &RepoTarget, branch: &str) -> Result<()> {
        let url = self.repo_url(repo, &format!("git/refs/heads/{branch}"));
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo.full_name()))]
    async fn get_file(&self, repo: &RepoTarget, path: &str, git_ref: &str) -> Result<RemoteFile> {
        let url = self.repo_url(repo, &format!("contents/{path}"));
        let response: ContentResponse = self
            .send(self.client.get(url).query(&[("ref", git_ref)]))
            .await?
            .json()
            .await?;

        match (response.content, response.encoding.as_deref()) {
            (Some(content), Some("base64") | None) => Ok(RemoteFile {
                content: decode_content(&content)?,
                sha: response.sha,
            }),
            (_, encoding) => Err(Error::Decode(format!(
                "{path} has no inline content (encoding {})",
                encoding.unwrap_or("none")
            ))),
        }
    }

    #[instrument(skip(self, update), fields(repo = %repo.full_name(), path = %update.path, branch = %update.branch))]
    async fn update_file(&self, repo: &RepoTarget, update: &FileUpdate) -> Result<String> {
        let url = self.repo_url(repo, &format!("contents/{}", update.path));
        let body = serde_json::json!({
            "message": update.message,
            "content": STANDARD.encode(update.content.as_bytes()),
            "sha": update.sha,
            "branch": update.branch,
        });
        let response: UpdateResponse = self.send(self.client.put(url).json(&body)).await?.json().await?;
        Ok(response.commit.sha)
    }

    #[instrument(skip(self, inputs), fields(repo = %repo.full_name()))]
    async fn dispatch_workflow(
        &self,
        repo: &RepoTarget,
        workflow: &str,
        git_ref: &str,
        inputs: &serde_json::Value,
    ) -> Result<()> {
        let url = self.repo_url(repo, &format!("actions/workflows/{workflow}/dispatches"));
        let body = serde_json::json!({ "ref": git_ref, "inputs": inputs });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo.full_name()))]
    async fn list_workflow_runs(
        &self,
        repo: &RepoTarget,
        workflow: &str,
        branch: &str,
    ) -> Result<Vec<WorkflowRun>> {
        let url = self.repo_url(repo, &format!("actions/workflows/{workflow}/runs"));
        let response: RunsResponse = self
            .send(self.client.get(url).query(&[
                ("branch", branch),
                ("event", "workflow_dispatch"),
                ("per_page", "10"),
            ]))
            .await?
            .json()
            .await?;
        Ok(response.workflow_runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_masks_token() {
        let config = GitHubConfig::new("ghp_1234567890abcdefghij");
        let debug = format!("{config:?}");
        assert!(!debug.contains("ghp_1234567890abcdefghij"));
        assert!(debug.contains("ghp_...ghij"));
    }

    #[test]
    fn test_repo_url() {
        let client = GitHubClient::new(GitHubConfig::new("t").with_api_base("https://ghe.example.com/api/v3/")).unwrap();
        let repo = RepoTarget::new("acme", "shop", "main");
        assert_eq!(
            client.repo_url(&repo, "/contents/cypress/e2e/a.cy.ts"),
            "https://ghe.example.com/api/v3/repos/acme/shop/contents/cypress/e2e/a.cy.ts"
        );
    }

    #[test]
    fn test_decode_wrapped_content() {
        let encoded = STANDARD.encode("cy.get('#a').click();\n");
        let wrapped = format!("{}\n{}\n", &encoded[..10], &encoded[10..]);
        assert_eq!(decode_content(&wrapped).unwrap(), "cy.get('#a').click();\n");
        assert!(matches!(decode_content("@@@"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_workflow_run_deserialize() {
        let run: WorkflowRun = serde_json::from_str(
            r#"{"id": 42, "status": "queued", "conclusion": null, "head_branch": "fix/mender/login",
                "created_at": "2026-10-14T09:30:00Z", "html_url": "https://github.com/acme/shop/actions/runs/42"}"#,
        )
        .unwrap();
        assert_eq!(run.id, 42);
        assert_eq!(run.head_branch.as_deref(), Some("fix/mender/login"));
    }
}
