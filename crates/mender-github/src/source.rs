//! `SourceFetcher` over the contents API

use crate::client::HostingApi;
use async_trait::async_trait;
use mender_core::{RepoTarget, SourceFetcher};
use std::sync::Arc;

use crate::retry::{with_retry, RetryConfig};

/// Reads sources from the hosting service at the target's ref
pub struct HostingSource {
    api: Arc<dyn HostingApi>,
    retry: RetryConfig,
}

impl HostingSource {
    /// Create a fetcher over `api`
    #[must_use]
    pub fn new(api: Arc<dyn HostingApi>) -> Self {
        Self {
            api,
            retry: RetryConfig::default(),
        }
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl SourceFetcher for HostingSource {
    async fn fetch(&self, repo: &RepoTarget, path: &str) -> mender_core::Result<String> {
        let file = with_retry(&self.retry, || self.api.get_file(repo, path, &repo.git_ref)).await?;
        Ok(file.content)
    }
}
