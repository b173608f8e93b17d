//! Source retrieval seam
//!
//! Agents never talk to the hosting service directly. They go through a
//! [`SourceFetcher`], which lets the same pipeline run against the GitHub
//! contents API, a local checkout, or a fixed in-memory tree in tests.

use crate::context::RepoTarget;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Reads file content from a repository at a ref
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `path` from `repo`. Missing files return [`Error::NotFound`].
    async fn fetch(&self, repo: &RepoTarget, path: &str) -> Result<String>;
}

/// A fixed set of files keyed by path, ignoring the repository target
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    files: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemorySource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file
    #[must_use]
    pub fn with_file(self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    /// Add or replace a file
    pub fn insert(&self, path: impl Into<String>, content: impl Into<String>) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), content.into());
    }
}

#[async_trait::async_trait]
impl SourceFetcher for InMemorySource {
    async fn fetch(&self, _repo: &RepoTarget, path: &str) -> Result<String> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

/// Reads files from a local checkout rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    /// Create a source rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            return Err(Error::Source(format!("path escapes checkout: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl SourceFetcher for LocalSource {
    async fn fetch(&self, _repo: &RepoTarget, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(e) => Err(Error::Source(format!("{}: {e}", full.display()))),
        }
    }
}

/// Normalise a relative import against the directory of `from`
///
/// Returns `None` when the import climbs above the repository root.
#[must_use]
pub fn join_relative(from: &str, import: &str) -> Option<String> {
    let mut parts: Vec<&str> = from.split('/').collect();
    parts.pop();
    for segment in import.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoTarget {
        RepoTarget::new("acme", "shop", "main")
    }

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemorySource::new().with_file("a.ts", "alpha");
        assert_eq!(source.fetch(&repo(), "a.ts").await.unwrap(), "alpha");
        assert!(source.fetch(&repo(), "b.ts").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_source_rejects_escape() {
        let source = LocalSource::new(std::env::temp_dir());
        let err = source.fetch(&repo(), "../etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::Source(_)));
    }

    #[tokio::test]
    async fn test_local_source_missing_file() {
        let source = LocalSource::new(std::env::temp_dir());
        let err = source
            .fetch(&repo(), "mender-definitely-missing-file.ts")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_join_relative() {
        assert_eq!(
            join_relative("cypress/e2e/login.cy.ts", "../support/pages/LoginPage").as_deref(),
            Some("cypress/support/pages/LoginPage")
        );
        assert_eq!(
            join_relative("cypress/e2e/login.cy.ts", "./helpers").as_deref(),
            Some("cypress/e2e/helpers")
        );
        assert_eq!(join_relative("a.ts", "../../x"), None);
    }
}
