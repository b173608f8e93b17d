//! Shared repair context
//!
//! One `RepairContext` is created per repair attempt and threaded through
//! every stage. The only mutation after construction is [`RepairContext::enrich`],
//! performed once by the orchestrator with the Code-Reading output.

use mender_llm::ImageContent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Repository coordinates for every hosting call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Branch, tag or commit the sources are read from
    #[serde(default = "default_ref", rename = "ref")]
    pub git_ref: String,
}

fn default_ref() -> String {
    "main".to_string()
}

impl RepoTarget {
    /// Create a new target
    #[must_use]
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            git_ref: git_ref.into(),
        }
    }

    /// Same repository, different ref
    #[must_use]
    pub fn at_ref(&self, git_ref: impl Into<String>) -> Self {
        Self {
            git_ref: git_ref.into(),
            ..self.clone()
        }
    }

    /// `owner/repo`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// End-to-end test framework that produced the failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    /// Cypress
    Cypress,
    /// Playwright
    Playwright,
    /// Not known
    #[default]
    Unknown,
}

impl Framework {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cypress => "cypress",
            Self::Playwright => "playwright",
            Self::Unknown => "unknown",
        }
    }
}

/// A screenshot captured at failure time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    /// File name
    pub name: String,
    /// MIME type
    #[serde(default = "default_image_mime")]
    pub mime_type: String,
    /// Base64-encoded image
    pub data: String,
}

fn default_image_mime() -> String {
    "image/png".to_string()
}

impl Screenshot {
    /// As an inline image for a completion request
    #[must_use]
    pub fn to_image(&self) -> ImageContent {
        ImageContent::from_base64(&self.mime_type, &self.data)
    }
}

/// One file touched by the associated diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedFile {
    /// Repository-relative path
    pub filename: String,
    /// `added`, `modified`, `removed`, ...
    #[serde(default)]
    pub status: String,
    /// Unified diff hunk text
    #[serde(default)]
    pub patch: Option<String>,
}

/// Diff associated with the failing run (PR or commit)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffMetadata {
    /// Short human-readable summary
    #[serde(default)]
    pub summary: String,
    /// Changed files
    #[serde(default)]
    pub files: Vec<ChangedFile>,
}

impl DiffMetadata {
    /// Lines added by the diff across all files
    pub fn added_lines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.patch_lines('+')
    }

    /// Lines removed by the diff across all files
    pub fn removed_lines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.patch_lines('-')
    }

    fn patch_lines(&self, marker: char) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().flat_map(move |file| {
            file.patch
                .as_deref()
                .unwrap_or_default()
                .lines()
                .filter(move |line| {
                    line.starts_with(marker) && !line.starts_with("+++") && !line.starts_with("---")
                })
                .map(move |line| (file.filename.as_str(), &line[1..]))
        })
    }
}

/// The per-attempt record threaded through all stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairContext {
    /// Failure message
    pub error_message: String,
    /// Repository-relative path of the failing spec
    pub test_file: String,
    /// Failing test title
    #[serde(default)]
    pub test_name: String,
    /// Error class, e.g. `AssertionError`
    #[serde(default)]
    pub error_type: Option<String>,
    /// Selector named in the error, if any
    #[serde(default)]
    pub error_selector: Option<String>,
    /// Stack trace
    #[serde(default)]
    pub stack_trace: Option<String>,
    /// Screenshots
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    /// Relevant log excerpts
    #[serde(default)]
    pub logs: Vec<String>,
    /// Associated diff
    #[serde(default)]
    pub diff: Option<DiffMetadata>,
    /// Test framework
    #[serde(default)]
    pub framework: Framework,
    /// Where sources are read from
    pub repository: RepoTarget,
    /// Test file source (set by enrichment)
    #[serde(default)]
    pub test_file_content: Option<String>,
    /// Path → content of every fetched file (set by enrichment)
    #[serde(default)]
    pub source_files: BTreeMap<String, String>,
    #[serde(skip)]
    enriched: bool,
}

impl RepairContext {
    /// Create a new context
    #[must_use]
    pub fn new(
        error_message: impl Into<String>,
        test_file: impl Into<String>,
        repository: RepoTarget,
    ) -> Self {
        Self {
            error_message: error_message.into(),
            test_file: test_file.into(),
            test_name: String::new(),
            error_type: None,
            error_selector: None,
            stack_trace: None,
            screenshots: Vec::new(),
            logs: Vec::new(),
            diff: None,
            framework: Framework::Unknown,
            repository,
            test_file_content: None,
            source_files: BTreeMap::new(),
            enriched: false,
        }
    }

    /// Set the test name
    #[must_use]
    pub fn with_test_name(mut self, name: impl Into<String>) -> Self {
        self.test_name = name.into();
        self
    }

    /// Set the error type
    #[must_use]
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Set the selector named in the error
    #[must_use]
    pub fn with_error_selector(mut self, selector: impl Into<String>) -> Self {
        self.error_selector = Some(selector.into());
        self
    }

    /// Set the stack trace
    #[must_use]
    pub fn with_stack_trace(mut self, stack: impl Into<String>) -> Self {
        self.stack_trace = Some(stack.into());
        self
    }

    /// Attach screenshots
    #[must_use]
    pub fn with_screenshots(mut self, screenshots: Vec<Screenshot>) -> Self {
        self.screenshots = screenshots;
        self
    }

    /// Attach log excerpts
    #[must_use]
    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    /// Attach diff metadata
    #[must_use]
    pub fn with_diff(mut self, diff: DiffMetadata) -> Self {
        self.diff = Some(diff);
        self
    }

    /// Set the framework
    #[must_use]
    pub fn with_framework(mut self, framework: Framework) -> Self {
        self.framework = framework;
        self
    }

    /// Whether enrichment already happened
    #[must_use]
    pub fn is_enriched(&self) -> bool {
        self.enriched
    }

    /// Record fetched sources. Only the first call has an effect.
    pub fn enrich(
        &mut self,
        test_file_content: Option<String>,
        files: impl IntoIterator<Item = (String, String)>,
    ) {
        if self.enriched {
            warn!(test_file = %self.test_file, "Context already enriched, ignoring");
            return;
        }
        if let Some(content) = &test_file_content {
            self.source_files
                .insert(self.test_file.clone(), content.clone());
        }
        self.source_files.extend(files);
        self.test_file_content = test_file_content;
        self.enriched = true;
    }

    /// Content of a fetched file
    #[must_use]
    pub fn file_content(&self, path: &str) -> Option<&str> {
        self.source_files.get(path).map(String::as_str)
    }

    /// Inline images for all screenshots
    #[must_use]
    pub fn images(&self) -> Vec<ImageContent> {
        self.screenshots.iter().map(Screenshot::to_image).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RepairContext {
        RepairContext::new(
            "Timed out retrying: Expected to find element: [data-testid=\"submit\"]",
            "cypress/e2e/login.cy.ts",
            RepoTarget::new("acme", "shop", "main"),
        )
    }

    #[test]
    fn test_enrich_happens_once() {
        let mut ctx = context();
        ctx.enrich(
            Some("describe()".into()),
            vec![("cypress/support/commands.ts".into(), "cmd".into())],
        );
        assert!(ctx.is_enriched());
        assert_eq!(ctx.file_content("cypress/e2e/login.cy.ts"), Some("describe()"));
        assert_eq!(ctx.source_files.len(), 2);

        ctx.enrich(Some("other".into()), vec![("x.ts".into(), "x".into())]);
        assert_eq!(ctx.test_file_content.as_deref(), Some("describe()"));
        assert!(ctx.file_content("x.ts").is_none());
    }

    #[test]
    fn test_context_from_camel_case_json() {
        let ctx: RepairContext = serde_json::from_value(serde_json::json!({
            "errorMessage": "boom",
            "testFile": "tests/a.spec.ts",
            "framework": "playwright",
            "repository": {"owner": "acme", "repo": "shop"},
            "screenshots": [{"name": "s.png", "data": "AAAA"}]
        }))
        .unwrap();

        assert_eq!(ctx.framework, Framework::Playwright);
        assert_eq!(ctx.repository.git_ref, "main");
        assert_eq!(ctx.screenshots[0].mime_type, "image/png");
        assert!(!ctx.is_enriched());
    }

    #[test]
    fn test_diff_lines() {
        let diff = DiffMetadata {
            summary: String::new(),
            files: vec![ChangedFile {
                filename: "src/Button.tsx".into(),
                status: "modified".into(),
                patch: Some(
                    "--- a/src/Button.tsx\n+++ b/src/Button.tsx\n-<button data-testid=\"submit\">\n+<button data-testid=\"submit-btn\">"
                        .into(),
                ),
            }],
        };
        let removed: Vec<_> = diff.removed_lines().collect();
        let added: Vec<_> = diff.added_lines().collect();
        assert_eq!(removed, vec![("src/Button.tsx", "<button data-testid=\"submit\">")]);
        assert_eq!(added, vec![("src/Button.tsx", "<button data-testid=\"submit-btn\">")]);
    }

    #[test]
    fn test_repo_target_at_ref() {
        let target = RepoTarget::new("acme", "shop", "main").at_ref("fix/branch");
        assert_eq!(target.git_ref, "fix/branch");
        assert_eq!(target.full_name(), "acme/shop");
    }
}
