//! Integration tests for Mender
//!
//! Exercises the crates together:
//! - mender-core: orchestrator reading sources through the hosting adapter
//! - mender-llm: scripted provider
//! - mender-github: patch applier committing the accepted fix

use async_trait::async_trait;
use mender_core::agents::{
    AnalysisAgent, CodeReadingAgent, FixGenerationAgent, InvestigationAgent, ReviewAgent,
};
use mender_core::{Orchestrator, OrchestratorConfig, RepairContext, RepairOutcome, RepoTarget};
use mender_github::{
    ApplierConfig, Error, FileUpdate, HostingApi, HostingSource, PatchApplier, RemoteFile,
    Result, RetryConfig, WorkflowRun,
};
use mender_llm::{LlmProvider, MockProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TEST_FILE: &str = "cypress/e2e/checkout.cy.ts";
const TEST_SOURCE: &str = "describe('checkout', () => {\n  it('pays', () => {\n    cy.visit('/cart');\n    cy.get('.pay-now').click();\n    cy.contains('Thank you');\n  });\n});\n";

/// Hosting fake keyed by (ref, path)
#[derive(Default)]
struct Hosting {
    files: Mutex<HashMap<(String, String), RemoteFile>>,
    branches: Mutex<Vec<String>>,
    commits: Mutex<Vec<FileUpdate>>,
}

impl Hosting {
    fn seeded() -> Self {
        let hosting = Self::default();
        hosting.put("main", TEST_FILE, TEST_SOURCE, "blob-0");
        hosting.branches.lock().unwrap().push("main".into());
        hosting
    }

    fn put(&self, git_ref: &str, path: &str, content: &str, sha: &str) {
        self.files.lock().unwrap().insert(
            (git_ref.into(), path.into()),
            RemoteFile {
                content: content.into(),
                sha: sha.into(),
            },
        );
    }
}

#[async_trait]
impl HostingApi for Hosting {
    async fn branch_head(&self, _repo: &RepoTarget, branch: &str) -> Result<String> {
        if self.branches.lock().unwrap().iter().any(|b| b == branch) {
            Ok(format!("{branch}-head"))
        } else {
            Err(Error::NotFound(branch.into()))
        }
    }

    async fn create_branch(&self, _repo: &RepoTarget, branch: &str, _sha: &str) -> Result<()> {
        self.branches.lock().unwrap().push(branch.into());
        let copies: Vec<_> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|((r, _), _)| r == "main")
            .map(|((_, p), f)| ((branch.to_string(), p.clone()), f.clone()))
            .collect();
        self.files.lock().unwrap().extend(copies);
        Ok(())
    }

    async fn delete_branch(&self, _repo: &RepoTarget, branch: &str) -> Result<()> {
        self.branches.lock().unwrap().retain(|b| b != branch);
        Ok(())
    }

    async fn get_file(&self, _repo: &RepoTarget, path: &str, git_ref: &str) -> Result<RemoteFile> {
        self.files
            .lock()
            .unwrap()
            .get(&(git_ref.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(path.into()))
    }

    async fn update_file(&self, _repo: &RepoTarget, update: &FileUpdate) -> Result<String> {
        let mut commits = self.commits.lock().unwrap();
        commits.push(update.clone());
        let id = commits.len();
        self.put(&update.branch, &update.path, &update.content, &format!("blob-{id}"));
        Ok(format!("commit-{id}"))
    }

    async fn dispatch_workflow(
        &self,
        _repo: &RepoTarget,
        _workflow: &str,
        _git_ref: &str,
        _inputs: &serde_json::Value,
    ) -> Result<()> {
        Ok(())
    }

    async fn list_workflow_runs(
        &self,
        _repo: &RepoTarget,
        _workflow: &str,
        _branch: &str,
    ) -> Result<Vec<WorkflowRun>> {
        Ok(Vec::new())
    }
}

fn scripted_provider() -> Arc<MockProvider> {
    let provider = Arc::new(MockProvider::new());
    provider.push_text(
        AnalysisAgent::MARKER,
        r#"{"rootCauseCategory": "SELECTOR_MISMATCH", "confidence": 85, "explanation": "Pay button class renamed", "selectors": [".pay-now"], "issueLocation": "TEST_CODE", "suggestedApproach": "Use the new class"}"#,
    );
    provider.push_text(CodeReadingAgent::MARKER, r#"{"summary": "Pays for the cart."}"#);
    provider.push_text(
        InvestigationAgent::MARKER,
        r#"{"findings": [], "isTestCodeFixable": true, "recommendedApproach": "Rename the selector", "confidence": 80}"#,
    );
    provider.push_text(
        FixGenerationAgent::MARKER,
        format!(
            r#"{{"changes": [{{"file": "{TEST_FILE}", "line": 4, "oldCode": "cy.get('.pay-now')", "newCode": "cy.get('.pay-button')", "justification": "Pay button class renamed", "changeType": "replace"}}], "confidence": 88, "summary": "Use the renamed pay button class", "reasoning": "Class changed", "evidence": []}}"#
        ),
    );
    provider.push_text(
        ReviewAgent::MARKER,
        r#"{"approved": true, "issues": [], "assessment": "Minimal", "fixConfidence": 85}"#,
    );
    provider
}

fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false)
}

#[tokio::test]
async fn test_repair_then_apply_through_hosting() {
    let hosting = Arc::new(Hosting::seeded());
    let repo = RepoTarget::new("acme", "store", "main");

    let provider: Arc<dyn LlmProvider> = scripted_provider();
    let source = Arc::new(HostingSource::new(hosting.clone()).with_retry(fast_retry()));
    let orchestrator = Orchestrator::new(provider, source, OrchestratorConfig::default());

    let mut ctx = RepairContext::new("Expected to find element: .pay-now, but never found it.", TEST_FILE, repo.clone());
    let result = orchestrator.orchestrate(&mut ctx).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.outcome, RepairOutcome::Approved);
    assert_eq!(ctx.test_file_content.as_deref(), Some(TEST_SOURCE));

    let applier = PatchApplier::new(hosting.clone(), ApplierConfig::new().with_retry(fast_retry()));
    let fix = result.fix.unwrap();
    assert!(applier.can_apply(&fix));

    let applied = applier.apply_fix(&repo, &fix).await;
    assert!(applied.success, "{:?}", applied.error);
    assert_eq!(applied.modified_files, vec![TEST_FILE.to_string()]);

    let branch = applied.branch_name.unwrap();
    let committed = hosting.get_file(&repo, TEST_FILE, &branch).await.unwrap();
    assert!(committed.content.contains("cy.get('.pay-button').click();"));
    let original = hosting.get_file(&repo, TEST_FILE, "main").await.unwrap();
    assert_eq!(original.content, TEST_SOURCE);
}

#[tokio::test]
async fn test_unreadable_test_file_skips_enrichment() {
    let hosting = Arc::new(Hosting::default());
    let provider: Arc<dyn LlmProvider> = scripted_provider();
    let source = Arc::new(HostingSource::new(hosting).with_retry(fast_retry()));
    let orchestrator = Orchestrator::new(provider, source, OrchestratorConfig::default());

    let mut ctx = RepairContext::new(
        "Expected to find element: .pay-now, but never found it.",
        TEST_FILE,
        RepoTarget::new("acme", "store", "main"),
    );
    let result = orchestrator.orchestrate(&mut ctx).await;

    assert!(result.agent_results.code_reading.is_some_and(|r| !r.success));
    assert!(ctx.test_file_content.is_none());
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.outcome, RepairOutcome::Approved);
}
