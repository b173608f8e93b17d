use super::*;
use crate::agents::{
    AnalysisAgent, CodeReadingAgent, FixGenerationAgent, InvestigationAgent, ReviewAgent,
};
use crate::context::{RepairContext, RepoTarget};
use crate::source::InMemorySource;
use mender_llm::{LlmProvider, MockProvider};
use std::sync::Arc;

const TEST_FILE: &str = "cypress/e2e/login.cy.ts";
const TEST_SOURCE: &str = "describe('login', () => {\n  it('submits', () => {\n    cy.visit('/login');\n    cy.get('[data-testid=\"submit\"]').click();\n  });\n});\n";

const ANALYSIS: &str = r#"{"rootCauseCategory": "SELECTOR_MISMATCH", "confidence": 85, "selectors": ["[data-testid=\"submit\"]"]}"#;
const INVESTIGATION: &str = r#"{"findings": [], "isTestCodeFixable": true, "confidence": 80}"#;

fn fix(confidence: u8) -> String {
    format!(
        r#"{{"changes": [{{"file": "{TEST_FILE}", "line": 4, "oldCode": "[data-testid=\"submit\"]", "newCode": "[data-testid=\"submit-btn\"]"}}], "confidence": {confidence}}}"#
    )
}

fn setup(config: OrchestratorConfig) -> (Arc<MockProvider>, Orchestrator) {
    setup_with_source(config, TEST_SOURCE)
}

fn setup_with_source(config: OrchestratorConfig, test_source: &str) -> (Arc<MockProvider>, Orchestrator) {
    let provider = Arc::new(MockProvider::new());
    provider.push_text(AnalysisAgent::MARKER, ANALYSIS);
    provider.push_text(CodeReadingAgent::MARKER, r#"{"summary": "logs in"}"#);
    provider.push_text(InvestigationAgent::MARKER, INVESTIGATION);

    let source = Arc::new(InMemorySource::new().with_file(TEST_FILE, test_source));
    let llm: Arc<dyn LlmProvider> = provider.clone();
    (provider, Orchestrator::new(llm, source, config))
}

fn context() -> RepairContext {
    RepairContext::new(
        "Timed out retrying: Expected to find element: [data-testid=\"submit\"]",
        TEST_FILE,
        RepoTarget::new("acme", "shop", "main"),
    )
}

fn fix_prompts(provider: &MockProvider) -> Vec<String> {
    provider
        .requests()
        .into_iter()
        .filter(|r| r.system_prompt().is_some_and(|s| s.contains(FixGenerationAgent::MARKER)))
        .map(|r| r.messages.last().map(|m| m.content.clone()).unwrap_or_default())
        .collect()
}

#[test]
fn test_config_defaults() {
    let config = OrchestratorConfig::default();
    assert_eq!(config.max_iterations, 3);
    assert_eq!(config.min_confidence, 70);
    assert!(config.require_review);
    assert_eq!(config.total_timeout, std::time::Duration::from_secs(120));
    assert!(!config.single_shot_fallback);
    assert_eq!(OrchestratorConfig::new().with_min_confidence(250).min_confidence, 100);
}

#[tokio::test]
async fn test_low_confidence_feedback_reaches_next_round() {
    let (provider, orchestrator) = setup(OrchestratorConfig::default());
    provider.push_text(FixGenerationAgent::MARKER, fix(40));
    provider.push_text(FixGenerationAgent::MARKER, fix(90));
    provider.push_text(ReviewAgent::MARKER, r#"{"approved": true, "issues": []}"#);

    let mut ctx = context();
    let result = orchestrator.orchestrate(&mut ctx).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.outcome, RepairOutcome::Approved);
    assert_eq!(result.iterations, 2);
    // the 40% fix is never reviewed
    assert_eq!(provider.call_count(ReviewAgent::MARKER), 1);

    let prompts = fix_prompts(&provider);
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("Confidence too low"));
    assert!(prompts[1].contains("Confidence too low (40%). Please improve the fix."));
}

#[tokio::test]
async fn test_context_enriched_from_code_reading() {
    let (provider, orchestrator) = setup(OrchestratorConfig::default().with_require_review(false));
    provider.push_text(FixGenerationAgent::MARKER, fix(90));

    let mut ctx = context();
    assert!(!ctx.is_enriched());
    let result = orchestrator.orchestrate(&mut ctx).await;

    assert!(result.success);
    assert!(ctx.is_enriched());
    assert_eq!(ctx.test_file_content.as_deref(), Some(TEST_SOURCE));
    assert_eq!(ctx.file_content(TEST_FILE), Some(TEST_SOURCE));
}

#[tokio::test]
async fn test_change_past_prompt_cap_is_validated_against_full_file() {
    let filler = "    cy.log('waiting for the form to settle');\n".repeat(600);
    let source = format!(
        "describe('login', () => {{\n  it('submits', () => {{\n{filler}    cy.get('[data-testid=\"submit\"]').click();\n  }});\n}});\n"
    );
    assert!(source.len() > crate::agents::MAX_FILE_CHARS);
    let line = source.lines().count() - 2;

    let (provider, orchestrator) = setup_with_source(OrchestratorConfig::default(), &source);
    provider.push_text(
        FixGenerationAgent::MARKER,
        format!(
            r#"{{"changes": [{{"file": "{TEST_FILE}", "line": {line}, "oldCode": "[data-testid=\"submit\"]", "newCode": "[data-testid=\"submit-btn\"]"}}], "confidence": 90}}"#
        ),
    );
    provider.push_text(ReviewAgent::MARKER, r#"{"approved": true, "issues": []}"#);

    let mut ctx = context();
    let result = orchestrator.orchestrate(&mut ctx).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.outcome, RepairOutcome::Approved);
    assert_eq!(ctx.test_file_content.as_deref(), Some(source.as_str()));
}

#[tokio::test]
async fn test_review_failure_uses_deterministic_feedback() {
    let (provider, orchestrator) = setup(OrchestratorConfig::default().with_max_iterations(2));
    // oldCode absent from the test file
    provider.push_text(
        FixGenerationAgent::MARKER,
        format!(
            r#"{{"changes": [{{"file": "{TEST_FILE}", "line": 4, "oldCode": "cy.get('#gone')", "newCode": "cy.get('#here')"}}], "confidence": 90}}"#
        ),
    );
    provider.push_text(FixGenerationAgent::MARKER, fix(90));
    provider.push_text(ReviewAgent::MARKER, "not json at all");
    provider.push_text(ReviewAgent::MARKER, r#"{"approved": true}"#);

    let mut ctx = context();
    let result = orchestrator.orchestrate(&mut ctx).await;

    assert_eq!(result.outcome, RepairOutcome::Approved);
    let prompts = fix_prompts(&provider);
    assert!(prompts[1].contains("[CRITICAL]"));
    assert!(!result.agent_results.review[0].success);
}

#[tokio::test]
async fn test_validation_blocks_introduced_syntax_error() {
    let (provider, orchestrator) = setup(OrchestratorConfig::default().with_max_iterations(1));
    provider.push_text(
        FixGenerationAgent::MARKER,
        format!(
            r#"{{"changes": [{{"file": "{TEST_FILE}", "line": 4, "oldCode": ".click();", "newCode": ".click(;"}}], "confidence": 95}}"#
        ),
    );
    provider.push_text(ReviewAgent::MARKER, r#"{"approved": true, "issues": []}"#);

    let mut ctx = context();
    let result = orchestrator.orchestrate(&mut ctx).await;

    assert!(!result.success);
    assert_eq!(result.outcome, RepairOutcome::Exhausted);
    assert!(result.fix.is_none());
}

#[tokio::test]
async fn test_shutdown_cancels_runs() {
    let (_provider, orchestrator) = setup(OrchestratorConfig::default());
    orchestrator.shutdown();

    let mut ctx = context();
    let result = orchestrator.orchestrate(&mut ctx).await;

    assert_eq!(result.outcome, RepairOutcome::Cancelled);
    assert!(result.agent_results.analysis.is_none());
    assert_eq!(result.error.as_deref(), Some("Repair cancelled during init"));
}

#[tokio::test]
async fn test_agent_results_accounting() {
    let (provider, orchestrator) = setup(OrchestratorConfig::default());
    provider.push_text(FixGenerationAgent::MARKER, fix(90));
    provider.push_text(ReviewAgent::MARKER, r#"{"approved": true, "issues": []}"#);

    let mut ctx = context();
    let result = orchestrator.orchestrate(&mut ctx).await;

    assert!(result.success);
    let results = &result.agent_results;
    assert!(results.analysis.as_ref().is_some_and(|r| r.success));
    assert!(results.code_reading.as_ref().is_some_and(|r| r.success));
    assert_eq!(results.fix_generation.len(), 1);
    assert_eq!(results.review.len(), 1);
    assert_eq!(results.total_api_calls(), 5);
    assert_eq!(results.total_tokens(), 5 * 15);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["approach"], "agentic");
    assert_eq!(json["outcome"]["outcome"], "approved");
    assert_eq!(json["fix"]["proposedChanges"][0]["newCode"], "[data-testid=\"submit-btn\"]");
}
