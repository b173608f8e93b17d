//! Analysis agent: root-cause classification

use super::parse::{normalize_enum, Fields};
use super::{Agent, AgentResult, AgentShell, UserContent};
use crate::context::RepairContext;
use crate::error::{Error, Result};
use mender_llm::util::truncate_safe;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use tracing::{info, instrument};

const MAX_STACK_CHARS: usize = 4000;
const MAX_LOG_LINES: usize = 20;

/// Root-cause categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RootCauseCategory {
    /// Selector no longer matches the DOM
    SelectorMismatch,
    /// Race between test and application
    TimingIssue,
    /// Test relies on state left by another test
    StateDependency,
    /// Request failed or was not awaited
    NetworkIssue,
    /// Element present but hidden or covered
    ElementVisibility,
    /// Expected value differs from actual
    AssertionMismatch,
    /// Fixture or seed data missing
    DataDependency,
    /// CI environment problem
    EnvironmentIssue,
    /// Not determinable
    Unknown,
}

impl RootCauseCategory {
    /// Parse a model-supplied category, tolerating case and separators
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match normalize_enum(raw).as_str() {
            "SELECTOR_MISMATCH" => Self::SelectorMismatch,
            "TIMING_ISSUE" => Self::TimingIssue,
            "STATE_DEPENDENCY" => Self::StateDependency,
            "NETWORK_ISSUE" => Self::NetworkIssue,
            "ELEMENT_VISIBILITY" => Self::ElementVisibility,
            "ASSERTION_MISMATCH" => Self::AssertionMismatch,
            "DATA_DEPENDENCY" => Self::DataDependency,
            "ENVIRONMENT_ISSUE" => Self::EnvironmentIssue,
            "UNKNOWN" => Self::Unknown,
            _ => return None,
        })
    }

    /// Canonical name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectorMismatch => "SELECTOR_MISMATCH",
            Self::TimingIssue => "TIMING_ISSUE",
            Self::StateDependency => "STATE_DEPENDENCY",
            Self::NetworkIssue => "NETWORK_ISSUE",
            Self::ElementVisibility => "ELEMENT_VISIBILITY",
            Self::AssertionMismatch => "ASSERTION_MISMATCH",
            Self::DataDependency => "DATA_DEPENDENCY",
            Self::EnvironmentIssue => "ENVIRONMENT_ISSUE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Where the defect most likely lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueLocation {
    /// The test code
    TestCode,
    /// The application under test
    AppCode,
    /// Both
    Both,
    /// Not determinable
    #[default]
    Unknown,
}

impl IssueLocation {
    fn parse(raw: &str) -> Self {
        match normalize_enum(raw).as_str() {
            "TEST_CODE" | "TEST" => Self::TestCode,
            "APP_CODE" | "APP" | "APPLICATION" => Self::AppCode,
            "BOTH" => Self::Both,
            _ => Self::Unknown,
        }
    }
}

/// Failure pattern flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternFlags {
    /// A wait or retry deadline elapsed
    pub has_timeout: bool,
    /// Element existed but was not visible or actionable
    pub has_visibility_issue: bool,
    /// A network request is involved
    pub has_network_call: bool,
    /// An assertion on application state failed
    pub has_state_assertion: bool,
    /// Dynamic or generated content is involved
    pub has_dynamic_content: bool,
    /// Viewport or layout dependent
    pub has_responsive_issue: bool,
}

impl PatternFlags {
    fn from_fields(fields: &Fields<'_>) -> Self {
        let Some(map) = fields.object(&["patterns"]) else {
            return Self::default();
        };
        let p = Fields::new(map);
        Self {
            has_timeout: p.bool_or(&["hasTimeout", "has_timeout"], false),
            has_visibility_issue: p.bool_or(&["hasVisibilityIssue", "has_visibility_issue"], false),
            has_network_call: p.bool_or(&["hasNetworkCall", "has_network_call"], false),
            has_state_assertion: p.bool_or(&["hasStateAssertion", "has_state_assertion"], false),
            has_dynamic_content: p.bool_or(&["hasDynamicContent", "has_dynamic_content"], false),
            has_responsive_issue: p.bool_or(&["hasResponsiveIssue", "has_responsive_issue"], false),
        }
    }
}

/// Analysis stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    /// Primary root cause
    pub root_cause: RootCauseCategory,
    /// Secondary causes
    pub contributing_factors: Vec<RootCauseCategory>,
    /// 0-100
    pub confidence: u8,
    /// Model explanation
    pub explanation: String,
    /// Selectors involved in the failure
    pub selectors: Vec<String>,
    /// Element descriptions involved in the failure
    pub elements: Vec<String>,
    /// Where the defect lives
    pub issue_location: IssueLocation,
    /// Pattern flags
    pub patterns: PatternFlags,
    /// One-sentence suggested approach
    pub suggested_approach: String,
}

impl AnalysisOutput {
    pub(crate) fn from_json(map: &Map<String, Value>) -> Result<Self> {
        let fields = Fields::new(map);

        let raw_category = fields.required_str(&["rootCauseCategory", "root_cause_category", "rootCause"])?;
        let root_cause = RootCauseCategory::parse(raw_category)
            .ok_or_else(|| Error::Validation(format!("unknown root cause category `{raw_category}`")))?;

        let contributing_factors = fields
            .str_list(&["contributingFactors", "contributing_factors"])
            .iter()
            .filter_map(|raw| RootCauseCategory::parse(raw))
            .filter(|c| *c != root_cause)
            .collect();

        Ok(Self {
            root_cause,
            contributing_factors,
            confidence: fields.required_confidence(&["confidence"])?,
            explanation: fields.str_or_default(&["explanation"]),
            selectors: fields.str_list(&["selectors"]),
            elements: fields.str_list(&["elements"]),
            issue_location: fields
                .opt_str(&["issueLocation", "issue_location"])
                .map(|s| IssueLocation::parse(&s))
                .unwrap_or_default(),
            patterns: PatternFlags::from_fields(&fields),
            suggested_approach: fields.str_or_default(&["suggestedApproach", "suggested_approach"]),
        })
    }
}

const SYSTEM_PROMPT: &str = r#"[mender:analysis] You are a test failure analyst for end-to-end browser tests.
Classify the root cause of the failure described by the user.

Respond with a single JSON object:
{
  "rootCauseCategory": "SELECTOR_MISMATCH | TIMING_ISSUE | STATE_DEPENDENCY | NETWORK_ISSUE | ELEMENT_VISIBILITY | ASSERTION_MISMATCH | DATA_DEPENDENCY | ENVIRONMENT_ISSUE | UNKNOWN",
  "contributingFactors": ["<category>", ...],
  "confidence": <integer 0-100>,
  "explanation": "<what went wrong>",
  "selectors": ["<selector involved>", ...],
  "elements": ["<element description>", ...],
  "issueLocation": "TEST_CODE | APP_CODE | BOTH | UNKNOWN",
  "patterns": {
    "hasTimeout": bool, "hasVisibilityIssue": bool, "hasNetworkCall": bool,
    "hasStateAssertion": bool, "hasDynamicContent": bool, "hasResponsiveIssue": bool
  },
  "suggestedApproach": "<one sentence>"
}"#;

/// Root-cause classification stage
pub struct AnalysisAgent {
    shell: AgentShell,
}

impl AnalysisAgent {
    /// System prompt marker
    pub const MARKER: &'static str = "[mender:analysis]";

    /// Create the agent
    #[must_use]
    pub fn new(shell: AgentShell) -> Self {
        Self { shell }
    }

    fn build_prompt(context: &RepairContext) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Framework: {}", context.framework.as_str());
        let _ = writeln!(prompt, "Test file: {}", context.test_file);
        if !context.test_name.is_empty() {
            let _ = writeln!(prompt, "Test name: {}", context.test_name);
        }
        if let Some(error_type) = &context.error_type {
            let _ = writeln!(prompt, "Error type: {error_type}");
        }
        let _ = writeln!(prompt, "Error message:\n{}", context.error_message);
        if let Some(selector) = &context.error_selector {
            let _ = writeln!(prompt, "Selector in error: {selector}");
        }
        if let Some(stack) = &context.stack_trace {
            let _ = writeln!(prompt, "\nStack trace:\n{}", truncate_safe(stack, MAX_STACK_CHARS));
        }
        if !context.logs.is_empty() {
            prompt.push_str("\nLogs:\n");
            for line in context.logs.iter().take(MAX_LOG_LINES) {
                let _ = writeln!(prompt, "{line}");
            }
        }
        if let Some(diff) = &context.diff {
            let _ = writeln!(prompt, "\nRecent changes: {}", diff.summary);
            for file in &diff.files {
                let _ = writeln!(prompt, "- {} ({})", file.filename, file.status);
            }
        }
        if !context.screenshots.is_empty() {
            let _ = writeln!(prompt, "\n{} screenshot(s) attached.", context.screenshots.len());
        }
        prompt
    }
}

#[async_trait::async_trait]
impl Agent for AnalysisAgent {
    type Input = ();
    type Output = AnalysisOutput;

    fn name(&self) -> &'static str {
        "analysis"
    }

    #[instrument(skip_all, fields(test_file = %context.test_file))]
    async fn execute(&self, _input: &(), context: &RepairContext) -> AgentResult<AnalysisOutput> {
        let content = UserContent::text(Self::build_prompt(context)).with_images(context.images());
        let result = self
            .shell
            .run(self.name(), SYSTEM_PROMPT, content, AnalysisOutput::from_json)
            .await;

        if let Some(output) = &result.data {
            info!(
                root_cause = output.root_cause.as_str(),
                confidence = output.confidence,
                "Analysis complete"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::parse::parse_object;

    #[test]
    fn test_parse_full_output() {
        let map = parse_object(
            r#"{
                "rootCauseCategory": "selector-mismatch",
                "contributingFactors": ["timing issue", "BOGUS", "SELECTOR_MISMATCH"],
                "confidence": 85,
                "explanation": "button renamed",
                "selectors": ["[data-testid=submit]"],
                "issueLocation": "test_code",
                "patterns": {"hasTimeout": true},
                "suggestedApproach": "Update the selector."
            }"#,
        )
        .unwrap();
        let output = AnalysisOutput::from_json(&map).unwrap();

        assert_eq!(output.root_cause, RootCauseCategory::SelectorMismatch);
        assert_eq!(output.contributing_factors, vec![RootCauseCategory::TimingIssue]);
        assert_eq!(output.issue_location, IssueLocation::TestCode);
        assert!(output.patterns.has_timeout);
        assert!(!output.patterns.has_network_call);
        assert!(output.elements.is_empty());
    }

    #[test]
    fn test_unknown_category_rejects() {
        let map = parse_object(r#"{"rootCauseCategory": "COSMIC_RAYS", "confidence": 50}"#).unwrap();
        assert!(matches!(AnalysisOutput::from_json(&map), Err(Error::Validation(_))));
    }

    #[test]
    fn test_missing_confidence_rejects() {
        let map = parse_object(r#"{"rootCauseCategory": "TIMING_ISSUE"}"#).unwrap();
        assert!(AnalysisOutput::from_json(&map).is_err());
    }

    #[test]
    fn test_prompt_mentions_context() {
        let ctx = RepairContext::new(
            "expected 3 to equal 4",
            "cypress/e2e/cart.cy.ts",
            crate::context::RepoTarget::new("acme", "shop", "main"),
        )
        .with_error_selector(".cart-count")
        .with_logs(vec!["GET /api/cart 500".into()]);

        let prompt = AnalysisAgent::build_prompt(&ctx);
        assert!(prompt.contains("cypress/e2e/cart.cy.ts"));
        assert!(prompt.contains("Selector in error: .cart-count"));
        assert!(prompt.contains("GET /api/cart 500"));
    }
}
