//! Review agent
//!
//! The model's own `approved` flag is never used on its own: approval is
//! re-derived from the extracted issues by [`derive_approval`], and the
//! deterministic old-code check runs regardless of what the model says.

use super::analysis::AnalysisOutput;
use super::code_reading::MAX_FILE_CHARS;
use super::fix_generation::FixGenerationOutput;
use super::parse::{normalize_enum, Fields};
use super::{Agent, AgentResult, AgentShell, UserContent};
use crate::context::RepairContext;
use crate::error::{Error, Result};
use crate::patch::CodeChange;
use mender_llm::util::truncate_safe;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use tracing::{info, instrument};

/// Review issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewSeverity {
    /// Forces rejection
    Critical,
    /// Should be addressed
    Warning,
    /// Optional improvement
    Suggestion,
}

impl ReviewSeverity {
    fn parse(raw: &str) -> Self {
        match normalize_enum(raw).as_str() {
            "CRITICAL" | "ERROR" | "BLOCKER" | "BLOCKING" | "HIGH" | "MAJOR" | "FATAL" | "SEVERE" => {
                Self::Critical
            }
            "SUGGESTION" | "INFO" | "NIT" => Self::Suggestion,
            _ => Self::Warning,
        }
    }

    /// Canonical name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Suggestion => "SUGGESTION",
        }
    }
}

impl fmt::Display for ReviewSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem found in a proposed fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewIssue {
    /// Severity
    pub severity: ReviewSeverity,
    /// Index of the offending change
    pub change_index: usize,
    /// What is wrong
    pub description: String,
    /// How to fix it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ReviewIssue {
    /// Create an issue
    #[must_use]
    pub fn new(severity: ReviewSeverity, change_index: usize, description: impl Into<String>) -> Self {
        Self {
            severity,
            change_index,
            description: description.into(),
            suggestion: None,
        }
    }

    /// `[SEVERITY] description`
    #[must_use]
    pub fn feedback_line(&self) -> String {
        format!("[{}] {}", self.severity, self.description)
    }

    fn from_json(map: &Map<String, Value>) -> Self {
        let fields = Fields::new(map);
        Self {
            severity: ReviewSeverity::parse(&fields.str_or_default(&["severity"])),
            change_index: fields.opt_u64(&["changeIndex", "change_index"]).unwrap_or(0) as usize,
            description: fields
                .opt_str(&["description", "message"])
                .unwrap_or_else(|| "(no description)".to_string()),
            suggestion: fields.opt_str(&["suggestion"]),
        }
    }
}

/// Review stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutput {
    /// Effective approval, see [`derive_approval`]
    pub approved: bool,
    /// Deterministic issues first, then model issues
    pub issues: Vec<ReviewIssue>,
    /// Overall assessment
    pub assessment: String,
    /// Reviewer's confidence in the fix, 0-100
    pub fix_confidence: u8,
    /// Suggested improvements
    pub improvements: Vec<String>,
}

impl ReviewOutput {
    /// Feedback for the next generation round, one `[SEVERITY] description` per line
    #[must_use]
    pub fn feedback(&self) -> String {
        feedback_from_issues(&self.issues)
    }

    fn from_json(
        map: &Map<String, Value>,
        deterministic: Vec<ReviewIssue>,
        default_confidence: u8,
    ) -> Result<Self> {
        let fields = Fields::new(map);
        let model_approved = fields.opt_bool(&["approved"]);
        if model_approved.is_none() && fields.get(&["issues"]).is_none() {
            return Err(Error::Validation("review has neither `approved` nor `issues`".to_string()));
        }

        let mut issues = deterministic;
        issues.extend(
            fields
                .object_list(&["issues"])
                .into_iter()
                .map(ReviewIssue::from_json),
        );

        Ok(Self {
            approved: derive_approval(&issues, model_approved),
            assessment: fields.str_or_default(&["assessment", "overallAssessment"]),
            fix_confidence: fields.confidence_or(&["fixConfidence", "fix_confidence"], default_confidence)?,
            improvements: fields.str_list(&["improvements"]),
            issues,
        })
    }
}

/// Effective approval: no CRITICAL issue and the model did not explicitly reject
#[must_use]
pub fn derive_approval(issues: &[ReviewIssue], model_approved: Option<bool>) -> bool {
    let any_critical = issues.iter().any(|i| i.severity == ReviewSeverity::Critical);
    !any_critical && model_approved != Some(false)
}

/// Join issues into `[SEVERITY] description` lines
#[must_use]
pub fn feedback_from_issues(issues: &[ReviewIssue]) -> String {
    issues
        .iter()
        .map(ReviewIssue::feedback_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// One CRITICAL issue per change whose `old_code` is not a literal substring of `file_content`
#[must_use]
pub fn validate_old_code_exists(changes: &[CodeChange], file_content: &str) -> Vec<ReviewIssue> {
    changes
        .iter()
        .enumerate()
        .filter(|(_, change)| !file_content.contains(&change.old_code))
        .map(|(index, change)| old_code_missing(index, change))
        .collect()
}

/// [`validate_old_code_exists`] against each change's own file
///
/// Changes whose file content is unknown get a WARNING, not a CRITICAL.
/// `change_index` always refers to the position in `changes`.
#[must_use]
pub fn validate_old_code_per_file(
    changes: &[CodeChange],
    files: &BTreeMap<String, String>,
) -> Vec<ReviewIssue> {
    changes
        .iter()
        .enumerate()
        .filter_map(|(index, change)| match files.get(&change.file) {
            Some(content) if content.contains(&change.old_code) => None,
            Some(_) => Some(old_code_missing(index, change)),
            None => Some(ReviewIssue::new(
                ReviewSeverity::Warning,
                index,
                format!("Content of {} was not available to verify oldCode", change.file),
            )),
        })
        .collect()
}

fn old_code_missing(index: usize, change: &CodeChange) -> ReviewIssue {
    let preview: String = change.old_code.chars().take(80).collect();
    ReviewIssue {
        severity: ReviewSeverity::Critical,
        change_index: index,
        description: format!("oldCode for change {index} not found in {}: `{preview}`", change.file),
        suggestion: Some("Copy oldCode verbatim from the current file content".to_string()),
    }
}

const SYSTEM_PROMPT: &str = r#"[mender:review] You review proposed fixes to end-to-end tests.
For every change, verify that oldCode matches the supplied file content exactly and that
newCode is syntactically valid and addresses the root cause. Report problems as issues.

Respond with a single JSON object:
{
  "approved": bool,
  "issues": [{"severity": "CRITICAL | WARNING | SUGGESTION", "changeIndex": <int>,
              "description": "...", "suggestion": "..."}],
  "assessment": "...",
  "fixConfidence": <integer 0-100>,
  "improvements": ["..."]
}"#;

/// Review input
#[derive(Debug, Clone)]
pub struct ReviewInput {
    /// Proposed fix
    pub fix: FixGenerationOutput,
    /// Analysis output, when available
    pub analysis: Option<AnalysisOutput>,
    /// Original content of the files the fix touches
    pub files: BTreeMap<String, String>,
}

impl ReviewInput {
    /// Deterministic issues independent of any model call
    #[must_use]
    pub fn deterministic_issues(&self) -> Vec<ReviewIssue> {
        validate_old_code_per_file(&self.fix.changes, &self.files)
    }
}

/// Patch review stage
pub struct ReviewAgent {
    shell: AgentShell,
}

impl ReviewAgent {
    /// System prompt marker
    pub const MARKER: &'static str = "[mender:review]";

    /// Create the agent
    #[must_use]
    pub fn new(shell: AgentShell) -> Self {
        Self { shell }
    }

    fn build_prompt(input: &ReviewInput) -> String {
        let mut prompt = String::new();
        if let Some(analysis) = &input.analysis {
            let _ = writeln!(
                prompt,
                "Root cause: {} ({}%). {}\n",
                analysis.root_cause.as_str(),
                analysis.confidence,
                analysis.explanation
            );
        }
        let _ = writeln!(
            prompt,
            "Proposed fix ({}% confidence): {}\n{}",
            input.fix.confidence, input.fix.summary, input.fix.reasoning
        );
        for (index, change) in input.fix.changes.iter().enumerate() {
            let _ = write!(
                prompt,
                "\nChange {index} in {} at line {} ({:?}):\n--- oldCode\n{}\n+++ newCode\n{}\nJustification: {}\n",
                change.file, change.line, change.change_type, change.old_code, change.new_code, change.justification
            );
        }
        for (path, content) in &input.files {
            let _ = write!(prompt, "\nCurrent content of {path}:\n{}\n", truncate_safe(content, MAX_FILE_CHARS));
        }
        prompt
    }
}

#[async_trait::async_trait]
impl Agent for ReviewAgent {
    type Input = ReviewInput;
    type Output = ReviewOutput;

    fn name(&self) -> &'static str {
        "review"
    }

    #[instrument(skip_all, fields(changes = input.fix.changes.len()))]
    async fn execute(&self, input: &ReviewInput, _context: &RepairContext) -> AgentResult<ReviewOutput> {
        let deterministic = input.deterministic_issues();
        let default_confidence = input.fix.confidence;
        let result = self
            .shell
            .run(self.name(), SYSTEM_PROMPT, UserContent::text(Self::build_prompt(input)), move |map| {
                ReviewOutput::from_json(map, deterministic, default_confidence)
            })
            .await;

        if let Some(output) = &result.data {
            info!(
                approved = output.approved,
                issues = output.issues.len(),
                "Review complete"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::parse::parse_object;

    fn change(old: &str) -> CodeChange {
        CodeChange::replace("a.ts", 1, old, "new")
    }

    #[test]
    fn test_derive_approval_critical_overrides_model() {
        let issues = vec![ReviewIssue::new(ReviewSeverity::Critical, 0, "broken")];
        assert!(!derive_approval(&issues, Some(true)));
        assert!(!derive_approval(&[], Some(false)));
        assert!(derive_approval(&[], Some(true)));
        assert!(derive_approval(&[], None));

        let warnings = vec![ReviewIssue::new(ReviewSeverity::Warning, 0, "meh")];
        assert!(derive_approval(&warnings, Some(true)));
    }

    #[test]
    fn test_model_approval_with_critical_is_rejected() {
        let map = parse_object(
            r#"{"approved": true, "issues": [{"severity": "CRITICAL", "changeIndex": 0, "description": "x"}]}"#,
        )
        .unwrap();
        let output = ReviewOutput::from_json(&map, vec![], 80).unwrap();
        assert!(!output.approved);
        assert_eq!(output.fix_confidence, 80);
        assert_eq!(output.feedback(), "[CRITICAL] x");
    }

    #[test]
    fn test_critical_issue_without_description_still_rejects() {
        let map = parse_object(r#"{"approved": true, "issues": [{"severity": "CRITICAL"}]}"#).unwrap();
        let output = ReviewOutput::from_json(&map, vec![], 80).unwrap();
        assert!(!output.approved);
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.feedback(), "[CRITICAL] (no description)");
    }

    #[test]
    fn test_high_severity_blocks_approval() {
        let map = parse_object(
            r#"{"approved": true, "issues": [{"severity": "HIGH", "changeIndex": 0, "description": "selector absent"}]}"#,
        )
        .unwrap();
        let output = ReviewOutput::from_json(&map, vec![], 80).unwrap();
        assert!(!output.approved);
        assert_eq!(output.issues[0].severity, ReviewSeverity::Critical);

        for raw in ["major", "Fatal", "blocking", "blocker"] {
            assert_eq!(ReviewSeverity::parse(raw), ReviewSeverity::Critical, "{raw}");
        }
        assert_eq!(ReviewSeverity::parse("medium"), ReviewSeverity::Warning);
        assert_eq!(ReviewSeverity::parse("nit"), ReviewSeverity::Suggestion);
    }

    #[test]
    fn test_validate_old_code_exists() {
        let content = "cy.get('#a').click();\ncy.get('#b');";
        let changes = vec![change("cy.get('#a')"), change("cy.get('#zzz')"), change("#b"), change("nope")];

        let issues = validate_old_code_exists(&changes, content);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].change_index, 1);
        assert_eq!(issues[1].change_index, 3);
        assert!(issues.iter().all(|i| i.severity == ReviewSeverity::Critical));

        assert!(validate_old_code_exists(&changes[..1], content).is_empty());
    }

    #[test]
    fn test_validate_per_file_keeps_original_indices() {
        let mut files = BTreeMap::new();
        files.insert("a.ts".to_string(), "alpha".to_string());
        files.insert("b.ts".to_string(), "beta".to_string());
        let changes = vec![
            CodeChange::replace("a.ts", 1, "alpha", "x"),
            CodeChange::replace("b.ts", 1, "alpha", "x"),
            CodeChange::replace("c.ts", 1, "gamma", "x"),
        ];

        let issues = validate_old_code_per_file(&changes, &files);
        assert_eq!(issues.len(), 2);
        assert_eq!((issues[0].change_index, issues[0].severity), (1, ReviewSeverity::Critical));
        assert_eq!((issues[1].change_index, issues[1].severity), (2, ReviewSeverity::Warning));
    }

    #[test]
    fn test_deterministic_issues_come_first() {
        let map = parse_object(
            r#"{"approved": true, "issues": [{"severity": "suggestion", "description": "rename var"}]}"#,
        )
        .unwrap();
        let deterministic = vec![ReviewIssue::new(ReviewSeverity::Critical, 0, "missing")];
        let output = ReviewOutput::from_json(&map, deterministic, 50).unwrap();

        assert!(!output.approved);
        assert_eq!(output.feedback(), "[CRITICAL] missing\n[SUGGESTION] rename var");
    }

    #[test]
    fn test_empty_review_rejects() {
        let map = parse_object(r#"{"assessment": "fine"}"#).unwrap();
        assert!(ReviewOutput::from_json(&map, vec![], 50).is_err());
    }
}
