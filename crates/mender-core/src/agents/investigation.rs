//! Investigation agent: the evidence bridge between analysis and fixing
//!
//! Selector claims are first cross-referenced deterministically against the
//! fetched sources and the diff. That evidence goes into the prompt, backs
//! derived findings that are merged with the model's, and seeds selector
//! replacements when the model proposes none.

use super::analysis::AnalysisOutput;
use super::code_reading::{CodeReadingOutput, MAX_FILE_CHARS};
use super::parse::{normalize_enum, Fields};
use super::selectors::{attribute_selectors, mentions_selector, selector_attribute};
use super::{Agent, AgentResult, AgentShell, UserContent};
use crate::context::RepairContext;
use crate::error::Result;
use mender_llm::util::truncate_safe;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use tracing::{debug, info, instrument};

/// Kind of finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingType {
    /// A selector was renamed or removed
    SelectorChange,
    /// The element does not exist anywhere
    MissingElement,
    /// Test does not wait for something it needs
    TimingGap,
    /// Leaked or missing state
    StateIssue,
    /// A code change explains the failure
    CodeChange,
    /// Anything else
    Other,
}

impl FindingType {
    fn parse(raw: &str) -> Self {
        match normalize_enum(raw).as_str() {
            "SELECTOR_CHANGE" => Self::SelectorChange,
            "MISSING_ELEMENT" => Self::MissingElement,
            "TIMING_GAP" => Self::TimingGap,
            "STATE_ISSUE" => Self::StateIssue,
            "CODE_CHANGE" => Self::CodeChange,
            _ => Self::Other,
        }
    }
}

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Most likely explanation
    High,
    /// Plausible contributor
    Medium,
    /// Weak signal
    Low,
}

impl Severity {
    fn parse(raw: &str) -> Self {
        match normalize_enum(raw).as_str() {
            "HIGH" | "CRITICAL" => Self::High,
            "LOW" => Self::Low,
            _ => Self::Medium,
        }
    }

    /// Sort key, highest first
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

/// One piece of evidence-backed reasoning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationFinding {
    /// Kind
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    /// Severity
    pub severity: Severity,
    /// What was found
    pub description: String,
    /// Supporting evidence
    pub evidence: Vec<String>,
    /// `file:line` or file path
    pub location: Option<String>,
    /// How it connects to the observed error
    pub relation_to_error: String,
}

impl InvestigationFinding {
    fn from_json(map: &Map<String, Value>) -> Option<Self> {
        let fields = Fields::new(map);
        let description = fields.opt_str(&["description"])?;
        Some(Self {
            finding_type: FindingType::parse(&fields.str_or_default(&["type", "findingType"])),
            severity: Severity::parse(&fields.str_or_default(&["severity"])),
            description,
            evidence: fields.str_list(&["evidence"]),
            location: fields.opt_str(&["location"]),
            relation_to_error: fields.str_or_default(&["relationToError", "relation_to_error"]),
        })
    }

    fn mentions(&self, key: &str) -> bool {
        self.description.contains(key) || self.evidence.iter().any(|e| e.contains(key))
    }
}

/// Deterministic cross-reference for one selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorEvidence {
    /// The selector
    pub selector: String,
    /// Referenced by the test file
    pub in_test_file: bool,
    /// Related files that mention it
    pub found_in_files: Vec<String>,
    /// Appears on a removed diff line
    pub removed_in_diff: bool,
    /// Appears on an added diff line
    pub added_in_diff: bool,
    /// Selectors on added lines of the same files using the same attribute
    pub replacement_candidates: Vec<String>,
}

impl SelectorEvidence {
    /// Removed by the diff and not re-added
    #[must_use]
    pub fn was_renamed_or_removed(&self) -> bool {
        self.removed_in_diff && !self.added_in_diff
    }

    /// Present somewhere in the fetched application sources or the diff
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.found_in_files.is_empty() || self.added_in_diff
    }
}

/// A selector the test should stop using
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorUpdate {
    /// Selector currently in the test
    pub old_selector: String,
    /// Suggested replacement
    pub new_selector: String,
    /// Why
    pub reason: String,
}

impl SelectorUpdate {
    fn from_json(map: &Map<String, Value>) -> Option<Self> {
        let fields = Fields::new(map);
        Some(Self {
            old_selector: fields.opt_str(&["oldSelector", "old_selector", "old"])?,
            new_selector: fields.opt_str(&["newSelector", "new_selector", "new"])?,
            reason: fields.str_or_default(&["reason"]),
        })
    }
}

/// Investigation stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationOutput {
    /// Findings, highest severity first
    pub findings: Vec<InvestigationFinding>,
    /// The finding that best explains the failure
    pub primary_finding: Option<InvestigationFinding>,
    /// Whether editing the test alone can fix the failure
    pub is_test_code_fixable: bool,
    /// Recommended approach
    pub recommended_approach: String,
    /// Selector replacements
    pub selectors_to_update: Vec<SelectorUpdate>,
    /// 0-100
    pub confidence: u8,
    /// Deterministic cross-reference behind the findings
    pub selector_evidence: Vec<SelectorEvidence>,
}

impl InvestigationOutput {
    /// Every selector this investigation surfaced as present or plausible
    pub fn known_selectors(&self) -> impl Iterator<Item = &str> {
        self.selectors_to_update
            .iter()
            .map(|u| u.new_selector.as_str())
            .chain(
                self.selector_evidence
                    .iter()
                    .flat_map(|e| e.replacement_candidates.iter().map(String::as_str)),
            )
    }

    fn from_json(map: &Map<String, Value>, evidence: Vec<SelectorEvidence>) -> Result<Self> {
        let fields = Fields::new(map);

        let is_test_code_fixable = fields
            .opt_bool(&["isTestCodeFixable", "is_test_code_fixable"])
            .ok_or_else(|| {
                crate::Error::Validation("missing required field `isTestCodeFixable`".to_string())
            })?;

        let mut findings: Vec<InvestigationFinding> = fields
            .object_list(&["findings"])
            .into_iter()
            .filter_map(InvestigationFinding::from_json)
            .collect();
        findings.extend(derived_findings(&evidence, &findings));
        findings.sort_by_key(|f| f.severity.rank());

        let primary_finding = fields
            .object(&["primaryFinding", "primary_finding"])
            .and_then(InvestigationFinding::from_json)
            .or_else(|| findings.first().cloned());

        let mut selectors_to_update: Vec<SelectorUpdate> = fields
            .object_list(&["selectorsToUpdate", "selectors_to_update"])
            .into_iter()
            .filter_map(SelectorUpdate::from_json)
            .collect();
        if selectors_to_update.is_empty() {
            selectors_to_update = derived_updates(&evidence);
        }

        Ok(Self {
            findings,
            primary_finding,
            is_test_code_fixable,
            recommended_approach: fields.str_or_default(&["recommendedApproach", "recommended_approach"]),
            selectors_to_update,
            confidence: fields.required_confidence(&["confidence"])?,
            selector_evidence: evidence,
        })
    }
}

/// Cross-reference `selectors` against sources and diff
#[must_use]
pub fn collect_evidence(
    selectors: &[String],
    code: Option<&CodeReadingOutput>,
    context: &RepairContext,
) -> Vec<SelectorEvidence> {
    let test_content = code
        .map(|c| c.test_file_content.as_str())
        .or(context.test_file_content.as_deref())
        .unwrap_or_default();

    selectors
        .iter()
        .map(|selector| {
            let found_in_files = code
                .map(|c| {
                    c.related_files
                        .iter()
                        .filter(|f| mentions_selector(&f.content, selector))
                        .map(|f| f.path.clone())
                        .collect()
                })
                .unwrap_or_default();

            let mut evidence = SelectorEvidence {
                selector: selector.clone(),
                in_test_file: mentions_selector(test_content, selector),
                found_in_files,
                removed_in_diff: false,
                added_in_diff: false,
                replacement_candidates: Vec::new(),
            };

            if let Some(diff) = &context.diff {
                let removed_in: Vec<&str> = diff
                    .removed_lines()
                    .filter(|(_, line)| mentions_selector(line, selector))
                    .map(|(file, _)| file)
                    .collect();
                evidence.removed_in_diff = !removed_in.is_empty();
                evidence.added_in_diff = diff.added_lines().any(|(_, line)| mentions_selector(line, selector));

                if let Some(attribute) = selector_attribute(selector) {
                    for (file, line) in diff.added_lines() {
                        if !removed_in.contains(&file) {
                            continue;
                        }
                        for candidate in attribute_selectors(line, &attribute) {
                            if candidate != *selector && !evidence.replacement_candidates.contains(&candidate) {
                                evidence.replacement_candidates.push(candidate);
                            }
                        }
                    }
                }
            }
            evidence
        })
        .collect()
}

fn derived_findings(
    evidence: &[SelectorEvidence],
    existing: &[InvestigationFinding],
) -> Vec<InvestigationFinding> {
    evidence
        .iter()
        .filter(|e| e.was_renamed_or_removed())
        .filter(|e| {
            !existing
                .iter()
                .any(|f| f.finding_type == FindingType::SelectorChange && f.mentions(&e.selector))
        })
        .map(|e| {
            let mut items = vec![format!("`{}` appears only on removed diff lines", e.selector)];
            if !e.replacement_candidates.is_empty() {
                items.push(format!("added lines use {}", e.replacement_candidates.join(", ")));
            }
            InvestigationFinding {
                finding_type: FindingType::SelectorChange,
                severity: Severity::High,
                description: format!("Selector {} was removed or renamed by the diff", e.selector),
                evidence: items,
                location: None,
                relation_to_error: "The test still queries a selector the application no longer renders".to_string(),
            }
        })
        .collect()
}

fn derived_updates(evidence: &[SelectorEvidence]) -> Vec<SelectorUpdate> {
    evidence
        .iter()
        .filter(|e| e.was_renamed_or_removed() && e.replacement_candidates.len() == 1)
        .map(|e| SelectorUpdate {
            old_selector: e.selector.clone(),
            new_selector: e.replacement_candidates[0].clone(),
            reason: "renamed in the associated diff".to_string(),
        })
        .collect()
}

const SYSTEM_PROMPT: &str = r#"[mender:investigation] You investigate end-to-end test failures.
Cross-reference the analysis, the test code, the application sources and the diff.
Only cite selectors that the provided evidence shows to exist or to have been renamed.

Respond with a single JSON object:
{
  "findings": [{
    "type": "SELECTOR_CHANGE | MISSING_ELEMENT | TIMING_GAP | STATE_ISSUE | CODE_CHANGE | OTHER",
    "severity": "HIGH | MEDIUM | LOW",
    "description": "...", "evidence": ["..."], "location": "file:line", "relationToError": "..."
  }],
  "primaryFinding": { <one finding> },
  "isTestCodeFixable": bool,
  "recommendedApproach": "...",
  "selectorsToUpdate": [{"oldSelector": "...", "newSelector": "...", "reason": "..."}],
  "confidence": <integer 0-100>
}"#;

/// Investigation input
#[derive(Debug, Clone)]
pub struct InvestigationInput {
    /// Analysis output
    pub analysis: AnalysisOutput,
    /// Code-Reading output, absent when that stage failed
    pub code: Option<CodeReadingOutput>,
}

/// Evidence cross-referencing stage
pub struct InvestigationAgent {
    shell: AgentShell,
}

impl InvestigationAgent {
    /// System prompt marker
    pub const MARKER: &'static str = "[mender:investigation]";

    /// Create the agent
    #[must_use]
    pub fn new(shell: AgentShell) -> Self {
        Self { shell }
    }

    fn selectors(input: &InvestigationInput, context: &RepairContext) -> Vec<String> {
        let mut selectors = Vec::new();
        for selector in context.error_selector.iter().chain(&input.analysis.selectors) {
            if !selector.trim().is_empty() && !selectors.contains(selector) {
                selectors.push(selector.clone());
            }
        }
        selectors
    }

    fn build_prompt(
        input: &InvestigationInput,
        context: &RepairContext,
        evidence: &[SelectorEvidence],
    ) -> String {
        let analysis = &input.analysis;
        let mut prompt = format!(
            "Error: {}\n\nAnalysis: {} ({}% confidence)\n{}\nSuggested approach: {}\n",
            context.error_message,
            analysis.root_cause.as_str(),
            analysis.confidence,
            analysis.explanation,
            analysis.suggested_approach
        );

        if !evidence.is_empty() {
            prompt.push_str("\nSelector evidence:\n");
            for e in evidence {
                let _ = writeln!(
                    prompt,
                    "- {}: in test file={}, in files={:?}, removed in diff={}, added in diff={}, candidates={:?}",
                    e.selector, e.in_test_file, e.found_in_files, e.removed_in_diff, e.added_in_diff, e.replacement_candidates
                );
            }
        }

        if let Some(code) = &input.code {
            let _ = write!(
                prompt,
                "\nTest file {}:\n{}\n",
                context.test_file,
                truncate_safe(&code.test_file_content, MAX_FILE_CHARS)
            );
            let _ = writeln!(prompt, "\nCode summary: {}", code.summary);
            for file in &code.related_files {
                let _ = write!(prompt, "\n--- {} ---\n{}\n", file.path, truncate_safe(&file.content, 4000));
            }
        } else {
            prompt.push_str("\nSource files could not be fetched.\n");
        }

        if let Some(diff) = &context.diff {
            let _ = writeln!(prompt, "\nDiff: {}", diff.summary);
            for file in &diff.files {
                if let Some(patch) = &file.patch {
                    let _ = write!(prompt, "\n--- {} ---\n{}\n", file.filename, truncate_safe(patch, 4000));
                }
            }
        }
        prompt
    }
}

#[async_trait::async_trait]
impl Agent for InvestigationAgent {
    type Input = InvestigationInput;
    type Output = InvestigationOutput;

    fn name(&self) -> &'static str {
        "investigation"
    }

    #[instrument(skip_all, fields(root_cause = input.analysis.root_cause.as_str()))]
    async fn execute(
        &self,
        input: &InvestigationInput,
        context: &RepairContext,
    ) -> AgentResult<InvestigationOutput> {
        let selectors = Self::selectors(input, context);
        let evidence = collect_evidence(&selectors, input.code.as_ref(), context);
        debug!(selectors = selectors.len(), "Collected selector evidence");

        let prompt = Self::build_prompt(input, context, &evidence);
        let content = UserContent::text(prompt).with_images(context.images());
        let result = self
            .shell
            .run(self.name(), SYSTEM_PROMPT, content, move |map| {
                InvestigationOutput::from_json(map, evidence)
            })
            .await;

        if let Some(output) = &result.data {
            info!(
                findings = output.findings.len(),
                fixable = output.is_test_code_fixable,
                confidence = output.confidence,
                "Investigation complete"
            );
        }
        result
    }
}
