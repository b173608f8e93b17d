//! Fix-Generation agent

use super::analysis::AnalysisOutput;
use super::code_reading::MAX_FILE_CHARS;
use super::investigation::InvestigationOutput;
use super::parse::Fields;
use super::selectors::{extract_selectors, mentions_selector};
use super::{Agent, AgentResult, AgentShell, UserContent};
use crate::context::RepairContext;
use crate::error::{Error, Result};
use crate::patch::{ChangeType, CodeChange, FixRecommendation};
use crate::validator::occurrence_lines;
use mender_llm::util::truncate_safe;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use tracing::{info, instrument, warn};

/// Fix-Generation output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixGenerationOutput {
    /// Proposed edits, never empty
    pub changes: Vec<CodeChange>,
    /// 0-100
    pub confidence: u8,
    /// One-line summary
    pub summary: String,
    /// Reasoning
    pub reasoning: String,
    /// Evidence backing the fix
    pub evidence: Vec<String>,
    /// Known risks
    pub risks: Vec<String>,
}

impl FixGenerationOutput {
    /// Convert into the pipeline output contract
    #[must_use]
    pub fn into_recommendation(self) -> FixRecommendation {
        FixRecommendation {
            confidence: self.confidence,
            summary: self.summary,
            proposed_changes: self.changes,
            evidence: self.evidence,
            reasoning: self.reasoning,
        }
    }

    fn from_json(map: &Map<String, Value>, context: &RepairContext) -> Result<Self> {
        let fields = Fields::new(map);

        let raw_changes = fields.object_list(&["changes"]);
        if raw_changes.is_empty() {
            return Err(Error::Validation("fix contains no changes".to_string()));
        }
        let changes = raw_changes
            .into_iter()
            .enumerate()
            .map(|(index, raw)| parse_change(index, raw, context))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            changes,
            confidence: fields.required_confidence(&["confidence"])?,
            summary: fields.str_or_default(&["summary"]),
            reasoning: fields.str_or_default(&["reasoning"]),
            evidence: fields.str_list(&["evidence"]),
            risks: fields.str_list(&["risks"]),
        })
    }
}

fn parse_change(index: usize, raw: &Map<String, Value>, context: &RepairContext) -> Result<CodeChange> {
    let fields = Fields::new(raw);
    let old_code = fields
        .required_str(&["oldCode", "old_code"])
        .map_err(|_| Error::Validation(format!("change {index} is missing oldCode")))?
        .to_string();
    let new_code = match fields.get(&["newCode", "new_code"]) {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(Error::Validation(format!("change {index} is missing newCode"))),
    };
    let file = fields
        .opt_str(&["file", "path"])
        .unwrap_or_else(|| context.test_file.clone());

    let line = match fields.opt_u64(&["line", "lineNumber"]).filter(|l| *l > 0) {
        Some(line) => line as usize,
        None => context
            .file_content(&file)
            .and_then(|content| occurrence_lines(content, &old_code).into_iter().next())
            .ok_or_else(|| Error::Validation(format!("change {index} has no line number")))?,
    };

    Ok(CodeChange {
        file,
        line,
        old_code,
        new_code,
        justification: fields.str_or_default(&["justification", "reason"]),
        change_type: ChangeType::parse(&fields.str_or_default(&["changeType", "change_type", "type"])),
    })
}

/// Selectors introduced by `new_code` that no evidence supports
#[must_use]
pub fn unverified_selectors(
    changes: &[CodeChange],
    context: &RepairContext,
    investigation: Option<&InvestigationOutput>,
) -> Vec<String> {
    let known: Vec<&str> = investigation
        .map(|inv| inv.known_selectors().collect())
        .unwrap_or_default();
    let patches: Vec<&str> = context
        .diff
        .iter()
        .flat_map(|d| d.files.iter().filter_map(|f| f.patch.as_deref()))
        .collect();

    let mut unverified: Vec<String> = Vec::new();
    for change in changes {
        let before = extract_selectors(&change.old_code);
        for selector in extract_selectors(&change.new_code) {
            if before.contains(&selector) || unverified.contains(&selector) {
                continue;
            }
            let in_sources = context
                .source_files
                .iter()
                .filter(|(path, _)| **path != context.test_file)
                .any(|(_, content)| mentions_selector(content, &selector));
            let in_diff = patches.iter().any(|p| mentions_selector(p, &selector));
            let suggested = known.iter().any(|k| *k == selector);
            if !(in_sources || in_diff || suggested) {
                unverified.push(selector);
            }
        }
    }
    unverified
}

const SYSTEM_PROMPT: &str = r#"[mender:fix-generation] You repair failing end-to-end tests by editing test code.
Propose minimal literal edits. `oldCode` must be copied verbatim from the file shown,
`line` is the 1-based line where it starts. Only use selectors that appear in the provided
sources, the diff, or the investigation's suggested replacements.

Respond with a single JSON object:
{
  "changes": [{
    "file": "<path>", "line": <int>, "oldCode": "<exact text>", "newCode": "<replacement>",
    "justification": "...", "changeType": "replace | insert | delete"
  }],
  "confidence": <integer 0-100>,
  "summary": "...", "reasoning": "...", "evidence": ["..."], "risks": ["..."]
}"#;

/// Fix-Generation input
#[derive(Debug, Clone, Default)]
pub struct FixGenerationInput {
    /// Analysis output, absent in single-shot mode
    pub analysis: Option<AnalysisOutput>,
    /// Investigation output, absent in single-shot mode
    pub investigation: Option<InvestigationOutput>,
    /// `[SEVERITY] description` lines from the previous review
    pub previous_feedback: Option<String>,
}

/// Patch proposal stage
pub struct FixGenerationAgent {
    shell: AgentShell,
}

fn numbered(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + content.len() / 8);
    for (i, line) in content.lines().enumerate() {
        let _ = writeln!(out, "{:>4} | {line}", i + 1);
    }
    out
}

impl FixGenerationAgent {
    /// System prompt marker
    pub const MARKER: &'static str = "[mender:fix-generation]";

    /// Create the agent
    #[must_use]
    pub fn new(shell: AgentShell) -> Self {
        Self { shell }
    }

    fn build_prompt(input: &FixGenerationInput, context: &RepairContext) -> String {
        let mut prompt = format!("Error: {}\n", context.error_message);
        if let Some(stack) = &context.stack_trace {
            let _ = writeln!(prompt, "Stack trace:\n{}", truncate_safe(stack, 2000));
        }

        if let Some(analysis) = &input.analysis {
            let _ = writeln!(
                prompt,
                "\nRoot cause: {} ({}%). {}",
                analysis.root_cause.as_str(),
                analysis.confidence,
                analysis.explanation
            );
        }

        if let Some(investigation) = &input.investigation {
            if let Some(primary) = &investigation.primary_finding {
                let _ = writeln!(prompt, "Primary finding: {}", primary.description);
            }
            let _ = writeln!(prompt, "Recommended approach: {}", investigation.recommended_approach);
            for update in &investigation.selectors_to_update {
                let _ = writeln!(
                    prompt,
                    "Replace selector {} with {} ({})",
                    update.old_selector, update.new_selector, update.reason
                );
            }
        }

        match context.test_file_content.as_deref() {
            Some(content) => {
                let _ = write!(prompt, "\nFile {}:\n{}", context.test_file, numbered(truncate_safe(content, MAX_FILE_CHARS)));
            }
            None => {
                let _ = writeln!(prompt, "\nFile {} (content unavailable)", context.test_file);
            }
        }
        for (path, content) in context.source_files.iter().filter(|(p, _)| **p != context.test_file) {
            let _ = write!(prompt, "\nFile {path}:\n{}", numbered(truncate_safe(content, 4000)));
        }

        if let Some(feedback) = &input.previous_feedback {
            let _ = write!(prompt, "\nThe previous attempt was rejected:\n{feedback}\n");
        }
        prompt
    }
}

#[async_trait::async_trait]
impl Agent for FixGenerationAgent {
    type Input = FixGenerationInput;
    type Output = FixGenerationOutput;

    fn name(&self) -> &'static str {
        "fix-generation"
    }

    #[instrument(skip_all, fields(has_feedback = input.previous_feedback.is_some()))]
    async fn execute(
        &self,
        input: &FixGenerationInput,
        context: &RepairContext,
    ) -> AgentResult<FixGenerationOutput> {
        let prompt = Self::build_prompt(input, context);
        let mut result = self
            .shell
            .run(self.name(), SYSTEM_PROMPT, UserContent::text(prompt), |map| {
                FixGenerationOutput::from_json(map, context)
            })
            .await;

        if let Some(output) = result.data.as_mut() {
            let unverified = unverified_selectors(&output.changes, context, input.investigation.as_ref());
            if !unverified.is_empty() {
                warn!(selectors = ?unverified, "Fix introduces unverified selectors");
            }
            output.risks.extend(
                unverified
                    .into_iter()
                    .map(|s| format!("Unverified selector {s}: not present in fetched sources or diff")),
            );
            info!(
                changes = output.changes.len(),
                confidence = output.confidence,
                "Fix generated"
            );
        }
        result
    }
}
