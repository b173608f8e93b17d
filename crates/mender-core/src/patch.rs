//! Patch model shared by the generator, the validator and the applier

use serde::{Deserialize, Serialize};

/// Kind of edit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Replace `old_code` with `new_code`
    #[default]
    Replace,
    /// Insert `new_code` around the anchor `old_code`
    Insert,
    /// Remove `old_code`
    Delete,
}

impl ChangeType {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "insert" | "add" => Self::Insert,
            "delete" | "remove" => Self::Delete,
            _ => Self::Replace,
        }
    }
}

/// A single-location literal source edit
///
/// `old_code` must be a verbatim substring of `file` when applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    /// Repository-relative path
    pub file: String,
    /// 1-based line where `old_code` starts
    pub line: usize,
    /// Text to replace
    pub old_code: String,
    /// Replacement text
    pub new_code: String,
    /// Why the edit is needed
    #[serde(default)]
    pub justification: String,
    /// Kind of edit
    #[serde(default)]
    pub change_type: ChangeType,
}

impl CodeChange {
    /// Create a replacement
    #[must_use]
    pub fn replace(
        file: impl Into<String>,
        line: usize,
        old_code: impl Into<String>,
        new_code: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            old_code: old_code.into(),
            new_code: new_code.into(),
            justification: String::new(),
            change_type: ChangeType::Replace,
        }
    }

    /// Set the justification
    #[must_use]
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }
}

/// The pipeline's accepted fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixRecommendation {
    /// 0-100
    pub confidence: u8,
    /// One-line summary
    pub summary: String,
    /// Edits to apply
    pub proposed_changes: Vec<CodeChange>,
    /// Evidence backing the fix
    pub evidence: Vec<String>,
    /// Reasoning
    pub reasoning: String,
}

impl FixRecommendation {
    /// Distinct files touched, in first-seen order
    #[must_use]
    pub fn files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::new();
        for change in &self.proposed_changes {
            if !files.contains(&change.file.as_str()) {
                files.push(&change.file);
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_deserialize_defaults() {
        let change: CodeChange = serde_json::from_value(serde_json::json!({
            "file": "a.ts", "line": 3, "oldCode": "x", "newCode": "y"
        }))
        .unwrap();
        assert_eq!(change.change_type, ChangeType::Replace);
        assert!(change.justification.is_empty());
    }

    #[test]
    fn test_recommendation_files_deduplicated() {
        let fix = FixRecommendation {
            confidence: 80,
            summary: String::new(),
            proposed_changes: vec![
                CodeChange::replace("a.ts", 1, "x", "y"),
                CodeChange::replace("b.ts", 1, "x", "y"),
                CodeChange::replace("a.ts", 9, "p", "q"),
            ],
            evidence: vec![],
            reasoning: String::new(),
        };
        assert_eq!(fix.files(), vec!["a.ts", "b.ts"]);
    }
}
