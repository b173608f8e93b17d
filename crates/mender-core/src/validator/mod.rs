//! Patch validator
//!
//! Pure, deterministic checks on proposed changes against literal file
//! content. Substitution everywhere uses anchored replacement: among the
//! exact occurrences of `old_code`, the one starting nearest `change.line`
//! is replaced (ties go to the earlier occurrence).

mod syntax;

pub use syntax::{is_builtin_command, validate_syntax};

use crate::error::{Error, Result};
use crate::patch::CodeChange;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Longest `cy.wait(ms)` that does not warrant a warning
const MAX_FIXED_WAIT_MS: u64 = 10_000;

static FIXED_WAIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:cy\s*\.\s*wait|waitForTimeout)\(\s*(\d+)\s*\)")
        .expect("FIXED_WAIT regex is a compile-time constant")
});

static FORCE_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bforce\s*:\s*true\b").expect("FORCE_FLAG regex is a compile-time constant")
});

static EVAL_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\beval\s*\(").expect("EVAL_CALL regex is a compile-time constant")
});

static NULLISH_SPREAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.\.\.\s*(?:null|undefined)\b").expect("NULLISH_SPREAD regex is a compile-time constant")
});

static LINE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bline \d+").expect("LINE_NUMBER regex is a compile-time constant")
});

/// Validator verdict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// `errors` is empty
    pub valid: bool,
    /// Blocking problems
    pub errors: Vec<String>,
    /// Non-blocking concerns
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Build a report; `valid` follows from `errors`
    #[must_use]
    pub fn new(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Append another report
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.valid = self.errors.is_empty();
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn risky_patterns(index: usize, new_code: &str, warnings: &mut Vec<String>) {
    for caps in FIXED_WAIT.captures_iter(new_code) {
        if caps[1].parse::<u64>().is_ok_and(|ms| ms > MAX_FIXED_WAIT_MS) {
            warnings.push(format!("Change {index}: fixed wait of {}ms is overlong", &caps[1]));
        }
    }
    if FORCE_FLAG.is_match(new_code) {
        warnings.push(format!("Change {index}: `force: true` bypasses actionability checks"));
    }
    if EVAL_CALL.is_match(new_code) {
        warnings.push(format!("Change {index}: uses eval()"));
    }
    if NULLISH_SPREAD.is_match(new_code) {
        warnings.push(format!("Change {index}: spreads null or undefined"));
    }
}

/// Validate `changes` against the content of the single file they target
#[must_use]
pub fn validate_changes(changes: &[CodeChange], file_content: &str) -> ValidationReport {
    let indexed: Vec<(usize, &CodeChange)> = changes.iter().enumerate().collect();
    validate_indexed(&indexed, file_content)
}

fn validate_indexed(changes: &[(usize, &CodeChange)], file_content: &str) -> ValidationReport {
    let lines: Vec<&str> = file_content.lines().collect();
    let line_count = lines.len();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut seen_lines: HashMap<usize, usize> = HashMap::new();

    for &(index, change) in changes {
        if let Some(first) = seen_lines.get(&change.line) {
            errors.push(format!(
                "Duplicate target line {}: changes {first} and {index} overlap",
                change.line
            ));
        } else {
            seen_lines.insert(change.line, index);
        }

        if change.line == 0 || change.line > line_count {
            errors.push(format!(
                "Change {index}: line {} is out of range (file has {line_count} lines)",
                change.line
            ));
            continue;
        }

        let span = change.old_code.lines().count().max(1);
        let end = (change.line - 1 + span).min(line_count);
        let window = normalize_whitespace(&lines[change.line - 1..end].join("\n"));
        let expected = normalize_whitespace(&change.old_code);
        if expected.is_empty() || !window.contains(&expected) {
            errors.push(format!(
                "Change {index}: oldCode does not match line {}",
                change.line
            ));
        }

        if change.new_code.trim().is_empty() {
            warnings.push(format!("Change {index}: newCode is empty, code will be removed"));
        }
        risky_patterns(index, &change.new_code, &mut warnings);
    }

    ValidationReport::new(errors, warnings)
}

/// Validate a multi-file change set, grouping changes by file
///
/// Changes whose file is not in `files` produce a warning only.
#[must_use]
pub fn validate_change_set(changes: &[CodeChange], files: &BTreeMap<String, String>) -> ValidationReport {
    let mut by_file: BTreeMap<&str, Vec<(usize, &CodeChange)>> = BTreeMap::new();
    for (index, change) in changes.iter().enumerate() {
        by_file.entry(change.file.as_str()).or_default().push((index, change));
    }

    let mut report = ValidationReport::new(Vec::new(), Vec::new());
    for (file, group) in by_file {
        match files.get(file) {
            Some(content) => {
                let mut file_report = validate_indexed(&group, content);
                for message in file_report.errors.iter_mut().chain(file_report.warnings.iter_mut()) {
                    *message = format!("{file}: {message}");
                }
                report.merge(file_report);
            }
            None => report
                .warnings
                .push(format!("{file}: content unavailable, {} change(s) not validated", group.len())),
        }
    }
    report
}

/// Messages in `after` not accounted for by `before`, prefixed with `file`
///
/// Line numbers are ignored when matching since edits shift the lines of
/// untouched code. Each message in `before` absorbs one match.
fn introduced_only(before: &[String], after: Vec<String>, file: &str) -> Vec<String> {
    let mut existing: HashMap<String, usize> = HashMap::new();
    for message in before {
        *existing.entry(LINE_NUMBER.replace_all(message, "line").into_owned()).or_default() += 1;
    }
    after
        .into_iter()
        .filter(|message| {
            match existing.get_mut(LINE_NUMBER.replace_all(message, "line").as_ref()) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    false
                }
                _ => true,
            }
        })
        .map(|message| format!("{file}: {message}"))
        .collect()
}

/// Validate a change set and the syntax of every patched file
///
/// Syntax errors already present in the original content are ignored so
/// that only errors the patch introduces block it.
#[must_use]
pub fn validate_fix(changes: &[CodeChange], files: &BTreeMap<String, String>) -> ValidationReport {
    let mut report = validate_change_set(changes, files);
    if !report.valid {
        return report;
    }

    let mut by_file: BTreeMap<&str, Vec<CodeChange>> = BTreeMap::new();
    for change in changes {
        by_file.entry(change.file.as_str()).or_default().push(change.clone());
    }
    for (file, group) in by_file {
        let Some(original) = files.get(file) else {
            continue;
        };
        let patched = match apply_changes(original, &group) {
            Ok(patched) => patched,
            Err(e) => {
                report.merge(ValidationReport::new(vec![format!("{file}: {e}")], Vec::new()));
                continue;
            }
        };
        let before = validate_syntax(original);
        let after = validate_syntax(&patched);
        let introduced = introduced_only(&before.errors, after.errors, file);
        let warnings = introduced_only(&before.warnings, after.warnings, file);
        report.merge(ValidationReport::new(introduced, warnings));
    }
    report
}

/// 1-based start lines of every exact occurrence of `needle`
#[must_use]
pub fn occurrence_lines(content: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    content
        .match_indices(needle)
        .map(|(idx, _)| 1 + content[..idx].matches('\n').count())
        .collect()
}

/// Replace the occurrence of `old_code` nearest `line`
///
/// Returns `None` when `old_code` does not occur.
#[must_use]
pub fn replace_anchored(content: &str, old_code: &str, new_code: &str, line: usize) -> Option<String> {
    if old_code.is_empty() {
        return None;
    }
    let mut best: Option<(usize, usize)> = None;
    let mut current_line = 1usize;
    let mut scanned = 0usize;
    for (idx, _) in content.match_indices(old_code) {
        current_line += content[scanned..idx].matches('\n').count();
        scanned = idx;
        let distance = current_line.abs_diff(line);
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((idx, distance));
        }
    }

    let (idx, _) = best?;
    let mut patched = String::with_capacity(content.len() + new_code.len());
    patched.push_str(&content[..idx]);
    patched.push_str(new_code);
    patched.push_str(&content[idx + old_code.len()..]);
    Some(patched)
}

/// Apply `changes` to one file's content in descending line order
pub fn apply_changes(file_content: &str, changes: &[CodeChange]) -> Result<String> {
    let mut order: Vec<usize> = (0..changes.len()).collect();
    order.sort_by(|a, b| changes[*b].line.cmp(&changes[*a].line));

    let mut content = file_content.to_string();
    for index in order {
        let change = &changes[index];
        content = replace_anchored(&content, &change.old_code, &change.new_code, change.line)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "change {index}: oldCode not found in {}",
                    change.file
                ))
            })?;
    }
    Ok(content)
}

#[cfg(test)]
mod tests;
