//! `mender validate`

use super::{print_json, read_json};
use anyhow::{Context, Result};
use clap::Args;
use mender_core::{apply_changes, validate_changes, validate_syntax, CodeChange, ValidationReport};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// File the changes target
    #[arg(long)]
    pub file: PathBuf,

    /// JSON array of changes
    #[arg(long)]
    pub changes: PathBuf,
}

pub async fn run(args: ValidateArgs) -> Result<ExitCode> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let changes: Vec<CodeChange> = read_json(&args.changes)?;

    let report = check(&changes, &content);
    print_json(&report)?;
    Ok(if report.valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Change checks, then syntax of the patched content
fn check(changes: &[CodeChange], content: &str) -> ValidationReport {
    let mut report = validate_changes(changes, content);
    if report.valid {
        match apply_changes(content, changes) {
            Ok(patched) => report.merge(validate_syntax(&patched)),
            Err(e) => report.merge(ValidationReport::new(vec![e.to_string()], Vec::new())),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = "it('logs in', () => {\n  cy.get('#submit').click();\n});\n";

    #[test]
    fn test_check_accepts_clean_patch() {
        let changes = vec![CodeChange::replace("a.cy.ts", 2, "cy.get('#submit')", "cy.get('#login')")];
        let report = check(&changes, SPEC);
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn test_check_reports_broken_syntax() {
        let changes = vec![CodeChange::replace("a.cy.ts", 2, ".click();", ".click(;")];
        let report = check(&changes, SPEC);
        assert!(!report.valid);
    }

    #[test]
    fn test_check_skips_syntax_when_changes_fail() {
        let changes = vec![CodeChange::replace("a.cy.ts", 9, "cy.get('#submit')", "cy.get('#login')")];
        let report = check(&changes, SPEC);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
    }
}
