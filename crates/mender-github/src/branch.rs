//! Fix branch naming

use chrono::{DateTime, Utc};

/// Longest branch name produced
pub const MAX_BRANCH_LEN: usize = 100;

/// Longest file-stem component
const MAX_STEM_LEN: usize = 40;

fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' };
        if !(c == '-' && (out.is_empty() || out.ends_with('-'))) {
            out.push(c);
        }
    }
    out
}

/// File name up to its first dot, sanitised
fn file_stem(file: &str) -> String {
    let name = file.rsplit('/').next().unwrap_or(file);
    let stem = name.split('.').next().unwrap_or(name);
    let mut stem = sanitize(stem);
    stem.truncate(MAX_STEM_LEN);
    let stem = stem.trim_matches('-').to_string();
    if stem.is_empty() {
        "test".to_string()
    } else {
        stem
    }
}

/// `{prefix}{stem}-{YYYYMMDD-HHMMSS}`, plus a 6-hex suffix when `unique`
///
/// The prefix is used verbatim. Only the generated part is reduced to
/// `[a-z0-9-]`, and the stem is shortened to keep the name within
/// [`MAX_BRANCH_LEN`]. A prefix too long to leave room for a stem yields
/// `{prefix}{YYYYMMDD-HHMMSS}` even past the cap.
#[must_use]
pub fn branch_name(prefix: &str, file: &str, at: DateTime<Utc>, unique: bool) -> String {
    let mut stamp = at.format("%Y%m%d-%H%M%S").to_string();
    if unique {
        let id = uuid::Uuid::new_v4().simple().to_string();
        stamp.push('-');
        stamp.push_str(&id[..6]);
    }

    let budget = MAX_BRANCH_LEN.saturating_sub(prefix.len() + stamp.len() + 1);
    let mut stem = file_stem(file);
    stem.truncate(budget);
    let stem = stem.trim_end_matches('-');
    if stem.is_empty() {
        format!("{prefix}{stamp}")
    } else {
        format!("{prefix}{stem}-{stamp}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 9, 5, 7).unwrap()
    }

    fn allowed(name: &str) -> bool {
        name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '/' || c == '-')
    }

    #[test]
    fn test_branch_name_format() {
        let name = branch_name("fix/mender/", "cypress/e2e/Login Flow.cy.ts", at(), false);
        assert_eq!(name, "fix/mender/login-flow-20261014-090507");
    }

    #[test]
    fn test_unique_suffix_differs() {
        let first = branch_name("fix/mender/", "cypress/e2e/login.cy.ts", at(), false);
        let retry = branch_name("fix/mender/", "cypress/e2e/login.cy.ts", at(), true);
        assert_ne!(first, retry);
        assert!(retry.starts_with(&first));
        assert_eq!(retry.len(), first.len() + 7);
        assert!(allowed(&retry));
    }

    #[test]
    fn test_sanitizes_generated_part_only() {
        let name = branch_name("Fix//Mender_", "tests/ÜBER..spec ~^:.ts", at(), true);
        assert!(name.starts_with("Fix//Mender_"), "{name}");
        let generated = &name["Fix//Mender_".len()..];
        assert!(allowed(generated), "{name}");
        assert!(!generated.contains('/'));
        assert!(!generated.contains("--"));
    }

    #[test]
    fn test_empty_stem_and_length_cap() {
        assert_eq!(
            branch_name("fix/", ".hidden.ts", at(), false),
            "fix/test-20261014-090507"
        );

        let long_file = format!("{}.cy.ts", "x".repeat(200));
        let name = branch_name("fix/mender/", &long_file, at(), true);
        assert!(name.len() <= MAX_BRANCH_LEN);
        assert!(allowed(&name));
        assert!(name.contains("20261014-090507"));
    }

    #[test]
    fn test_long_prefix_is_kept_whole() {
        let prefix = format!("automation/{}/", "team".repeat(14));
        let long_file = format!("{}.cy.ts", "checkout".repeat(10));
        let name = branch_name(&prefix, &long_file, at(), false);
        assert!(name.starts_with(&prefix), "{name}");
        assert!(name.len() <= MAX_BRANCH_LEN, "{name}");
        assert!(name.ends_with("-20261014-090507"), "{name}");

        let oversized = format!("{}/", "p".repeat(120));
        let name = branch_name(&oversized, &long_file, at(), false);
        assert_eq!(name, format!("{oversized}20261014-090507"));
    }
}
