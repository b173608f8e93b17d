use super::*;

const FILE: &str = "describe('login', () => {\n  it('submits', () => {\n    cy.get('[data-testid=\"submit\"]').click();\n    cy.get('#email').type('a@b.c');\n  });\n});\n";

fn change(line: usize, old: &str, new: &str) -> CodeChange {
    CodeChange::replace("cypress/e2e/login.cy.ts", line, old, new)
}

#[test]
fn test_valid_change() {
    let changes = vec![change(3, "cy.get('[data-testid=\"submit\"]')", "cy.get('[data-testid=\"submit-btn\"]')")];
    let report = validate_changes(&changes, FILE);
    assert!(report.valid, "{:?}", report.errors);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_line_out_of_range() {
    for line in [0, 7, 100] {
        let report = validate_changes(&[change(line, "cy", "cy")], FILE);
        assert!(!report.valid);
        assert!(report.errors[0].contains("out of range (file has 6 lines)"));
    }
}

#[test]
fn test_whitespace_insensitive_match_at_line() {
    let changes = vec![change(4, "\t cy.get('#email').type('a@b.c');  ", "cy.get('#email').clear().type('a@b.c');")];
    assert!(validate_changes(&changes, FILE).valid);

    let wrong_line = vec![change(2, "cy.get('#email')", "cy.get('#mail')")];
    let report = validate_changes(&wrong_line, FILE);
    assert_eq!(report.errors, vec!["Change 0: oldCode does not match line 2"]);
}

#[test]
fn test_multi_line_old_code_window() {
    let old = "    cy.get('[data-testid=\"submit\"]').click();\n    cy.get('#email')";
    assert!(validate_changes(&[change(3, old, "cy.submit();")], FILE).valid);
}

#[test]
fn test_duplicate_lines_are_an_error() {
    let changes = vec![
        change(3, "cy.get('[data-testid=\"submit\"]')", "cy.get('#a')"),
        change(3, ".click()", ".dblclick()"),
    ];
    let report = validate_changes(&changes, FILE);
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e.starts_with("Duplicate target line 3")));
}

#[test]
fn test_risky_patterns_and_empty_new_code() {
    let changes = vec![
        change(3, ".click()", ".click({ force: true })"),
        change(4, ".type('a@b.c')", ".type('a@b.c'); cy.wait(15000); cy.wait(500)"),
        change(2, "it('submits'", ""),
        change(1, "describe('login'", "describe(eval('x'), ...undefined"),
    ];
    let report = validate_changes(&changes, FILE);
    assert!(report.valid, "{:?}", report.errors);
    assert_eq!(
        report.warnings,
        vec![
            "Change 0: `force: true` bypasses actionability checks",
            "Change 1: fixed wait of 15000ms is overlong",
            "Change 2: newCode is empty, code will be removed",
            "Change 3: uses eval()",
            "Change 3: spreads null or undefined",
        ]
    );
}

#[test]
fn test_validate_changes_is_idempotent() {
    let changes = vec![change(3, "nope", "x"), change(3, "cy", ""), change(9, "a", "b")];
    assert_eq!(validate_changes(&changes, FILE), validate_changes(&changes, FILE));
}

#[test]
fn test_change_set_groups_by_file() {
    let mut files = BTreeMap::new();
    files.insert("cypress/e2e/login.cy.ts".to_string(), FILE.to_string());
    let changes = vec![
        change(3, ".click()", ".dblclick()"),
        CodeChange::replace("src/other.ts", 1, "a", "b"),
        change(50, "x", "y"),
    ];
    let report = validate_change_set(&changes, &files);
    assert_eq!(
        report.errors,
        vec!["cypress/e2e/login.cy.ts: Change 2: line 50 is out of range (file has 6 lines)"]
    );
    assert_eq!(report.warnings, vec!["src/other.ts: content unavailable, 1 change(s) not validated"]);
}

#[test]
fn test_validate_fix_blocks_introduced_syntax_errors() {
    let mut files = BTreeMap::new();
    files.insert("cypress/e2e/login.cy.ts".to_string(), FILE.to_string());

    let good = vec![change(3, "data-testid=\"submit\"", "data-testid=\"submit-btn\"")];
    let report = validate_fix(&good, &files);
    assert!(report.valid, "{:?}", report.errors);

    let broken = vec![change(3, ".click();", ".click(;")];
    let report = validate_fix(&broken, &files);
    assert!(!report.valid);
    assert!(report.errors.iter().all(|e| e.starts_with("cypress/e2e/login.cy.ts: ")));

    let custom = vec![change(4, "cy.get('#email').type('a@b.c');", "cy.fillEmail('a@b.c');")];
    let report = validate_fix(&custom, &files);
    assert!(report.valid);
    assert_eq!(
        report.warnings,
        vec!["cypress/e2e/login.cy.ts: Unknown command cy.fillEmail() is neither built in nor registered here"]
    );
}

#[test]
fn test_validate_fix_ignores_preexisting_errors() {
    let mut files = BTreeMap::new();
    files.insert("a.ts".to_string(), "cy.get('a').click(;\ncy.visit('/');\n".to_string());
    let changes = vec![CodeChange::replace("a.ts", 2, "'/'", "'/home'")];
    assert!(validate_fix(&changes, &files).valid);
}

#[test]
fn test_validate_fix_tracks_preexisting_errors_across_shifted_lines() {
    let mut files = BTreeMap::new();
    files.insert("a.ts".to_string(), "cy.visit('/');\ncy.get('a')..click();\n".to_string());

    // the broken chain moves from line 2 to line 3
    let shifting = vec![CodeChange::replace("a.ts", 1, "cy.visit('/');", "cy.visit('/');\ncy.get('b').click();")];
    let report = validate_fix(&shifting, &files);
    assert!(report.valid, "{:?}", report.errors);

    let another = vec![CodeChange::replace("a.ts", 1, "cy.visit('/');", "cy.visit('/');\ncy.get('b')..click();")];
    let report = validate_fix(&another, &files);
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1);
}

#[test]
fn test_occurrence_lines() {
    assert_eq!(occurrence_lines(FILE, "cy.get("), vec![3, 4]);
    assert!(occurrence_lines(FILE, "").is_empty());
}

#[test]
fn test_replace_anchored_picks_nearest_occurrence() {
    let content = "a\nfoo\nb\nfoo\nc\nfoo\n";
    assert_eq!(replace_anchored(content, "foo", "bar", 4).unwrap(), "a\nfoo\nb\nbar\nc\nfoo\n");
    assert_eq!(replace_anchored(content, "foo", "bar", 100).unwrap(), "a\nfoo\nb\nfoo\nc\nbar\n");
    // equidistant from lines 2 and 4
    assert_eq!(replace_anchored(content, "foo", "bar", 3).unwrap(), "a\nbar\nb\nfoo\nc\nfoo\n");
    assert!(replace_anchored(content, "zzz", "bar", 1).is_none());
}

#[test]
fn test_apply_changes_in_descending_order() {
    let content = "one\ntwo\nthree\n";
    let changes = vec![
        CodeChange::replace("f", 1, "one", "ONE\nAND A HALF"),
        CodeChange::replace("f", 3, "three", "THREE"),
    ];
    assert_eq!(apply_changes(content, &changes).unwrap(), "ONE\nAND A HALF\ntwo\nTHREE\n");
}

#[test]
fn test_apply_changes_missing_old_code() {
    let changes = vec![CodeChange::replace("f.ts", 1, "absent", "x")];
    let err = apply_changes("present", &changes).unwrap_err();
    assert!(err.to_string().contains("change 0: oldCode not found in f.ts"));
}
