//! Lightweight syntax plausibility checks for JavaScript/TypeScript test files
//!
//! Not a parser. String and comment bodies are blanked first so that
//! delimiters inside them do not count, then delimiters, quotes, chained
//! calls and invoked `cy.*` commands are checked.

use super::ValidationReport;
use regex::Regex;
use std::sync::LazyLock;

/// Commands Cypress ships with
const CYPRESS_BUILTINS: &[&str] = &[
    "and", "as", "blur", "check", "children", "clear", "clearAllCookies", "clearAllLocalStorage",
    "clearAllSessionStorage", "clearCookie", "clearCookies", "clearLocalStorage", "click", "clock",
    "closest", "contains", "dblclick", "debug", "document", "each", "end", "eq", "exec", "filter",
    "find", "first", "fixture", "focus", "focused", "get", "getAllCookies", "getAllLocalStorage",
    "getAllSessionStorage", "getCookie", "getCookies", "go", "hash", "hover", "intercept", "invoke",
    "its", "last", "location", "log", "next", "nextAll", "nextUntil", "not", "now", "origin",
    "parent", "parents", "parentsUntil", "pause", "prev", "prevAll", "prevUntil", "press",
    "readFile", "reload", "request", "rightclick", "root", "route", "screenshot", "scrollIntoView",
    "scrollTo", "select", "selectFile", "server", "session", "setCookie", "shadow", "should",
    "siblings", "spread", "spy", "stub", "submit", "task", "then", "tick", "title", "trigger",
    "type", "uncheck", "url", "viewport", "visit", "wait", "window", "within", "wrap", "writeFile",
];

/// Whether `name` is a built-in Cypress command
#[must_use]
pub fn is_builtin_command(name: &str) -> bool {
    CYPRESS_BUILTINS.contains(&name)
}

static REGISTERED_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Cypress\s*\.\s*Commands\s*\.\s*(?:add|overwrite)\(\s*['"`](\w+)['"`]"#)
        .expect("REGISTERED_COMMAND regex is a compile-time constant")
});

static CY_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bcy\s*\.\s*([A-Za-z_]\w*)\s*\(").expect("CY_CALL regex is a compile-time constant")
});

static DANGLING_DOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w)\]]\s*\.\s*(?:[;,)\]}]|$)").expect("DANGLING_DOT regex is a compile-time constant")
});

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    LineComment,
    BlockComment,
    Quoted(char),
}

/// Blank string and comment bodies, keeping quotes and newlines
///
/// Returns the blanked text and any unterminated-literal errors.
pub(crate) fn strip_literals(content: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(content.len());
    let mut errors = Vec::new();
    let mut state = Scan::Code;
    let mut line = 1usize;
    let mut opened_at = 0usize;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Scan::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = Scan::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    opened_at = line;
                    state = Scan::BlockComment;
                }
                '\'' | '"' | '`' => {
                    out.push(c);
                    opened_at = line;
                    state = Scan::Quoted(c);
                }
                _ => out.push(c),
            },
            Scan::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if c == '\n' {
                    out.push('\n');
                } else if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = Scan::Code;
                }
            }
            Scan::Quoted(quote) => match c {
                '\\' => {
                    if chars.next() == Some('\n') {
                        out.push('\n');
                        line += 1;
                    }
                }
                '\n' if quote != '`' => {
                    errors.push(format!("Unterminated string literal on line {opened_at}"));
                    out.push(quote);
                    out.push('\n');
                    state = Scan::Code;
                }
                '\n' => out.push('\n'),
                _ if c == quote => {
                    out.push(c);
                    state = Scan::Code;
                }
                _ => {}
            },
        }
        if c == '\n' {
            line += 1;
        }
    }

    match state {
        Scan::BlockComment => errors.push(format!("Unterminated block comment opened on line {opened_at}")),
        Scan::Quoted(_) => errors.push(format!("Unterminated string literal on line {opened_at}")),
        _ => {}
    }
    (out, errors)
}

fn check_delimiters(code: &str, errors: &mut Vec<String>) {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (index, text) in code.lines().enumerate() {
        let line = index + 1;
        for c in text.chars() {
            match c {
                '(' | '[' | '{' => stack.push((c, line)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, opened)) => {
                            errors.push(format!(
                                "Mismatched `{c}` on line {line} (`{open}` opened on line {opened})"
                            ));
                            return;
                        }
                        None => {
                            errors.push(format!("Unexpected `{c}` on line {line}"));
                            return;
                        }
                    }
                }
                _ => {}
            }
        }
    }
    for (open, line) in stack {
        errors.push(format!("Unclosed `{open}` opened on line {line}"));
    }
}

fn check_chains(code: &str, errors: &mut Vec<String>) {
    for (index, text) in code.lines().enumerate() {
        let line = index + 1;
        let bytes = text.as_bytes();
        let double_dot = (0..bytes.len().saturating_sub(1)).any(|i| {
            bytes[i] == b'.'
                && bytes[i + 1] == b'.'
                && (i == 0 || bytes[i - 1] != b'.')
                && bytes.get(i + 2) != Some(&b'.')
        });
        if double_dot {
            errors.push(format!("Double dot in member chain on line {line}"));
        }
        if DANGLING_DOT.is_match(text) {
            let continues = code
                .lines()
                .skip(index + 1)
                .find(|l| !l.trim().is_empty())
                .is_some_and(|next| {
                    next.trim_start()
                        .starts_with(|c: char| c.is_alphabetic() || c == '_' || c == '$')
                });
            if !(text.trim_end().ends_with('.') && continues) {
                errors.push(format!("Dangling `.` in member chain on line {line}"));
            }
        }
    }
}

/// Check `content` for balanced delimiters and quotes, broken member chains
/// and invocations of unknown `cy.*` commands
#[must_use]
pub fn validate_syntax(content: &str) -> ValidationReport {
    let (code, mut errors) = strip_literals(content);
    check_delimiters(&code, &mut errors);
    check_chains(&code, &mut errors);

    let registered: Vec<&str> = REGISTERED_COMMAND
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let mut warnings = Vec::new();
    for caps in CY_CALL.captures_iter(&code) {
        let name = &caps[1];
        if is_builtin_command(name) || registered.contains(&name) {
            continue;
        }
        let warning = format!("Unknown command cy.{name}() is neither built in nor registered here");
        if !warnings.contains(&warning) {
            warnings.push(warning);
        }
    }

    ValidationReport::new(errors, warnings)
}
