//! Selector extraction from test and component source text

use regex::Regex;
use std::sync::LazyLock;

static SELECTOR_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:cy\s*\.\s*(?:get|find)|\.\s*(?:find|locator|\$|\$\$)|page\s*\.\s*(?:locator|\$|\$\$|click|fill))\(\s*(?:'([^']+)'|"([^"]+)"|`([^`$]+)`)"#,
    )
    .expect("SELECTOR_CALL regex is a compile-time constant")
});

static TEST_ID_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"getByTestId\(\s*(?:'([^']+)'|"([^"]+)")"#)
        .expect("TEST_ID_CALL regex is a compile-time constant")
});

static ATTRIBUTE_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[\s*([\w-]+)\s*[~^$*|]?=\s*['"]?([^'"\]]+)['"]?\s*\]"#)
        .expect("ATTRIBUTE_VALUE regex is a compile-time constant")
});

static ATTRIBUTE_IN_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([\w-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("ATTRIBUTE_IN_MARKUP regex is a compile-time constant")
});

/// Selectors passed to query calls in `source`, in order of appearance, deduplicated
#[must_use]
pub fn extract_selectors(source: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for caps in SELECTOR_CALL.captures_iter(source) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            found.push((m.start(), m.as_str().to_string()));
        }
    }
    for caps in TEST_ID_CALL.captures_iter(source) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            found.push((m.start(), format!("[data-testid=\"{}\"]", m.as_str())));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut selectors: Vec<String> = Vec::new();
    for (_, selector) in found {
        if !selectors.contains(&selector) {
            selectors.push(selector);
        }
    }
    selectors
}

/// The distinctive token of a selector, used to search source text
///
/// `[data-testid="submit"]` → `submit`, `#login-form` → `login-form`,
/// `.btn.primary` → `btn`.
#[must_use]
pub fn selector_key(selector: &str) -> String {
    let selector = selector.trim();
    if let Some(caps) = ATTRIBUTE_VALUE.captures(selector) {
        if let Some(value) = caps.get(2) {
            return value.as_str().trim().to_string();
        }
    }
    let trimmed = selector.trim_start_matches(['#', '.']);
    trimmed
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .find(|part| !part.is_empty())
        .unwrap_or(trimmed)
        .to_string()
}

/// The attribute a selector matches on, when it has one
///
/// `[data-testid="x"]` → `data-testid`, `#x` → `id`.
#[must_use]
pub fn selector_attribute(selector: &str) -> Option<String> {
    let selector = selector.trim();
    if let Some(caps) = ATTRIBUTE_VALUE.captures(selector) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    selector.starts_with('#').then(|| "id".to_string())
}

/// Selectors built from `attribute="value"` pairs in `line`
#[must_use]
pub fn attribute_selectors(line: &str, attribute: &str) -> Vec<String> {
    ATTRIBUTE_IN_MARKUP
        .captures_iter(line)
        .filter(|caps| &caps[1] == attribute)
        .map(|caps| {
            let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            if attribute == "id" {
                format!("#{value}")
            } else {
                format!("[{attribute}=\"{value}\"]")
            }
        })
        .collect()
}

/// Whether `source` mentions the selector's distinctive token as a whole word
#[must_use]
pub fn mentions_selector(source: &str, selector: &str) -> bool {
    let key = selector_key(selector);
    !key.is_empty() && (source.contains(selector) || contains_token(source, &key))
}

fn contains_token(source: &str, token: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '-' || c == '_';
    source.match_indices(token).any(|(idx, _)| {
        let before = source[..idx].chars().next_back();
        let after = source[idx + token.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}
