//! Model output parsing
//!
//! Completion text is never trusted to be strict JSON. The first balanced
//! object is located (markdown fences stripped, string-aware), repaired for
//! the usual trailing-comma and smart-quote damage, then read through
//! [`Fields`], which rejects missing required fields instead of coercing.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Strip markdown code fences from a response
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Extract the first balanced fragment between `open` and `close`,
/// ignoring delimiters inside string literals
pub(crate) fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c == '"' {
            if start_idx.is_some() {
                in_string = true;
            }
            continue;
        }
        if c == open {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(start) = start_idx {
                    return Some(&text[start..=i]);
                }
            }
        }
    }

    None
}

/// Repair common damage in model-produced JSON
///
/// Outside string literals: curly quotes become ASCII, trailing commas are
/// dropped and stray control characters removed. Inside a literal the text
/// is kept, except raw line breaks and tabs, which are escaped.
pub(crate) fn fix_json_issues(json: &str) -> String {
    let mut fixed = String::with_capacity(json.len());
    let mut pending_comma = false;
    let mut whitespace = String::new();
    // Some(true) when the open literal started with a curly quote
    let mut literal: Option<bool> = None;
    let mut escaped = false;

    for c in json.chars() {
        if let Some(curly) = literal {
            if escaped {
                escaped = false;
                fixed.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    fixed.push(c);
                }
                '"' if !curly => {
                    literal = None;
                    fixed.push(c);
                }
                '\u{201C}' | '\u{201D}' if curly => {
                    literal = None;
                    fixed.push('"');
                }
                '"' => fixed.push_str("\\\""),
                '\n' => fixed.push_str("\\n"),
                '\r' => fixed.push_str("\\r"),
                '\t' => fixed.push_str("\\t"),
                c if c.is_control() => {}
                c => fixed.push(c),
            }
            continue;
        }

        let (c, curly) = match c {
            '\u{201C}' | '\u{201D}' => ('"', true),
            '\u{2018}' | '\u{2019}' => ('\'', false),
            other => (other, false),
        };
        if c.is_control() && c != '\n' && c != '\t' && c != '\r' {
            continue;
        }
        if pending_comma {
            if c.is_whitespace() {
                whitespace.push(c);
                continue;
            }
            if c != ']' && c != '}' {
                fixed.push(',');
            }
            fixed.push_str(&whitespace);
            whitespace.clear();
            pending_comma = false;
        }
        if c == ',' {
            pending_comma = true;
            continue;
        }
        if c == '"' {
            literal = Some(curly);
        }
        fixed.push(c);
    }
    if pending_comma {
        fixed.push(',');
        fixed.push_str(&whitespace);
    }
    fixed
}

/// Locate and parse the first JSON object in a completion
pub(crate) fn parse_object(response: &str) -> Result<Map<String, Value>> {
    let clean = strip_markdown_fences(response);
    let fragment = extract_json_fragment(clean, '{', '}')
        .ok_or_else(|| Error::Parse("no JSON object found in response".to_string()))?;

    let value: Value = match serde_json::from_str(fragment) {
        Ok(value) => value,
        Err(_) => serde_json::from_str(&fix_json_issues(fragment))
            .map_err(|e| Error::Parse(format!("malformed JSON: {e}")))?,
    };

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Parse("response is not a JSON object".to_string())),
    }
}

/// Normalise an enumerated string: uppercase, `-` and spaces become `_`
#[must_use]
pub fn normalize_enum(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Typed accessors over a parsed object
pub(crate) struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    /// First present key among `keys` (camelCase and snake_case spellings)
    pub(crate) fn get(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .find_map(|k| self.map.get(*k))
            .filter(|v| !v.is_null())
    }

    pub(crate) fn required_str(&self, keys: &[&str]) -> Result<&'a str> {
        match self.get(keys) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
            Some(_) => Err(Error::Validation(format!("field `{}` must be a string", keys[0]))),
            None => Err(Error::Validation(format!("missing required field `{}`", keys[0]))),
        }
    }

    pub(crate) fn str_or_default(&self, keys: &[&str]) -> String {
        match self.get(keys) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    pub(crate) fn opt_str(&self, keys: &[&str]) -> Option<String> {
        match self.get(keys) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    pub(crate) fn bool_or(&self, keys: &[&str], default: bool) -> bool {
        match self.get(keys) {
            Some(Value::Bool(b)) => *b,
            _ => default,
        }
    }

    pub(crate) fn opt_bool(&self, keys: &[&str]) -> Option<bool> {
        self.get(keys).and_then(Value::as_bool)
    }

    pub(crate) fn opt_u64(&self, keys: &[&str]) -> Option<u64> {
        match self.get(keys) {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
            _ => None,
        }
    }

    /// Confidence in `[0, 100]`; must be a JSON number
    pub(crate) fn required_confidence(&self, keys: &[&str]) -> Result<u8> {
        match self.get(keys) {
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.clamp(0.0, 100.0).round() as u8)
                .ok_or_else(|| Error::Validation(format!("field `{}` is not finite", keys[0]))),
            Some(_) => Err(Error::Validation(format!("field `{}` must be a number", keys[0]))),
            None => Err(Error::Validation(format!("missing required field `{}`", keys[0]))),
        }
    }

    /// Confidence with a default when absent; still rejects non-numbers
    pub(crate) fn confidence_or(&self, keys: &[&str], default: u8) -> Result<u8> {
        if self.get(keys).is_none() {
            return Ok(default);
        }
        self.required_confidence(keys)
    }

    /// String list; non-string entries are dropped
    pub(crate) fn str_list(&self, keys: &[&str]) -> Vec<String> {
        match self.get(keys) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// List of nested objects; non-object entries are dropped
    pub(crate) fn object_list(&self, keys: &[&str]) -> Vec<&'a Map<String, Value>> {
        match self.get(keys) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn object(&self, keys: &[&str]) -> Option<&'a Map<String, Value>> {
        self.get(keys).and_then(Value::as_object)
    }
}
