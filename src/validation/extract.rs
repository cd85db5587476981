//! Structural extraction of a JSON object from free-form model output.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Extracted JSON text plus whatever prose surrounded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub json: Option<String>,
    pub remainder: String,
}

impl Extraction {
    fn none(text: &str) -> Self {
        Self {
            json: None,
            remainder: text.to_string(),
        }
    }
}

/// Fenced block with an optional language tag.
static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n([\s\S]*?)```").unwrap());

/// Find the JSON object in `text`.
///
/// First match wins: a fenced block whose body is an object, the whole trimmed input
/// when it parses as an object, then the first balanced `{...}` in the prose whose
/// top level carries one of `marker_keys`.
pub fn extract_json(text: &str, marker_keys: &[&str]) -> Extraction {
    for caps in FENCE.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let body = body.as_str().trim();
        if body.starts_with('{') {
            return Extraction {
                json: Some(body.to_string()),
                remainder: splice_out(text, whole.start(), whole.end()),
            };
        }
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') && parses_as_object(trimmed) {
        return Extraction {
            json: Some(trimmed.to_string()),
            remainder: String::new(),
        };
    }

    for (start, end) in object_spans(text) {
        let candidate = &text[start..end];
        if has_marker_key(candidate, marker_keys) {
            return Extraction {
                json: Some(candidate.to_string()),
                remainder: splice_out(text, start, end),
            };
        }
    }

    Extraction::none(text)
}

fn parses_as_object(candidate: &str) -> bool {
    matches!(serde_json::from_str::<Value>(candidate), Ok(Value::Object(_)))
}

fn has_marker_key(candidate: &str, marker_keys: &[&str]) -> bool {
    if !marker_keys
        .iter()
        .any(|key| candidate.contains(&format!("\"{}\"", key)))
    {
        return false;
    }
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => marker_keys.iter().any(|key| map.contains_key(*key)),
        _ => false,
    }
}

/// Every balanced `{...}` span, ordered by start offset, found in one pass. Braces
/// inside string literals are skipped; quotes outside any object are prose.
fn object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(offset),
            '}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, offset + 1));
                }
            }
            _ => {}
        }
    }

    spans.sort_unstable_by_key(|&(start, _)| start);
    spans
}

fn splice_out(text: &str, start: usize, end: usize) -> String {
    let before = text[..start].trim_end();
    let after = text[end..].trim_start();
    match (before.is_empty(), after.is_empty()) {
        (true, _) => after.trim_end().to_string(),
        (_, true) => before.trim_start().to_string(),
        _ => format!("{}\n{}", before.trim_start(), after.trim_end()),
    }
}
