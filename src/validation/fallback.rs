//! Last-resort diagram salvage once the retry budget is spent.
//!
//! Looks only for fenced diagram code, ignoring whatever JSON surrounds it, and builds
//! one [`Diagram`] per block. Degraded output is preferred over an empty result.

use super::diagram::declared_kind;
use super::{Diagram, DiagramKind};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Fenced block, tolerating literal `\n` escapes left over from broken JSON strings.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```([A-Za-z]*)[ \t]*(?:\r?\n|\\n)([\s\S]*?)(?:\\n)?```").unwrap()
});

static MARKDOWN_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:#{1,6}[ \t]+(.+?)|\*\*(.+?)\*\*:?)[ \t]*$").unwrap()
});

static JSON_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""title"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

static STYLING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(style|linkStyle|classDef)\s").unwrap()
});

/// How far back from a block to look for a heading.
const HEADING_WINDOW: usize = 400;

const KIND_HINTS: &[(&str, DiagramKind)] = &[
    ("entity", DiagramKind::Erd),
    ("erd", DiagramKind::Erd),
    ("sequence", DiagramKind::Sequence),
    ("class", DiagramKind::Class),
    ("state", DiagramKind::State),
    ("pie", DiagramKind::Pie),
    ("gantt", DiagramKind::Gantt),
    ("timeline", DiagramKind::Gantt),
    ("flow", DiagramKind::Flowchart),
];

/// Salvage every fenced diagram from `raw`.
///
/// A block counts when it is tagged `mermaid`, or untagged and opening with a known
/// declaration.
pub fn salvage_diagrams(raw: &str) -> Vec<Diagram> {
    let mut diagrams = Vec::new();

    for caps in FENCED_BLOCK.captures_iter(raw) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        let tag = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let code = unescape(body.as_str());
        let code = strip_styling(code.trim());

        let tagged = tag.eq_ignore_ascii_case("mermaid");
        let declared = declared_kind(&code);
        if code.is_empty() || !(tagged || (tag.is_empty() && declared.is_some())) {
            continue;
        }

        let heading = nearby_heading(&raw[..whole.start()]);
        let kind = declared
            .or_else(|| heading.as_deref().and_then(kind_from_text))
            .unwrap_or(DiagramKind::Flowchart);
        let title = heading.unwrap_or_else(|| format!("Diagram {}", diagrams.len() + 1));

        diagrams.push(Diagram {
            title,
            kind,
            code,
            description: None,
        });
    }

    debug!(salvaged = diagrams.len(), "Fallback diagram extraction finished");
    diagrams
}

/// Undo JSON string escapes when the block arrived still escaped.
fn unescape(body: &str) -> String {
    if body.contains('\n') || !body.contains("\\n") {
        return body.to_string();
    }
    body.replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

fn strip_styling(code: &str) -> String {
    code.lines()
        .filter(|line| !STYLING_LINE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Closest heading or JSON `title` value before a block, within a bounded window.
fn nearby_heading(before: &str) -> Option<String> {
    let mut window_start = before.len().saturating_sub(HEADING_WINDOW);
    while !before.is_char_boundary(window_start) {
        window_start += 1;
    }
    let window = &before[window_start..];

    let markdown = MARKDOWN_HEADING.captures_iter(window).last().and_then(|caps| {
        let m = caps.get(1).or_else(|| caps.get(2))?;
        Some((m.start(), m.as_str().trim().to_string()))
    });
    let json = JSON_TITLE.captures_iter(window).last().and_then(|caps| {
        let m = caps.get(1)?;
        Some((m.start(), m.as_str().replace("\\\"", "\"")))
    });

    let closest = match (markdown, json) {
        (Some(a), Some(b)) => Some(if a.0 >= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    closest
        .map(|(_, title)| title)
        .filter(|title| !title.is_empty())
}

fn kind_from_text(text: &str) -> Option<DiagramKind> {
    let lower = text.to_ascii_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    KIND_HINTS
        .iter()
        .find(|(hint, _)| words.iter().any(|word| word.starts_with(hint)))
        .map(|(_, kind)| *kind)
}
