//! Diagram syntax checks run after the schema pass.
//!
//! Each diagram body must open with a known declaration, must not carry styling
//! directives, and must meet a small per-type structural minimum. All problems of one
//! diagram fold into a single error that names the diagram's title.

use super::DiagramKind;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

pub const MISSING_DECLARATION: &str = "missing diagram type declaration";
pub const FORBIDDEN_STYLING: &str = "contains forbidden styling directive";
pub const NO_STRUCTURE: &str = "has no";

/// Declaration keywords in match order, lowercase.
pub const DECLARATIONS: &[(&str, DiagramKind)] = &[
    ("flowchart", DiagramKind::Flowchart),
    ("graph", DiagramKind::Flowchart),
    ("erdiagram", DiagramKind::Erd),
    ("sequencediagram", DiagramKind::Sequence),
    ("classdiagram", DiagramKind::Class),
    ("statediagram", DiagramKind::State),
    ("pie", DiagramKind::Pie),
    ("gantt", DiagramKind::Gantt),
];

static STYLING: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("style", Regex::new(r"(?im)^\s*style\s+\S+").unwrap()),
        ("linkStyle", Regex::new(r"(?im)^\s*linkStyle\b").unwrap()),
        ("classDef", Regex::new(r"(?i)\bclassDef\b").unwrap()),
        (
            "fill/color/stroke",
            Regex::new(r"(?i)\b(fill|color|stroke)(-[a-z]+)?\s*:").unwrap(),
        ),
    ]
});

static FLOW_NODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+\s*[\[\(\{>]").unwrap());

static FLOW_EDGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--+>|-\.+->|==+>|---|--[ox]").unwrap());

static ER_RELATIONSHIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\|\||\|o|o\||\}o|o\{|\}\||\|\{)\s*(--|\.\.)\s*(\|\||\|o|o\||\}o|o\{|\}\||\|\{)")
        .unwrap()
});

static ER_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[A-Za-z0-9_-]+\s*\{").unwrap());

/// Diagram kind named by the code's opening declaration, if any.
pub fn declared_kind(code: &str) -> Option<DiagramKind> {
    let head = code.trim_start().to_ascii_lowercase();
    DECLARATIONS.iter().find_map(|(keyword, kind)| {
        let rest = head.strip_prefix(keyword)?;
        match rest.chars().next() {
            Some(c) if c.is_ascii_alphanumeric() || c == '_' => None,
            _ => Some(*kind),
        }
    })
}

/// Every problem with one diagram body, empty when it passes.
pub fn check_code(code: &str) -> Vec<String> {
    let mut problems = Vec::new();

    let kind = declared_kind(code);
    if kind.is_none() {
        problems.push(format!(
            "{} (expected one of: graph, flowchart, erDiagram, sequenceDiagram, classDiagram, stateDiagram, pie, gantt)",
            MISSING_DECLARATION
        ));
    }

    let directives: Vec<&str> = STYLING
        .iter()
        .filter(|(_, pattern)| pattern.is_match(code))
        .map(|(name, _)| *name)
        .collect();
    if !directives.is_empty() {
        problems.push(format!("{} ({})", FORBIDDEN_STYLING, directives.join(", ")));
    }

    match kind {
        Some(DiagramKind::Flowchart) => {
            let body = body_after_declaration(code);
            if !FLOW_NODE.is_match(body) && !FLOW_EDGE.is_match(body) {
                problems.push(format!("flowchart {} nodes or edges", NO_STRUCTURE));
            }
        }
        Some(DiagramKind::Erd) => {
            let body = body_after_declaration(code);
            if !ER_RELATIONSHIP.is_match(body) && !ER_ENTITY.is_match(body) {
                problems.push(format!(
                    "erDiagram {} relationships or entity definitions",
                    NO_STRUCTURE
                ));
            }
        }
        _ => {}
    }

    problems
}

/// Everything after the declaration statement, so the declaration never counts as a node.
fn body_after_declaration(code: &str) -> &str {
    let code = code.trim_start();
    match code.find(['\n', ';']) {
        Some(pos) => &code[pos + 1..],
        None => "",
    }
}

/// Check every diagram in a schema-shaped value. Entries whose `code` is not a string
/// were already reported by the schema pass and are skipped here.
pub fn check_diagrams(value: &Value) -> Vec<String> {
    let Some(diagrams) = value.get("diagrams").and_then(Value::as_array) else {
        return Vec::new();
    };

    diagrams
        .iter()
        .enumerate()
        .filter_map(|(index, diagram)| {
            let code = diagram.get("code")?.as_str()?;
            let problems = check_code(code);
            if problems.is_empty() {
                return None;
            }
            let title = diagram
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.trim().is_empty())
                .unwrap_or("untitled");
            Some(format!(
                "diagrams.{}.code (\"{}\"): {}",
                index,
                title,
                problems.join("; ")
            ))
        })
        .collect()
}
