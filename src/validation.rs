//! Response validation
//!
//! Turns free-form model output into strictly typed data. A response passes through
//! the structural extractor, the declarative schema validator and, for diagram
//! responses, the diagram syntax checker. Every violation lands in one ordered error
//! list so a single retry decision covers all of them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod diagram;
pub mod engine;
pub mod extract;
pub mod fallback;
pub mod retry_prompt;
pub mod schema;

pub use engine::{AttemptGuard, DetachedGuard, EngineOutcome, RetryState, ValidatedFrame, ValidationEngine};

/// Which declarative schema a response must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaId {
    /// Clarifying questions with options plus conversation meta
    Conversation,
    /// One to five diagrams with source code
    Diagram,
}

impl SchemaId {
    /// Top-level key that identifies this schema's object inside mixed prose.
    pub fn marker_key(self) -> &'static str {
        match self {
            SchemaId::Conversation => "questions",
            SchemaId::Diagram => "diagrams",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaId::Conversation => "conversation",
            SchemaId::Diagram => "diagram",
        }
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conversation" | "questions" => Ok(SchemaId::Conversation),
            "diagram" | "diagrams" => Ok(SchemaId::Diagram),
            other => Err(format!(
                "Unknown schema '{}' (expected 'questions' or 'diagrams')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Single,
    Multiple,
    Ranking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStage {
    Discovery,
    Scoping,
    Detailing,
    Review,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMeta {
    pub phase: ConversationStage,
    pub progress: f64,
    pub is_complete: bool,
}

/// One validated conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub questions: Vec<Question>,
    pub meta: TurnMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramKind {
    Flowchart,
    Erd,
    Sequence,
    Class,
    State,
    Pie,
    Gantt,
}

impl DiagramKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagramKind::Flowchart => "flowchart",
            DiagramKind::Erd => "erd",
            DiagramKind::Sequence => "sequence",
            DiagramKind::Class => "class",
            DiagramKind::State => "state",
            DiagramKind::Pie => "pie",
            DiagramKind::Gantt => "gantt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagram {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: DiagramKind,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A validated (or salvaged) set of diagrams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramSet {
    pub diagrams: Vec<Diagram>,
}

/// Strictly typed payload of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidatedData {
    Conversation(ConversationTurn),
    Diagrams(DiagramSet),
}

/// Result of validating one response. `valid` holds exactly when data is present and
/// the error list is empty; the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    valid: bool,
    data: Option<ValidatedData>,
    errors: Vec<String>,
    raw_text: String,
}

impl ValidationOutcome {
    pub fn accepted(data: ValidatedData, raw_text: impl Into<String>) -> Self {
        Self {
            valid: true,
            data: Some(data),
            errors: Vec::new(),
            raw_text: raw_text.into(),
        }
    }

    /// An empty error list is replaced by a generic entry so the outcome stays invalid.
    pub fn rejected(mut errors: Vec<String>, raw_text: impl Into<String>) -> Self {
        if errors.is_empty() {
            errors.push("(root): response was rejected".to_string());
        }
        Self {
            valid: false,
            data: None,
            errors,
            raw_text: raw_text.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn data(&self) -> Option<&ValidatedData> {
        self.data.as_ref()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn into_data(self) -> Option<ValidatedData> {
        self.data
    }
}

/// Anything that can judge one raw model response.
pub trait ResponseValidator: Send + Sync {
    fn schema(&self) -> SchemaId;

    fn validate(&self, raw_text: &str) -> ValidationOutcome;
}

/// Extractor, schema validator and (for diagrams) the diagram checker, in that order.
#[derive(Debug, Clone, Copy)]
pub struct SchemaResponseValidator {
    schema: SchemaId,
}

impl SchemaResponseValidator {
    pub fn new(schema: SchemaId) -> Self {
        Self { schema }
    }
}

impl ResponseValidator for SchemaResponseValidator {
    fn schema(&self) -> SchemaId {
        self.schema
    }

    fn validate(&self, raw_text: &str) -> ValidationOutcome {
        let extraction = extract::extract_json(raw_text, &[self.schema.marker_key()]);
        let Some(json) = extraction.json else {
            return ValidationOutcome::rejected(
                vec![format!("(root): {}", schema::NO_JSON_OBJECT)],
                raw_text,
            );
        };

        let value: serde_json::Value = match serde_json::from_str(&json) {
            Ok(value) => value,
            Err(err) => {
                return ValidationOutcome::rejected(
                    vec![format!("(root): {}: {}", schema::INVALID_JSON, err)],
                    raw_text,
                )
            }
        };

        let outcome = schema::validate(&value, self.schema, raw_text);
        if self.schema != SchemaId::Diagram {
            return outcome;
        }

        let diagram_errors = diagram::check_diagrams(&value);
        if diagram_errors.is_empty() {
            return outcome;
        }
        let mut errors = outcome.errors().to_vec();
        errors.extend(diagram_errors);
        ValidationOutcome::rejected(errors, raw_text)
    }
}
