//! Declarative schemas and the validator that walks them.
//!
//! Every violation becomes one path-addressed error (`questions.0.type: ...`). Errors
//! are grouped by category so the list always reads shape problems first, then enum
//! membership, then cardinality and numeric bounds, then string lengths. A node with
//! the wrong type yields only the type error; its children are not inspected.

use super::{SchemaId, ValidatedData, ValidationOutcome};
use serde_json::Value;

pub const NO_JSON_OBJECT: &str = "no JSON object found in response";
pub const INVALID_JSON: &str = "invalid JSON";
pub const MISSING_FIELD: &str = "missing required field";
pub const EXPECTED_ONE_OF: &str = "expected one of";
pub const ITEM_COUNT: &str = "items, got";
pub const OUT_OF_RANGE: &str = "must be between";
pub const TOO_SHORT: &str = "must be at least";
pub const TOO_LONG: &str = "must be at most";

/// Declarative shape of one JSON node
#[derive(Debug)]
pub enum Shape {
    Object(&'static [Field]),
    Array {
        items: &'static Shape,
        min: usize,
        max: usize,
    },
    Str {
        min_len: usize,
        max_len: Option<usize>,
    },
    Enum(&'static [&'static str]),
    Number {
        min: f64,
        max: f64,
    },
    Bool,
}

#[derive(Debug)]
pub struct Field {
    pub name: &'static str,
    pub shape: Shape,
    pub required: bool,
}

macro_rules! field {
    (required $name:literal, $shape:expr) => {
        Field {
            name: $name,
            shape: $shape,
            required: true,
        }
    };
    (optional $name:literal, $shape:expr) => {
        Field {
            name: $name,
            shape: $shape,
            required: false,
        }
    };
}

pub const QUESTION_TYPES: &[&str] = &["single", "multiple", "ranking"];
pub const CONVERSATION_STAGES: &[&str] = &["discovery", "scoping", "detailing", "review"];
pub const DIAGRAM_TYPES: &[&str] = &[
    "flowchart", "erd", "sequence", "class", "state", "pie", "gantt",
];

static OPTION: Shape = Shape::Object(&[
    field!(required "id", Shape::Str { min_len: 1, max_len: Some(64) }),
    field!(required "label", Shape::Str { min_len: 1, max_len: Some(200) }),
    field!(optional "description", Shape::Str { min_len: 0, max_len: Some(500) }),
]);

static QUESTION: Shape = Shape::Object(&[
    field!(required "id", Shape::Str { min_len: 1, max_len: Some(64) }),
    field!(required "text", Shape::Str { min_len: 1, max_len: Some(500) }),
    field!(required "type", Shape::Enum(QUESTION_TYPES)),
    field!(required "options", Shape::Array { items: &OPTION, min: 2, max: 8 }),
]);

/// Clarifying questions plus conversation meta
pub static CONVERSATION_SCHEMA: Shape = Shape::Object(&[
    field!(required "questions", Shape::Array { items: &QUESTION, min: 1, max: 5 }),
    field!(required "meta", Shape::Object(&[
        field!(required "phase", Shape::Enum(CONVERSATION_STAGES)),
        field!(required "progress", Shape::Number { min: 0.0, max: 100.0 }),
        field!(required "isComplete", Shape::Bool),
    ])),
]);

static DIAGRAM: Shape = Shape::Object(&[
    field!(required "title", Shape::Str { min_len: 1, max_len: Some(200) }),
    field!(required "type", Shape::Enum(DIAGRAM_TYPES)),
    field!(required "code", Shape::Str { min_len: 10, max_len: None }),
    field!(optional "description", Shape::Str { min_len: 0, max_len: Some(1000) }),
]);

/// One to five diagrams
pub static DIAGRAM_SCHEMA: Shape = Shape::Object(&[field!(
    required "diagrams",
    Shape::Array { items: &DIAGRAM, min: 1, max: 5 }
)]);

impl SchemaId {
    pub fn shape(self) -> &'static Shape {
        match self {
            SchemaId::Conversation => &CONVERSATION_SCHEMA,
            SchemaId::Diagram => &DIAGRAM_SCHEMA,
        }
    }
}

/// Violations bucketed by category, concatenated in category order at the end.
#[derive(Debug, Default)]
struct Violations {
    shape: Vec<String>,
    enumeration: Vec<String>,
    cardinality: Vec<String>,
    length: Vec<String>,
}

impl Violations {
    fn into_ordered(self) -> Vec<String> {
        let mut all = self.shape;
        all.extend(self.enumeration);
        all.extend(self.cardinality);
        all.extend(self.length);
        all
    }
}

/// Check `value` against a shape and return every violation in category order.
pub fn check(value: &Value, shape: &Shape) -> Vec<String> {
    let mut violations = Violations::default();
    walk(value, shape, "", &mut violations);
    violations.into_ordered()
}

/// Validate a parsed value against a schema and convert it to typed data.
pub fn validate(value: &Value, schema: SchemaId, raw_text: &str) -> ValidationOutcome {
    let errors = check(value, schema.shape());
    if !errors.is_empty() {
        return ValidationOutcome::rejected(errors, raw_text);
    }

    let typed = match schema {
        SchemaId::Conversation => {
            serde_json::from_value(value.clone()).map(ValidatedData::Conversation)
        }
        SchemaId::Diagram => serde_json::from_value(value.clone()).map(ValidatedData::Diagrams),
    };
    match typed {
        Ok(data) => ValidationOutcome::accepted(data, raw_text),
        Err(err) => ValidationOutcome::rejected(vec![format!("(root): {}", err)], raw_text),
    }
}

fn walk(value: &Value, shape: &Shape, path: &str, out: &mut Violations) {
    match shape {
        Shape::Object(fields) => {
            let Some(map) = value.as_object() else {
                out.shape.push(type_error(path, "object", value));
                return;
            };
            for field in fields.iter() {
                let child = join(path, field.name);
                match map.get(field.name) {
                    None | Some(Value::Null) if field.required => {
                        out.shape.push(format!("{}: {}", display(&child), MISSING_FIELD));
                    }
                    None | Some(Value::Null) => {}
                    Some(inner) => walk(inner, &field.shape, &child, out),
                }
            }
        }
        Shape::Array { items, min, max } => {
            let Some(elements) = value.as_array() else {
                out.shape.push(type_error(path, "array", value));
                return;
            };
            if elements.len() < *min || elements.len() > *max {
                out.cardinality.push(format!(
                    "{}: expected between {} and {} {} {}",
                    display(path),
                    min,
                    max,
                    ITEM_COUNT,
                    elements.len()
                ));
            }
            for (index, element) in elements.iter().enumerate() {
                walk(element, items, &join(path, &index.to_string()), out);
            }
        }
        Shape::Str { min_len, max_len } => {
            let Some(text) = value.as_str() else {
                out.shape.push(type_error(path, "string", value));
                return;
            };
            let len = text.trim().chars().count();
            if len < *min_len {
                out.length.push(format!(
                    "{}: {} {} characters, got {}",
                    display(path),
                    TOO_SHORT,
                    min_len,
                    len
                ));
            } else if let Some(max) = max_len.filter(|max| len > *max) {
                out.length.push(format!(
                    "{}: {} {} characters, got {}",
                    display(path),
                    TOO_LONG,
                    max,
                    len
                ));
            }
        }
        Shape::Enum(allowed) => {
            let Some(text) = value.as_str() else {
                out.shape.push(type_error(path, "string", value));
                return;
            };
            if !allowed.contains(&text) {
                out.enumeration.push(format!(
                    "{}: {} [{}], got \"{}\"",
                    display(path),
                    EXPECTED_ONE_OF,
                    allowed.join(", "),
                    text
                ));
            }
        }
        Shape::Number { min, max } => {
            let Some(number) = value.as_f64() else {
                out.shape.push(type_error(path, "number", value));
                return;
            };
            if number < *min || number > *max {
                out.cardinality.push(format!(
                    "{}: {} {} and {}, got {}",
                    display(path),
                    OUT_OF_RANGE,
                    min,
                    max,
                    number
                ));
            }
        }
        Shape::Bool => {
            if !value.is_boolean() {
                out.shape.push(type_error(path, "boolean", value));
            }
        }
    }
}

fn type_error(path: &str, expected: &str, actual: &Value) -> String {
    format!("{}: expected {}, got {}", display(path), expected, kind_of(actual))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

fn display(path: &str) -> &str {
    if path.is_empty() {
        "(root)"
    } else {
        path
    }
}
