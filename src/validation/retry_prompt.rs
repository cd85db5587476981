//! Corrective instruction sent back to the model after an invalid response.

use super::{diagram, schema, SchemaId};

/// Errors quoted verbatim in one corrective prompt.
pub const MAX_QUOTED_ERRORS: usize = 3;

/// Kind of mistake an error entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MistakeCategory {
    NoJson,
    InvalidJson,
    MissingField,
    WrongType,
    InvalidEnum,
    Cardinality,
    Length,
    DiagramDeclaration,
    DiagramStyling,
    DiagramStructure,
}

impl MistakeCategory {
    /// Classify one error entry by the fixed phrases the validators emit. A diagram
    /// error can carry several problems at once.
    pub fn classify(error: &str) -> Vec<Self> {
        if error.starts_with("diagrams.") && error.contains(".code (") {
            // Only the problem list after the quoted title is classified.
            let problems = error
                .rfind("\"): ")
                .map_or(error, |pos| &error[pos + 4..]);
            let checks = [
                (diagram::MISSING_DECLARATION, MistakeCategory::DiagramDeclaration),
                (diagram::FORBIDDEN_STYLING, MistakeCategory::DiagramStyling),
                (diagram::NO_STRUCTURE, MistakeCategory::DiagramStructure),
            ];
            return checks
                .into_iter()
                .filter(|(phrase, _)| problems.contains(phrase))
                .map(|(_, category)| category)
                .collect();
        }

        let category = if error.contains(schema::NO_JSON_OBJECT) {
            MistakeCategory::NoJson
        } else if error.contains(schema::INVALID_JSON) {
            MistakeCategory::InvalidJson
        } else if error.contains(schema::MISSING_FIELD) {
            MistakeCategory::MissingField
        } else if error.contains(schema::EXPECTED_ONE_OF) {
            MistakeCategory::InvalidEnum
        } else if error.contains(schema::ITEM_COUNT) || error.contains(schema::OUT_OF_RANGE) {
            MistakeCategory::Cardinality
        } else if error.contains(schema::TOO_SHORT) || error.contains(schema::TOO_LONG) {
            MistakeCategory::Length
        } else if error.contains(": expected ") {
            MistakeCategory::WrongType
        } else {
            return Vec::new();
        };
        vec![category]
    }

    fn prohibition(self) -> &'static str {
        match self {
            MistakeCategory::NoJson => "Do NOT answer with prose only; the JSON object is mandatory.",
            MistakeCategory::InvalidJson => {
                "Do NOT emit invalid JSON (no trailing commas, no comments, double-quoted keys and strings only)."
            }
            MistakeCategory::MissingField => "Do NOT omit any required field.",
            MistakeCategory::WrongType => {
                "Do NOT change a field's type (arrays stay arrays, numbers stay numbers, booleans stay true/false)."
            }
            MistakeCategory::InvalidEnum => "Do NOT invent values outside the allowed lists.",
            MistakeCategory::Cardinality => {
                "Do NOT go outside the allowed item counts or numeric ranges."
            }
            MistakeCategory::Length => "Do NOT leave text fields empty or exceed their length limits.",
            MistakeCategory::DiagramDeclaration => {
                "Do NOT start diagram code with anything other than its type declaration (for example `flowchart TD` or `erDiagram`)."
            }
            MistakeCategory::DiagramStyling => {
                "Do NOT use style, linkStyle, classDef, fill, color or stroke anywhere in diagram code."
            }
            MistakeCategory::DiagramStructure => {
                "Do NOT return a diagram without nodes, edges, entities or relationships."
            }
        }
    }
}

const CONVERSATION_SHAPE: &str = r#"{
  "questions": [            // 1 to 5 items
    {
      "id": string,
      "text": string,       // non-empty
      "type": "single" | "multiple" | "ranking",
      "options": [          // 2 to 8 items
        { "id": string, "label": string, "description": string (optional) }
      ]
    }
  ],
  "meta": {
    "phase": "discovery" | "scoping" | "detailing" | "review",
    "progress": number,     // 0 to 100
    "isComplete": boolean
  }
}"#;

pub const CONVERSATION_EXAMPLE: &str = r#"{"questions":[{"id":"q1","text":"Who will use the system?","type":"single","options":[{"id":"a","label":"Internal staff"},{"id":"b","label":"External customers"}]}],"meta":{"phase":"discovery","progress":10,"isComplete":false}}"#;

const DIAGRAM_SHAPE: &str = r#"{
  "diagrams": [             // 1 to 5 items
    {
      "title": string,      // non-empty
      "type": "flowchart" | "erd" | "sequence" | "class" | "state" | "pie" | "gantt",
      "code": string,       // at least 10 characters, starts with its declaration
      "description": string (optional)
    }
  ]
}"#;

pub const DIAGRAM_EXAMPLE: &str = r#"{"diagrams":[{"title":"Order flow","type":"flowchart","code":"flowchart TD\n  A[Cart] --> B[Checkout]\n  B --> C[Confirmation]"}]}"#;

/// Build the corrective instruction for the next attempt.
pub fn build_retry_prompt(schema: SchemaId, errors: &[String]) -> String {
    let (shape, example) = match schema {
        SchemaId::Conversation => (CONVERSATION_SHAPE, CONVERSATION_EXAMPLE),
        SchemaId::Diagram => (DIAGRAM_SHAPE, DIAGRAM_EXAMPLE),
    };

    let mut prompt = String::from(
        "Your previous response could not be used because it did not match the required format.\n\nProblems found:\n",
    );
    for (index, error) in errors.iter().take(MAX_QUOTED_ERRORS).enumerate() {
        prompt.push_str(&format!("{}. {}\n", index + 1, error));
    }
    if errors.len() > MAX_QUOTED_ERRORS {
        prompt.push_str(&format!(
            "({} more problems not shown)\n",
            errors.len() - MAX_QUOTED_ERRORS
        ));
    }

    prompt.push_str(
        "\nRespond again with ONLY a single JSON object of exactly this shape, with no text before or after it:\n",
    );
    prompt.push_str(shape);
    prompt.push_str("\n\nMinimal valid example:\n");
    prompt.push_str(example);
    prompt.push('\n');

    let mut categories: Vec<MistakeCategory> = errors
        .iter()
        .flat_map(|e| MistakeCategory::classify(e))
        .collect();
    categories.sort();
    categories.dedup();
    if !categories.is_empty() {
        prompt.push('\n');
        for category in categories {
            prompt.push_str("- ");
            prompt.push_str(category.prohibition());
            prompt.push('\n');
        }
    }

    prompt
}
