//! Error reporting of the schema validator

use genflow::validation::schema::{check, CONVERSATION_SCHEMA};
use genflow::validation::{ResponseValidator, SchemaId, SchemaResponseValidator};
use proptest::prelude::*;
use serde_json::{json, Value};

fn question(id: usize, kind: &str) -> Value {
    json!({
        "id": format!("q{}", id),
        "text": "Which option fits best?",
        "type": kind,
        "options": [
            { "id": "a", "label": "First" },
            { "id": "b", "label": "Second" }
        ]
    })
}

fn turn(questions: Vec<Value>) -> Value {
    json!({
        "questions": questions,
        "meta": { "phase": "scoping", "progress": 40, "isComplete": false }
    })
}

/// One bad enum value per question yields exactly one error per question
#[test]
fn test_each_violation_reported_once() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &prop::collection::vec(any::<bool>(), 1..=5),
            |broken| {
                let questions: Vec<Value> = broken
                    .iter()
                    .enumerate()
                    .map(|(i, bad)| question(i, if *bad { "essay" } else { "single" }))
                    .collect();
                let value = turn(questions);

                let errors = check(&value, &CONVERSATION_SCHEMA);
                let expected = broken.iter().filter(|b| **b).count();
                prop_assert_eq!(errors.len(), expected);
                for (i, _) in broken.iter().enumerate().filter(|(_, b)| **b) {
                    let path = format!("questions.{}.type", i);
                    prop_assert!(errors.iter().any(|e| e.starts_with(&path)));
                }
                Ok(())
            },
        )
        .unwrap();
}

/// Validation is a pure function of its input
#[test]
fn test_validation_is_idempotent() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let validator = SchemaResponseValidator::new(SchemaId::Conversation);

    runner
        .run(&"[ -~]{0,80}", |noise| {
            let raw = format!("{}\n{}", noise, turn(vec![question(0, "ranking")]));
            let first = validator.validate(&raw);
            let second = validator.validate(&raw);
            prop_assert_eq!(first.is_valid(), second.is_valid());
            prop_assert_eq!(first.errors(), second.errors());
            Ok(())
        })
        .unwrap();
}
