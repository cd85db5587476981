//! Validate-and-retry loop driven end to end through the runner

use std::sync::Arc;

use genflow::config::GenflowConfig;
use genflow::error::{ApiError, ProviderErrorKind};
use genflow::provider::{ChatMessage, MessageRole};
use genflow::task::{GenerationPhase, GenerationRunner, RunOutcome};
use genflow::validation::{DiagramKind, SchemaId, ValidatedData};

use crate::integration::test_utils::{
    orchestrator_with, temp_store, Reply, ScriptedClient, VALID_DIAGRAMS, VALID_TURN,
};

const STYLED_ANSWER: &str = "## Order lifecycle\n\n```mermaid\nflowchart TD\n  A[New] --> B[Paid]\n  style A fill:#f9f\n```\n";

fn runner(client: Arc<ScriptedClient>, max_retries: u32) -> (tempfile::TempDir, GenerationRunner) {
    let (dir, store) = temp_store();
    let mut config = GenflowConfig::default();
    config.generation.max_retries = max_retries;
    config.provider.streaming = false;
    let runner = GenerationRunner::new(orchestrator_with(store), client, &config);
    (dir, runner)
}

fn settled_frame(outcome: RunOutcome) -> (GenerationPhase, genflow::validation::ValidatedFrame) {
    match outcome {
        RunOutcome::Settled {
            phase,
            frame: Some(frame),
            ..
        } => (phase, frame),
        other => panic!("expected a settled frame, got {:?}", other),
    }
}

#[tokio::test]
async fn invalid_output_is_retried_with_corrective_prompt() {
    let client = ScriptedClient::new(vec![
        Reply::text("Sure! Here are some thoughts, no JSON though."),
        Reply::text(format!("Here you go:\n```json\n{}\n```\nLet me know.", VALID_TURN)),
    ]);
    let (_dir, runner) = runner(client.clone(), 2);

    let outcome = runner
        .run_validated(
            "doc1",
            SchemaId::Conversation,
            vec![ChatMessage::system("ask questions"), ChatMessage::user("start")],
        )
        .await
        .unwrap();
    let (phase, frame) = settled_frame(outcome);

    assert_eq!(phase, GenerationPhase::Interactive);
    assert!(frame.validated);
    assert_eq!(frame.retry_count, 1);
    let text = frame.text_content.unwrap();
    assert!(text.contains("Here you go:"));
    assert!(text.contains("Let me know."));

    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    let retry = &calls[1];
    assert_eq!(retry.len(), 4);
    assert_eq!(retry[2].role, MessageRole::Assistant);
    assert_eq!(retry[2].content, "Sure! Here are some thoughts, no JSON though.");
    assert_eq!(retry[3].role, MessageRole::User);
    assert!(retry[3].content.contains("no JSON object found"));
}

#[tokio::test]
async fn exhausted_budget_falls_back_to_salvaged_diagrams() {
    let client = ScriptedClient::new(vec![
        Reply::text(STYLED_ANSWER),
        Reply::text(STYLED_ANSWER),
        Reply::text(STYLED_ANSWER),
        Reply::text(VALID_DIAGRAMS),
    ]);
    let (_dir, runner) = runner(client.clone(), 2);

    let outcome = runner
        .run_validated("doc1", SchemaId::Diagram, vec![ChatMessage::user("draw it")])
        .await
        .unwrap();
    let (phase, frame) = settled_frame(outcome);

    assert_eq!(client.call_count(), 3);
    assert_eq!(phase, GenerationPhase::Completed);
    assert!(!frame.validated);
    assert_eq!(frame.retry_count, 2);
    assert_eq!(frame.raw_content.as_deref(), Some(STYLED_ANSWER));
    assert!(!frame.validation_errors.unwrap().is_empty());

    match frame.data {
        Some(ValidatedData::Diagrams(set)) => {
            assert_eq!(set.diagrams.len(), 1);
            let diagram = &set.diagrams[0];
            assert_eq!(diagram.title, "Order lifecycle");
            assert_eq!(diagram.kind, DiagramKind::Flowchart);
            assert!(!diagram.code.contains("style A"));
        }
        other => panic!("expected salvaged diagrams, got {:?}", other),
    }
}

#[tokio::test]
async fn zero_retries_makes_a_single_call() {
    let client = ScriptedClient::new(vec![Reply::text("nothing useful"), Reply::text(VALID_TURN)]);
    let (_dir, runner) = runner(client.clone(), 0);

    let outcome = runner
        .run_validated("doc1", SchemaId::Conversation, vec![ChatMessage::user("go")])
        .await
        .unwrap();
    let (_, frame) = settled_frame(outcome);

    assert_eq!(client.call_count(), 1);
    assert!(!frame.validated);
    assert!(frame.data.is_none());
    assert_eq!(frame.text_content.as_deref(), Some("nothing useful"));
}

#[tokio::test]
async fn transport_failure_settles_as_error() {
    let client = ScriptedClient::new(vec![Reply::Fail(
        ProviderErrorKind::RateLimit,
        "slow down".to_string(),
    )]);
    let (_dir, runner) = runner(client.clone(), 2);

    let result = runner
        .run_validated("doc1", SchemaId::Conversation, vec![ChatMessage::user("go")])
        .await;

    match result {
        Err(ApiError::Provider(err)) => assert_eq!(err.kind, ProviderErrorKind::RateLimit),
        other => panic!("expected provider error, got {:?}", other),
    }
    assert_eq!(client.call_count(), 1);

    let orchestrator = runner.orchestrator();
    assert_eq!(orchestrator.phase("doc1"), GenerationPhase::Error);
    let record = orchestrator.store().get("doc1").unwrap().unwrap();
    assert_eq!(record.phase, GenerationPhase::Error);
    assert!(record.error.unwrap().contains("slow down"));

    // A failed task can be retried.
    assert!(orchestrator.start("doc1").is_started());
}

#[tokio::test]
async fn empty_document_id_is_rejected() {
    let client = ScriptedClient::new(vec![Reply::text(VALID_TURN)]);
    let (_dir, runner) = runner(client.clone(), 2);

    let result = runner
        .run_validated("  ", SchemaId::Conversation, vec![ChatMessage::user("go")])
        .await;
    assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    assert_eq!(client.call_count(), 0);
}
