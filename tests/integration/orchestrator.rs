//! Exclusivity, supersession and cancellation across concurrent attempts

use std::sync::Arc;
use std::thread;

use genflow::config::GenflowConfig;
use genflow::task::{GenerationPhase, GenerationRunner, RunOutcome, SettledPhase};
use genflow::provider::ChatMessage;
use genflow::validation::SchemaId;

use crate::integration::test_utils::{
    orchestrator_with, temp_store, Reply, ScriptedClient, FINAL_TURN, VALID_TURN,
};

fn runner_for(
    client: Arc<ScriptedClient>,
    orchestrator: Arc<genflow::task::GenerationOrchestrator>,
    streaming: bool,
) -> GenerationRunner {
    let mut config = GenflowConfig::default();
    config.provider.streaming = streaming;
    GenerationRunner::new(orchestrator, client, &config)
}

#[test]
fn concurrent_starts_have_exactly_one_winner() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator_with(store);

    let workers: Vec<_> = (0..16)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            thread::spawn(move || orchestrator.start("doc1"))
        })
        .collect();
    let outcomes: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    let winners = outcomes.iter().filter(|o| o.is_started()).count();
    assert_eq!(winners, 1);

    let request_id = outcomes[0].handle().request_id;
    assert!(outcomes.iter().all(|o| o.handle().request_id == request_id));
    assert_eq!(orchestrator.phase("doc1"), GenerationPhase::Generating);
}

#[test]
fn documents_are_independent() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator_with(store);

    assert!(orchestrator.start("doc1").is_started());
    assert!(orchestrator.start("doc2").is_started());
    assert!(!orchestrator.start("doc1").is_started());
}

#[tokio::test]
async fn second_run_while_generating_is_refused() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator_with(store);
    let client = ScriptedClient::new(vec![Reply::text(VALID_TURN)]);
    let runner = runner_for(client.clone(), orchestrator.clone(), false);

    let running = orchestrator.start("doc1").handle().clone();
    let outcome = runner
        .run_validated("doc1", SchemaId::Conversation, vec![ChatMessage::user("hi")])
        .await
        .unwrap();

    match outcome {
        RunOutcome::AlreadyRunning(handle) => assert_eq!(handle.request_id, running.request_id),
        other => panic!("expected AlreadyRunning, got {:?}", other),
    }
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn cancelled_attempt_never_touches_the_newer_one() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator_with(store.clone());
    let client = ScriptedClient::new(vec![Reply::Held(VALID_TURN.to_string())]);
    let runner = Arc::new(runner_for(client.clone(), orchestrator.clone(), false));

    let first = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run_validated("doc1", SchemaId::Conversation, vec![ChatMessage::user("go")])
                .await
        })
    };

    client.entered.notified().await;
    assert!(orchestrator.cancel("doc1"));
    assert_eq!(orchestrator.phase("doc1"), GenerationPhase::Idle);

    let second = orchestrator.start("doc1");
    assert!(second.is_started());
    let second_id = second.handle().request_id;

    client.release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, RunOutcome::Cancelled));

    let snapshot = orchestrator.snapshot("doc1").unwrap();
    assert_eq!(snapshot.phase, GenerationPhase::Generating);
    assert_eq!(snapshot.request_id, Some(second_id));
    assert!(snapshot.accumulated_content.is_empty());

    assert!(orchestrator.append("doc1", second_id, "fresh"));
    assert!(orchestrator.complete("doc1", second_id, SettledPhase::Completed));
    let record = store.get("doc1").unwrap().unwrap();
    assert_eq!(record.phase, GenerationPhase::Completed);
    assert_eq!(record.stream_content, "fresh");
}

#[tokio::test]
async fn superseded_result_is_discarded() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator_with(store.clone());
    let client = ScriptedClient::new(vec![Reply::Held(VALID_TURN.to_string())]);
    let runner = Arc::new(runner_for(client.clone(), orchestrator.clone(), false));

    let first = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run_validated("doc1", SchemaId::Conversation, vec![ChatMessage::user("go")])
                .await
        })
    };

    client.entered.notified().await;
    let stale = orchestrator.snapshot("doc1").unwrap().request_id.unwrap();

    // A newer attempt settles while the first is still waiting on the model.
    orchestrator.cancel("doc1");
    let newer = orchestrator.start("doc1").handle().request_id;
    assert_ne!(newer, stale);
    orchestrator.append("doc1", newer, "newer content");
    orchestrator.complete("doc1", newer, SettledPhase::Interactive);

    client.release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(!matches!(outcome, RunOutcome::Settled { .. }));

    let snapshot = orchestrator.snapshot("doc1").unwrap();
    assert_eq!(snapshot.phase, GenerationPhase::Interactive);
    assert_eq!(snapshot.content(), "newer content");
    assert_eq!(store.get("doc1").unwrap().unwrap().stream_content, "newer content");
}

#[tokio::test]
async fn validated_run_settles_by_conversation_state() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator_with(store.clone());
    let client = ScriptedClient::new(vec![Reply::text(VALID_TURN), Reply::text(FINAL_TURN)]);
    let runner = runner_for(client, orchestrator.clone(), true);

    let open = runner
        .run_validated("doc1", SchemaId::Conversation, vec![ChatMessage::user("start")])
        .await
        .unwrap();
    match open {
        RunOutcome::Settled { phase, frame, .. } => {
            assert_eq!(phase, GenerationPhase::Interactive);
            let frame = frame.unwrap();
            assert!(frame.validated);
            assert_eq!(frame.retry_count, 0);
        }
        other => panic!("expected Settled, got {:?}", other),
    }
    assert_eq!(store.get("doc1").unwrap().unwrap().phase, GenerationPhase::Interactive);

    let done = runner
        .run_validated("doc1", SchemaId::Conversation, vec![ChatMessage::user("answer")])
        .await
        .unwrap();
    match done {
        RunOutcome::Settled { phase, content, .. } => {
            assert_eq!(phase, GenerationPhase::Completed);
            let value: serde_json::Value = serde_json::from_str(&content).unwrap();
            assert_eq!(value["validated"], true);
            assert_eq!(value["data"]["meta"]["isComplete"], true);
        }
        other => panic!("expected Settled, got {:?}", other),
    }
}
