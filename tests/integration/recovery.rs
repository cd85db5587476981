//! Restart recovery and retention sweep over a persisted store

use std::collections::HashMap;
use std::sync::Arc;

use genflow::config::GenerationSettings;
use genflow::task::orchestrator::INTERRUPTED_MESSAGE;
use genflow::task::{
    now_millis, DocumentProbe, GenerationOrchestrator, GenerationPhase, RecoveryAction,
    RecoveryOutcome, SettledPhase, TaskRecord,
};

use crate::integration::test_utils::{orchestrator_with, temp_store};

struct FixedProbe(HashMap<String, usize>);

impl DocumentProbe for FixedProbe {
    fn finished_content_len(&self, document_id: &str) -> Option<usize> {
        self.0.get(document_id).copied()
    }
}

fn generating_record(content: &str) -> TaskRecord {
    let now = now_millis();
    TaskRecord {
        phase: GenerationPhase::Generating,
        start_time: now - 5_000,
        elapsed_time: 5,
        stream_content: content.to_string(),
        error: None,
        updated_at: now,
    }
}

#[test]
fn crashed_attempt_with_enough_content_recovers_as_completed() {
    let (_dir, store) = temp_store();
    {
        let before_crash = orchestrator_with(store.clone());
        let id = before_crash.start("doc1").handle().request_id;
        assert!(before_crash.append("doc1", id, &"x".repeat(150)));
    }

    let after_restart = orchestrator_with(store.clone());
    assert_eq!(
        after_restart.recover("doc1").unwrap(),
        RecoveryOutcome::RecoveredAsCompleted
    );
    assert_eq!(after_restart.phase("doc1"), GenerationPhase::Completed);

    let record = store.get("doc1").unwrap().unwrap();
    assert_eq!(record.phase, GenerationPhase::Completed);
    assert!(record.error.is_none());
    assert_eq!(record.stream_content.len(), 150);
}

#[test]
fn crashed_attempt_without_content_becomes_error_with_notice() {
    let (_dir, store) = temp_store();
    store.put("doc1", &generating_record("short")).unwrap();

    let orchestrator = orchestrator_with(store.clone());
    let outcome = orchestrator.recover("doc1").unwrap();
    let notice = outcome.notice().expect("notice for interrupted task");
    assert!(matches!(outcome, RecoveryOutcome::Interrupted(_)));
    assert_eq!(notice.document_id, "doc1");
    assert_eq!(notice.message, INTERRUPTED_MESSAGE);
    assert_eq!(notice.action, RecoveryAction::Retry);

    let record = store.get("doc1").unwrap().unwrap();
    assert_eq!(record.phase, GenerationPhase::Error);
    assert_eq!(record.error.as_deref(), Some(INTERRUPTED_MESSAGE));

    assert!(orchestrator.start("doc1").is_started());
}

#[test]
fn document_probe_overrides_snapshot_length() {
    let (_dir, store) = temp_store();
    store.put("has-doc", &generating_record("")).unwrap();
    store.put("empty-doc", &generating_record(&"y".repeat(500))).unwrap();

    let probe = FixedProbe(HashMap::from([
        ("has-doc".to_string(), 2_000),
        ("empty-doc".to_string(), 0),
    ]));
    let orchestrator = GenerationOrchestrator::new(store.clone(), &GenerationSettings::default())
        .with_document_probe(Arc::new(probe));

    assert_eq!(
        orchestrator.recover("has-doc").unwrap(),
        RecoveryOutcome::RecoveredAsCompleted
    );
    assert!(matches!(
        orchestrator.recover("empty-doc").unwrap(),
        RecoveryOutcome::Interrupted(_)
    ));
}

#[test]
fn threshold_comes_from_settings() {
    let (_dir, store) = temp_store();
    store.put("doc1", &generating_record("twelve chars")).unwrap();

    let settings = GenerationSettings {
        recovery_min_content_len: 12,
        ..GenerationSettings::default()
    };
    let orchestrator = GenerationOrchestrator::new(store, &settings);
    assert_eq!(
        orchestrator.recover("doc1").unwrap(),
        RecoveryOutcome::RecoveredAsCompleted
    );
}

#[test]
fn settled_records_are_restored_and_errors_resurface() {
    let (_dir, store) = temp_store();
    let mut done = generating_record("final");
    done.phase = GenerationPhase::Interactive;
    store.put("asking", &done).unwrap();

    let mut failed = generating_record("");
    failed.phase = GenerationPhase::Error;
    failed.error = Some("provider unavailable".to_string());
    store.put("failed", &failed).unwrap();

    let orchestrator = orchestrator_with(store.clone());
    let outcomes = orchestrator.recover_all().unwrap();
    let ids: Vec<&str> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["asking", "failed"]);

    assert_eq!(
        outcomes[0].1,
        RecoveryOutcome::Restored(GenerationPhase::Interactive)
    );
    match &outcomes[1].1 {
        RecoveryOutcome::PreviouslyFailed(notice) => {
            assert_eq!(notice.message, "provider unavailable")
        }
        other => panic!("expected PreviouslyFailed, got {:?}", other),
    }

    let snapshot = orchestrator.snapshot("asking").unwrap();
    assert_eq!(snapshot.content(), "final");
    assert_eq!(snapshot.elapsed_seconds, 5);
    assert_eq!(store.get("asking").unwrap().unwrap(), done);
}

#[test]
fn recovery_leaves_live_attempts_alone() {
    let (_dir, store) = temp_store();
    let orchestrator = orchestrator_with(store);
    let id = orchestrator.start("doc1").handle().request_id;

    assert_eq!(orchestrator.recover("doc1").unwrap(), RecoveryOutcome::InFlight);
    assert!(orchestrator.is_current("doc1", id));
}

#[test]
fn sweep_removes_only_expired_settled_records() {
    let (_dir, store) = temp_store();
    let settings = GenerationSettings {
        retention_hours: 1,
        ..GenerationSettings::default()
    };
    let orchestrator = GenerationOrchestrator::new(store.clone(), &settings);

    let two_hours_ago = now_millis() - 2 * 60 * 60 * 1000;
    let mut expired = generating_record("old");
    expired.phase = GenerationPhase::Completed;
    expired.updated_at = two_hours_ago;
    store.put("expired", &expired).unwrap();

    let mut stuck = generating_record("old");
    stuck.updated_at = two_hours_ago;
    store.put("stuck", &stuck).unwrap();

    let id = orchestrator.start("recent").handle().request_id;
    orchestrator.complete("recent", id, SettledPhase::Completed);

    assert_eq!(orchestrator.sweep().unwrap(), 1);
    assert!(store.get("expired").unwrap().is_none());
    assert!(store.get("stuck").unwrap().is_some());
    assert!(store.get("recent").unwrap().is_some());
}
