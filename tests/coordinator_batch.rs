// tests/coordinator_batch.rs
// Batch fan-out semantics: per-item isolation, status transitions, audit
// entries, and exact success/failure accounting.

use std::sync::Arc;

use content_evaluator::coordinator::BatchCoordinator;
use content_evaluator::evaluator::Evaluator;
use content_evaluator::gateway::MockGateway;
use content_evaluator::model::{ContentStatus, Decision, Item};
use content_evaluator::store::MemoryStatusTracker;

const GOOD_RESPONSE: &str =
    r#"{"innovation_score":7,"depth_score":6,"decision":"INTERESTING","key_concepts":["k"],"tldr":"t","reasoning":"r"}"#;

fn item(content_id: i64) -> Item {
    Item {
        content_id,
        task_id: format!("task-{content_id}"),
        title: format!("Title {content_id}"),
        url: format!("https://example.com/{content_id}"),
        content: "Some body text".to_string(),
        published_at: "2025-01-01T00:00:00Z".to_string(),
        platform: "rss".to_string(),
        author_name: "author".to_string(),
        content_hash: "hash".to_string(),
    }
}

fn coordinator_with(
    gateway: MockGateway,
) -> (Arc<BatchCoordinator>, Arc<MemoryStatusTracker>) {
    let evaluator = Arc::new(Evaluator::new(Arc::new(gateway)));
    let tracker = Arc::new(MemoryStatusTracker::new());
    let coordinator = Arc::new(BatchCoordinator::new(evaluator, tracker.clone()));
    (coordinator, tracker)
}

#[tokio::test]
async fn happy_batch_persists_and_marks_evaluated() {
    let (coordinator, tracker) = coordinator_with(MockGateway::always(GOOD_RESPONSE));

    let (success, failure) = coordinator
        .evaluate_batch(vec![item(1), item(2), item(3)])
        .await;

    assert_eq!((success, failure), (3, 0));
    assert_eq!(tracker.evaluation_count(), 3);
    for id in 1..=3 {
        assert_eq!(tracker.status_of(id), Some(ContentStatus::Evaluated));
        let stored = tracker.evaluation_of(id).unwrap();
        assert_eq!(stored.decision, Decision::Interesting);
    }

    // Two audit entries per item, one per observed transition.
    let log = tracker.log_entries();
    assert_eq!(log.len(), 6);
    let discarded = log
        .iter()
        .filter(|e| e.to_status == ContentStatus::Discarded)
        .count();
    assert_eq!(discarded, 0);
}

#[tokio::test]
async fn fallback_still_ends_evaluated_not_discarded() {
    let (coordinator, tracker) = coordinator_with(MockGateway::always("never valid json"));

    let (success, failure) = coordinator.evaluate_batch(vec![item(7)]).await;

    assert_eq!((success, failure), (1, 0));
    assert_eq!(tracker.status_of(7), Some(ContentStatus::Evaluated));
    let stored = tracker.evaluation_of(7).unwrap();
    assert_eq!(stored.decision, Decision::Bookmark);
    assert_eq!(stored.innovation_score, 5);
    assert_eq!(stored.depth_score, 5);
}

#[tokio::test]
async fn persistence_failure_discards_only_the_affected_item() {
    let (coordinator, tracker) = coordinator_with(MockGateway::always(GOOD_RESPONSE));
    tracker.fail_create_evaluation(2);

    let (success, failure) = coordinator
        .evaluate_batch(vec![item(1), item(2), item(3)])
        .await;

    // Exactly one failure, siblings unaffected.
    assert_eq!((success, failure), (2, 1));
    assert_eq!(tracker.status_of(1), Some(ContentStatus::Evaluated));
    assert_eq!(tracker.status_of(2), Some(ContentStatus::Discarded));
    assert_eq!(tracker.status_of(3), Some(ContentStatus::Evaluated));
    assert!(tracker.evaluation_of(2).is_none());

    // The discard transition carries the error text.
    let log = tracker.log_entries();
    let discard = log
        .iter()
        .find(|e| e.content_id == 2 && e.to_status == ContentStatus::Discarded)
        .expect("discard entry");
    assert!(discard.reason.contains("injected create failure for 2"));
}

#[tokio::test]
async fn duplicate_evaluation_is_a_noop_not_a_failure() {
    let (coordinator, tracker) = coordinator_with(MockGateway::always(GOOD_RESPONSE));

    let (s1, f1) = coordinator.evaluate_batch(vec![item(5)]).await;
    // Redelivery of the same item: the insert is skipped, the item still
    // settles as a success.
    let (s2, f2) = coordinator.evaluate_batch(vec![item(5)]).await;

    assert_eq!((s1, f1), (1, 0));
    assert_eq!((s2, f2), (1, 0));
    assert_eq!(tracker.evaluation_count(), 1);
    assert_eq!(tracker.status_of(5), Some(ContentStatus::Evaluated));
}

#[tokio::test]
async fn status_update_failure_at_start_discards_the_item() {
    let (coordinator, tracker) = coordinator_with(MockGateway::always(GOOD_RESPONSE));
    tracker.fail_status_update(9);

    let (success, failure) = coordinator.evaluate_batch(vec![item(9)]).await;

    assert_eq!((success, failure), (0, 1));
    // The discard path itself hits the same injected failure; the item must
    // still count as exactly one failure and nothing else may be persisted.
    assert!(tracker.evaluation_of(9).is_none());
}

#[tokio::test]
async fn empty_batch_settles_with_zero_counts() {
    let (coordinator, _tracker) = coordinator_with(MockGateway::always(GOOD_RESPONSE));
    let (success, failure) = coordinator.evaluate_batch(Vec::new()).await;
    assert_eq!((success, failure), (0, 0));
}
