//! coordinator.rs — fans the evaluation state machine out across a fetched
//! batch with full per-item isolation. One item's persistence failure must
//! never abort its siblings; a completed batch always reports exact success
//! and failure counts and never errors itself.

use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use tracing::{error, info};

use crate::error::StoreError;
use crate::evaluator::Evaluator;
use crate::model::{ContentStatus, Item};
use crate::store::StatusTracker;

pub struct BatchCoordinator {
    evaluator: Arc<Evaluator>,
    tracker: Arc<dyn StatusTracker>,
}

impl BatchCoordinator {
    pub fn new(evaluator: Arc<Evaluator>, tracker: Arc<dyn StatusTracker>) -> Self {
        Self { evaluator, tracker }
    }

    /// Evaluate every item in the batch concurrently. Returns
    /// `(success_count, failure_count)`; the batch is settled (safe to ack)
    /// once this returns. No ordering guarantee among items.
    pub async fn evaluate_batch(&self, items: Vec<Item>) -> (usize, usize) {
        let outcomes = join_all(items.into_iter().map(|item| self.process_item(item))).await;

        let success = outcomes.iter().filter(|ok| **ok).count();
        let failure = outcomes.len() - success;
        counter!("coordinator_batches_total").increment(1);
        (success, failure)
    }

    /// Run one item through the full pipeline. Returns `true` on a completed
    /// evaluation (model success and fallback both count), `false` when the
    /// item had to be discarded.
    async fn process_item(&self, item: Item) -> bool {
        match self.try_process(&item).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    content_id = item.content_id,
                    error = %e,
                    "evaluation pipeline failed, discarding item"
                );
                self.discard(&item, &e.to_string()).await;
                false
            }
        }
    }

    async fn try_process(&self, item: &Item) -> Result<(), StoreError> {
        self.tracker
            .update_content_status(item.content_id, ContentStatus::Processing)
            .await?;
        self.tracker
            .log_status_change(
                item.content_id,
                &item.task_id,
                ContentStatus::Pending,
                ContentStatus::Processing,
                "Picked up by evaluator",
            )
            .await?;

        // Never errors: worst case is the deterministic fallback, which is
        // still a completed evaluation.
        let result = self
            .evaluator
            .evaluate(&item.title, &item.content, &item.url)
            .await;

        // Duplicate insert is a no-op; the item still ends EVALUATED.
        self.tracker
            .create_evaluation(item.content_id, &item.task_id, &result)
            .await?;

        self.tracker
            .update_content_status(item.content_id, ContentStatus::Evaluated)
            .await?;
        self.tracker
            .log_status_change(
                item.content_id,
                &item.task_id,
                ContentStatus::Processing,
                ContentStatus::Evaluated,
                &format!("Evaluated with decision: {}", result.decision.as_str()),
            )
            .await?;

        info!(
            content_id = item.content_id,
            innovation = result.innovation_score,
            depth = result.depth_score,
            decision = result.decision.as_str(),
            "content evaluated"
        );
        counter!("coordinator_items_evaluated_total").increment(1);
        Ok(())
    }

    /// Terminal failure path. Best-effort: a second store failure here is
    /// logged and swallowed so the batch keeps its per-item isolation.
    async fn discard(&self, item: &Item, reason: &str) {
        counter!("coordinator_items_discarded_total").increment(1);
        if let Err(e) = self
            .tracker
            .update_content_status(item.content_id, ContentStatus::Discarded)
            .await
        {
            error!(content_id = item.content_id, error = %e, "failed to mark item discarded");
            return;
        }
        if let Err(e) = self
            .tracker
            .log_status_change(
                item.content_id,
                &item.task_id,
                ContentStatus::Processing,
                ContentStatus::Discarded,
                &format!("Evaluation error: {reason}"),
            )
            .await
        {
            error!(content_id = item.content_id, error = %e, "failed to log discard transition");
        }
    }
}
