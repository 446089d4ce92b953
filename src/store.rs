//! store.rs — status tracker and append-only audit log over Postgres.
//!
//! Three write paths per item: the evaluation row insert (idempotent per
//! content id), the content status update, and the status-log append. Each
//! statement scope-acquires its own connection from the shared pool; there
//! is no transaction spanning the three writes for one item (inherited
//! semantics, see DESIGN.md).

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::warn;

use crate::error::StoreError;
use crate::model::{ContentStatus, EvaluationResult, StatusLogEntry};

#[async_trait]
pub trait StatusTracker: Send + Sync {
    /// Insert the evaluation row. Returns `Ok(None)` when a row for this
    /// content id already exists — a duplicate is a no-op, never an error.
    async fn create_evaluation(
        &self,
        content_id: i64,
        task_id: &str,
        result: &EvaluationResult,
    ) -> Result<Option<i64>, StoreError>;

    async fn update_content_status(
        &self,
        content_id: i64,
        status: ContentStatus,
    ) -> Result<(), StoreError>;

    async fn update_content_status_by_task_id(
        &self,
        task_id: &str,
        status: ContentStatus,
    ) -> Result<(), StoreError>;

    /// Append one audit entry for an observed transition. Insert only;
    /// entries are never updated or deleted.
    async fn log_status_change(
        &self,
        content_id: i64,
        task_id: &str,
        from: ContentStatus,
        to: ContentStatus,
        reason: &str,
    ) -> Result<(), StoreError>;
}

pub struct PgStatusTracker {
    pool: PgPool,
}

impl PgStatusTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusTracker for PgStatusTracker {
    async fn create_evaluation(
        &self,
        content_id: i64,
        task_id: &str,
        result: &EvaluationResult,
    ) -> Result<Option<i64>, StoreError> {
        let now = Utc::now();
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO evaluation (
                content_id, task_id, innovation_score, depth_score,
                decision, reasoning, tldr, key_concepts, evaluated_at,
                evaluator_version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(content_id)
        .bind(task_id)
        .bind(result.innovation_score)
        .bind(result.depth_score)
        .bind(result.decision.as_str())
        .bind(&result.reasoning)
        .bind(&result.tldr)
        .bind(&result.key_concepts)
        .bind(now)
        .bind(&result.evaluator_version)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(id) => Ok(Some(id)),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                warn!(content_id, "evaluation already exists, skipping insert");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_content_status(
        &self,
        content_id: i64,
        status: ContentStatus,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE content SET status = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(content_id)
        .execute(&self.pool)
        .await?;

        // Exactly one row is expected; anything else points at an id drift
        // between queue and database. Observed, not fatal.
        if done.rows_affected() != 1 {
            warn!(
                content_id,
                status = status.as_str(),
                rows = done.rows_affected(),
                "content status update affected an unexpected row count"
            );
        }
        Ok(())
    }

    async fn update_content_status_by_task_id(
        &self,
        task_id: &str,
        status: ContentStatus,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE content SET status = $1, updated_at = $2 WHERE task_id = $3",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() != 1 {
            warn!(
                task_id,
                status = status.as_str(),
                rows = done.rows_affected(),
                "content status update by task affected an unexpected row count"
            );
        }
        Ok(())
    }

    async fn log_status_change(
        &self,
        content_id: i64,
        task_id: &str,
        from: ContentStatus,
        to: ContentStatus,
        reason: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO status_log (content_id, task_id, from_status, to_status, reason, logged_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(content_id)
        .bind(task_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ------------------------------------------------------------
// In-memory tracker (tests, local runs without Postgres)
// ------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    evaluations: BTreeMap<i64, EvaluationResult>,
    statuses: BTreeMap<i64, ContentStatus>,
    log: Vec<StatusLogEntry>,
    next_id: i64,
}

/// Same contract as `PgStatusTracker`, backed by process memory: duplicate
/// inserts are a no-op, the log is append-only. Failures can be injected
/// per content id to exercise the coordinator's discard path.
#[derive(Default)]
pub struct MemoryStatusTracker {
    inner: Mutex<MemoryState>,
    fail_create_for: Mutex<HashSet<i64>>,
    fail_update_for: Mutex<HashSet<i64>>,
}

impl MemoryStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_evaluation` fail for this content id.
    pub fn fail_create_evaluation(&self, content_id: i64) {
        self.fail_create_for
            .lock()
            .expect("tracker lock")
            .insert(content_id);
    }

    /// Make `update_content_status` fail for this content id.
    pub fn fail_status_update(&self, content_id: i64) {
        self.fail_update_for
            .lock()
            .expect("tracker lock")
            .insert(content_id);
    }

    pub fn status_of(&self, content_id: i64) -> Option<ContentStatus> {
        self.inner
            .lock()
            .expect("tracker lock")
            .statuses
            .get(&content_id)
            .copied()
    }

    pub fn evaluation_of(&self, content_id: i64) -> Option<EvaluationResult> {
        self.inner
            .lock()
            .expect("tracker lock")
            .evaluations
            .get(&content_id)
            .cloned()
    }

    pub fn evaluation_count(&self) -> usize {
        self.inner.lock().expect("tracker lock").evaluations.len()
    }

    pub fn log_entries(&self) -> Vec<StatusLogEntry> {
        self.inner.lock().expect("tracker lock").log.clone()
    }
}

#[async_trait]
impl StatusTracker for MemoryStatusTracker {
    async fn create_evaluation(
        &self,
        content_id: i64,
        _task_id: &str,
        result: &EvaluationResult,
    ) -> Result<Option<i64>, StoreError> {
        if self
            .fail_create_for
            .lock()
            .expect("tracker lock")
            .contains(&content_id)
        {
            return Err(StoreError::Unavailable(format!(
                "injected create failure for {content_id}"
            )));
        }
        let mut state = self.inner.lock().expect("tracker lock");
        if state.evaluations.contains_key(&content_id) {
            warn!(content_id, "evaluation already exists, skipping insert");
            return Ok(None);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.evaluations.insert(content_id, result.clone());
        Ok(Some(id))
    }

    async fn update_content_status(
        &self,
        content_id: i64,
        status: ContentStatus,
    ) -> Result<(), StoreError> {
        if self
            .fail_update_for
            .lock()
            .expect("tracker lock")
            .contains(&content_id)
        {
            return Err(StoreError::Unavailable(format!(
                "injected status failure for {content_id}"
            )));
        }
        self.inner
            .lock()
            .expect("tracker lock")
            .statuses
            .insert(content_id, status);
        Ok(())
    }

    async fn update_content_status_by_task_id(
        &self,
        _task_id: &str,
        _status: ContentStatus,
    ) -> Result<(), StoreError> {
        // Task ids are not indexed in the memory tracker; nothing to update.
        Ok(())
    }

    async fn log_status_change(
        &self,
        content_id: i64,
        task_id: &str,
        from: ContentStatus,
        to: ContentStatus,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("tracker lock")
            .log
            .push(StatusLogEntry {
                content_id,
                task_id: task_id.to_string(),
                from_status: from,
                to_status: to,
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
        Ok(())
    }
}
