//! model.rs — data shapes shared across the pipeline: queue items, the
//! persisted evaluation result, and the content status lifecycle.
//!
//! `Item` mirrors the ingestion queue payload one-to-one. `EvaluationResult`
//! is the single row persisted per content id; its field bounds (score range,
//! key-concept count, text lengths) are enforced by the evaluator before
//! anything reaches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One content item read from the ingestion queue. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub content_id: i64,
    pub task_id: String,
    pub title: String,
    pub url: String,
    pub content: String,
    /// ISO-8601 string as published by the upstream ingester; kept opaque.
    pub published_at: String,
    pub platform: String,
    pub author_name: String,
    pub content_hash: String,
}

/// Triage verdict for a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Interesting,
    Bookmark,
    Skip,
}

impl Decision {
    /// Normalize a raw model literal. Unrecognized or garbled input falls
    /// back to `Bookmark` — the model's verdict is advisory, never fatal.
    pub fn from_model_literal(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "INTERESTING" => Decision::Interesting,
            "SKIP" => Decision::Skip,
            _ => Decision::Bookmark,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Interesting => "INTERESTING",
            Decision::Bookmark => "BOOKMARK",
            Decision::Skip => "SKIP",
        }
    }
}

/// Content lifecycle as seen by the outside world. Created `Pending` by the
/// upstream ingester; this pipeline owns every later transition. Terminal
/// states are `Evaluated` and `Discarded` and are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentStatus {
    Pending,
    Processing,
    Evaluated,
    Discarded,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "PENDING",
            ContentStatus::Processing => "PROCESSING",
            ContentStatus::Evaluated => "EVALUATED",
            ContentStatus::Discarded => "DISCARDED",
        }
    }
}

/// The persisted outcome of one evaluation. Exactly one row per content id;
/// a second insert for the same id is a no-op at the store layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Innovation score, clamped to 0..=10.
    pub innovation_score: i32,
    /// Depth score, clamped to 0..=10.
    pub depth_score: i32,
    pub decision: Decision,
    /// At most 5 entries, model order preserved.
    pub key_concepts: Vec<String>,
    /// At most 100 chars.
    pub tldr: String,
    /// At most 200 chars.
    pub reasoning: String,
    pub evaluator_version: String,
}

/// One append-only audit record per observed status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub content_id: i64,
    pub task_id: String,
    pub from_status: ContentStatus,
    pub to_status: ContentStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Clamp a raw score into the valid `0..=10` band. Out-of-range model output
/// is silently pulled in, never rejected.
pub fn clamp_score(raw: i64) -> i32 {
    raw.clamp(0, 10) as i32
}

/// Deterministic char-boundary-safe prefix truncation.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_literal_is_case_insensitive() {
        assert_eq!(Decision::from_model_literal("interesting"), Decision::Interesting);
        assert_eq!(Decision::from_model_literal(" SKIP "), Decision::Skip);
        assert_eq!(Decision::from_model_literal("Bookmark"), Decision::Bookmark);
    }

    #[test]
    fn unknown_decision_defaults_to_bookmark() {
        assert_eq!(Decision::from_model_literal("MAYBE"), Decision::Bookmark);
        assert_eq!(Decision::from_model_literal(""), Decision::Bookmark);
    }

    #[test]
    fn decision_serializes_uppercase() {
        let v = serde_json::to_value(Decision::Interesting).unwrap();
        assert_eq!(v, serde_json::json!("INTERESTING"));
    }

    #[test]
    fn scores_are_clamped_both_ways() {
        assert_eq!(clamp_score(12), 10);
        assert_eq!(clamp_score(-3), 0);
        assert_eq!(clamp_score(7), 7);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "žluťoučký kůň";
        assert_eq!(truncate_chars(s, 4), "žluť");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn item_decodes_from_queue_json() {
        let raw = serde_json::json!({
            "content_id": 42,
            "task_id": "t-1",
            "title": "A title",
            "url": "https://example.com/a",
            "content": "body",
            "published_at": "2025-01-01T00:00:00Z",
            "platform": "rss",
            "author_name": "someone",
            "content_hash": "deadbeef"
        });
        let item: Item = serde_json::from_value(raw).unwrap();
        assert_eq!(item.content_id, 42);
        assert_eq!(item.task_id, "t-1");
    }
}
