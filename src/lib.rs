// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod evaluator;
pub mod gateway;
pub mod metrics;
pub mod model;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::consumer::{QueueBackend, RawMessage, StreamConsumer};
pub use crate::coordinator::BatchCoordinator;
pub use crate::evaluator::Evaluator;
pub use crate::gateway::{MockGateway, ModelGateway, OpenAiGateway};
pub use crate::model::{ContentStatus, Decision, EvaluationResult, Item};
pub use crate::store::{MemoryStatusTracker, PgStatusTracker, StatusTracker};
