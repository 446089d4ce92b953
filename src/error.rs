//! Error taxonomy for the pipeline. Each variant family is contained at a
//! different boundary: decode errors at the message, gateway/parse errors
//! inside the retry budget, store errors at the item, queue errors at the
//! poll loop.

use thiserror::Error;

/// A queue payload that is not valid UTF-8 JSON matching the `Item` schema.
/// Fatal for that message only: acked and dropped, never retried.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("payload does not match item schema: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("payload field `data` missing from stream entry")]
    MissingData,
}

/// Model invocation failure (transport, auth, non-2xx, empty completion).
/// Retryable within the state machine's budget.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model returned status {0}")]
    Status(u16),
    #[error("model response carried no completion")]
    EmptyCompletion,
}

/// Model response that could not be turned into a valid result.
/// Retryable within the state machine's budget.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in model response")]
    NoJson,
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("field `{0}` has an unusable value")]
    BadField(&'static str),
    #[error("gateway failure treated as parse input: {0}")]
    Gateway(String),
}

/// Persistence failure. Aborts only the affected item (→ DISCARDED); the
/// rest of the batch continues.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Queue connectivity failure. Pauses polling with backoff; never fatal to
/// the consumer loop.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("redis command failed: {0}")]
    Command(#[from] deadpool_redis::redis::RedisError),
}
