//! consumer.rs — the queue reader. Owns consumer-group membership and the
//! stream cursor; polls in batches, hands decoded items to the batch
//! coordinator, and acknowledges each message only after its item's
//! pipeline has fully concluded (at-least-once delivery).
//!
//! Malformed payloads are acked immediately and dropped — a corrupt message
//! must never block group progress. Connectivity failures pause polling
//! with bounded backoff and retry forever; the loop has no terminal error
//! path and exits only on the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::streams::{StreamReadOptions, StreamReadReply};
use deadpool_redis::redis::{self, AsyncCommands};
use metrics::{counter, gauge};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::coordinator::BatchCoordinator;
use crate::error::{DecodeError, QueueError};
use crate::model::Item;

/// Backoff applied after a failed poll before the next attempt.
const READ_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// One raw stream entry: delivery id plus the opaque payload bytes.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub payload: Vec<u8>,
}

/// Seam between the reader loop and the concrete stream transport, so the
/// loop's ack discipline can be exercised against an in-memory backend.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Idempotently create the consumer group. "Already exists" is
    /// swallowed; any other failure is fatal at startup.
    async fn create_group(&self) -> Result<(), QueueError>;

    /// Return 0..count messages, blocking cooperatively up to `block` when
    /// none are available.
    async fn read_batch(&self, count: usize, block: Duration)
        -> Result<Vec<RawMessage>, QueueError>;

    /// Acknowledge fully handled messages.
    async fn ack(&self, ids: &[String]) -> Result<(), QueueError>;

    /// Best-effort stream depth for telemetry; 0 when unavailable.
    async fn stream_len(&self) -> u64 {
        0
    }
}

/// Redis Streams backend (`XGROUP CREATE … MKSTREAM`, `XREADGROUP`, `XACK`).
pub struct RedisBackend {
    pool: deadpool_redis::Pool,
    stream: String,
    group: String,
    consumer: String,
}

impl RedisBackend {
    pub fn new(pool: deadpool_redis::Pool, stream: &str, group: &str, consumer: &str) -> Self {
        Self {
            pool,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
        }
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn create_group(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(&self.stream, &self.group, "$")
            .await
        {
            Ok(()) => {
                info!(group = %self.group, stream = %self.stream, "created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                info!(group = %self.group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_batch(
        &self,
        count: usize,
        block: Duration,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let mut conn = self.pool.get().await?;
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count)
            .block(block.as_millis() as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[self.stream.as_str()], &[">"], &opts)
            .await?;

        let mut out = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let payload = entry
                    .map
                    .get("data")
                    .and_then(|v| redis::from_redis_value::<Vec<u8>>(v).ok())
                    .unwrap_or_default();
                out.push(RawMessage {
                    id: entry.id,
                    payload,
                });
            }
        }
        Ok(out)
    }

    async fn ack(&self, ids: &[String]) -> Result<(), QueueError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.xack(&self.stream, &self.group, ids).await?;
        Ok(())
    }

    async fn stream_len(&self) -> u64 {
        let Ok(mut conn) = self.pool.get().await else {
            return 0;
        };
        conn.xlen::<_, u64>(&self.stream).await.unwrap_or(0)
    }
}

/// Decode one raw stream entry into an `Item`. A failure here is fatal for
/// that message only.
pub fn decode_message(msg: &RawMessage) -> Result<Item, DecodeError> {
    if msg.payload.is_empty() {
        return Err(DecodeError::MissingData);
    }
    let text = String::from_utf8(msg.payload.clone())?;
    let item: Item = serde_json::from_str(&text)?;
    Ok(item)
}

pub struct StreamConsumer<B: QueueBackend> {
    backend: B,
    coordinator: Arc<BatchCoordinator>,
    batch_size: usize,
    block_timeout: Duration,
}

impl<B: QueueBackend> StreamConsumer<B> {
    pub fn new(
        backend: B,
        coordinator: Arc<BatchCoordinator>,
        batch_size: usize,
        block_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            coordinator,
            batch_size,
            block_timeout,
        }
    }

    /// Idempotent startup: ensure the consumer group exists.
    pub async fn initialize(&self) -> Result<(), QueueError> {
        self.backend.create_group().await
    }

    /// Main poll loop. Runs until the shutdown signal flips; an in-flight
    /// batch is allowed to finish before the loop exits, and anything not
    /// yet acked stays pending for redelivery.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(batch_size = self.batch_size, "consumer loop started");
        loop {
            let read = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                read = self.backend.read_batch(self.batch_size, self.block_timeout) => read,
            };

            match read {
                Ok(messages) => {
                    if !messages.is_empty() {
                        self.handle_batch(messages).await;
                    }
                    gauge!("consumer_stream_length").set(self.backend.stream_len().await as f64);
                }
                Err(e) => {
                    error!(error = %e, "queue read failed, backing off");
                    counter!("consumer_read_errors_total").increment(1);
                    // A vanished group (e.g. the stream was recreated) is
                    // recoverable: try to recreate it before the next poll.
                    if let QueueError::Command(ref re) = e {
                        if re.code() == Some("NOGROUP") {
                            if let Err(e) = self.backend.create_group().await {
                                warn!(error = %e, "failed to recreate consumer group");
                            }
                        }
                    }
                    tokio::time::sleep(READ_RETRY_BACKOFF).await;
                }
            }
        }
        info!("consumer loop stopped");
    }

    /// Decode, evaluate, then ack. Malformed messages are acked up front;
    /// everything else is acked only after the whole batch has settled.
    async fn handle_batch(&self, messages: Vec<RawMessage>) {
        let mut items = Vec::with_capacity(messages.len());
        let mut pending_ids = Vec::with_capacity(messages.len());

        for msg in messages {
            match decode_message(&msg) {
                Ok(item) => {
                    items.push(item);
                    pending_ids.push(msg.id);
                }
                Err(e) => {
                    warn!(id = %msg.id, error = %e, "dropping undecodable message");
                    counter!("consumer_decode_errors_total").increment(1);
                    if let Err(e) = self.backend.ack(std::slice::from_ref(&msg.id)).await {
                        warn!(id = %msg.id, error = %e, "failed to ack malformed message");
                    }
                }
            }
        }

        if items.is_empty() {
            return;
        }

        let (success, failure) = self.coordinator.evaluate_batch(items).await;

        // Every item has reached a terminal status; the batch is settled.
        if let Err(e) = self.backend.ack(&pending_ids).await {
            // Messages stay pending and will be redelivered: at-least-once.
            warn!(error = %e, count = pending_ids.len(), "failed to ack settled batch");
        }

        counter!("consumer_batches_total").increment(1);
        info!(success, failure, "processed batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, payload: &[u8]) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn decode_accepts_a_well_formed_item() {
        let json = br#"{"content_id":1,"task_id":"t","title":"a","url":"u","content":"c",
            "published_at":"2025-01-01T00:00:00Z","platform":"p","author_name":"n","content_hash":"h"}"#;
        let item = decode_message(&raw("1-0", json)).unwrap();
        assert_eq!(item.content_id, 1);
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let e = decode_message(&raw("1-0", &[0xff, 0xfe, 0x00]));
        assert!(matches!(e, Err(DecodeError::Utf8(_))));
    }

    #[test]
    fn decode_rejects_schema_mismatch() {
        let e = decode_message(&raw("1-0", br#"{"content_id":"not-a-number"}"#));
        assert!(matches!(e, Err(DecodeError::Schema(_))));
    }

    #[test]
    fn decode_rejects_missing_payload() {
        let e = decode_message(&raw("1-0", b""));
        assert!(matches!(e, Err(DecodeError::MissingData)));
    }
}
