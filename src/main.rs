//! Content Evaluator — Binary Entrypoint
//! Wires the database pool, the Redis stream consumer, the model gateway and
//! the batch coordinator, then runs the consumer loop until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use content_evaluator::config::Settings;
use content_evaluator::consumer::{RedisBackend, StreamConsumer};
use content_evaluator::coordinator::BatchCoordinator;
use content_evaluator::evaluator::Evaluator;
use content_evaluator::gateway::OpenAiGateway;
use content_evaluator::store::PgStatusTracker;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("content_evaluator=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env();
    content_evaluator::metrics::install_exporter(settings.metrics_addr.as_deref())?;

    // --- Shared resource handles, owned here and injected below ---
    let pg_pool = PgPoolOptions::new()
        .min_connections(settings.db_pool_min_size)
        .max_connections(settings.db_pool_max_size)
        .connect(&settings.database_url())
        .await
        .context("connecting to postgres")?;
    info!(host = %settings.db_host, db = %settings.db_name, "database connected");

    let redis_pool = deadpool_redis::Config::from_url(&settings.redis_url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .context("creating redis pool")?;
    info!(url = %settings.redis_url, "redis pool ready");

    let gateway = Arc::new(OpenAiGateway::new(
        &settings.llm_model,
        &settings.llm_api_key,
        &settings.llm_base_url,
    ));
    let evaluator = Arc::new(
        Evaluator::new(gateway)
            .with_max_retries(settings.max_retries)
            .with_content_prefix_chars(settings.content_prefix_chars),
    );
    let tracker = Arc::new(PgStatusTracker::new(pg_pool));
    let coordinator = Arc::new(BatchCoordinator::new(evaluator, tracker));

    let backend = RedisBackend::new(
        redis_pool,
        &settings.stream_name,
        &settings.consumer_group,
        &settings.consumer_name,
    );
    let consumer = StreamConsumer::new(
        backend,
        coordinator,
        settings.batch_size,
        Duration::from_millis(settings.block_timeout_ms),
    );

    // Group creation is idempotent; any failure other than "already exists"
    // is fatal at startup.
    consumer
        .initialize()
        .await
        .context("creating consumer group")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    info!(
        group = %settings.consumer_group,
        consumer = %settings.consumer_name,
        batch_size = settings.batch_size,
        "evaluator running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received, draining in-flight batch");

    // Cooperative shutdown: the loop finishes the batch in flight; anything
    // not yet acked stays pending for redelivery.
    let _ = shutdown_tx.send(true);
    consumer_task.await.context("joining consumer task")?;

    info!("shutdown complete");
    Ok(())
}
