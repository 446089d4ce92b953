//! Prometheus recorder bootstrap and one-time series registration.

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use tracing::info;

/// Register descriptions once so every series shows up on the exporter.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("eval_success_total", "Evaluations parsed and validated.");
        describe_counter!("eval_retries_total", "Model invocations retried after a failure.");
        describe_counter!(
            "eval_fallback_total",
            "Evaluations settled by the deterministic fallback."
        );
        describe_counter!("coordinator_batches_total", "Batches fanned out.");
        describe_counter!(
            "coordinator_items_evaluated_total",
            "Items that reached EVALUATED."
        );
        describe_counter!(
            "coordinator_items_discarded_total",
            "Items that reached DISCARDED."
        );
        describe_counter!("consumer_batches_total", "Batches read and settled.");
        describe_counter!(
            "consumer_decode_errors_total",
            "Messages dropped for failing structural decode."
        );
        describe_counter!("consumer_read_errors_total", "Failed stream reads.");
        describe_gauge!("consumer_stream_length", "Depth of the ingestion stream.");
    });
}

/// Install the Prometheus exporter when an address is configured. The
/// exporter serves `/metrics` on its own listener; without an address the
/// metrics macros stay no-ops.
pub fn install_exporter(addr: Option<&str>) -> anyhow::Result<()> {
    let Some(addr) = addr else {
        return Ok(());
    };
    let socket: std::net::SocketAddr = addr.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(socket)
        .install()?;
    info!(%socket, "prometheus exporter listening");
    ensure_metrics_described();
    Ok(())
}
