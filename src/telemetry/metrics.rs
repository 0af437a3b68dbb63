//! Prometheus metrics export
//!
//! Counters recorded across the runtime:
//! - `quantrun_events_processed_total` / `quantrun_events_faulted_total`
//! - `quantrun_timer_fires_total`
//! - `quantrun_spot_records_total`
//! - `quantrun_eval_units_completed_total` / `quantrun_eval_units_failed_total`

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and serve `/metrics` on the given port
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!(port = port, "Metrics exporter listening");
    Ok(())
}
