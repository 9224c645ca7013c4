//! Prometheus metrics for the sync service

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};

lazy_static! {
    /// Histogram: full sync cycle duration (seconds)
    pub static ref CYCLE_DURATION: Histogram = register_histogram!(
        "hashi_cycle_duration_seconds",
        "Duration of full sync cycles",
        vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("Failed to create cycle_duration metric");

    /// Counter: sync cycles by outcome
    pub static ref SYNC_CYCLES: CounterVec = register_counter_vec!(
        "hashi_sync_cycles_total",
        "Total sync cycles by status",
        &["status"]
    )
    .expect("Failed to create sync_cycles metric");

    /// Counter: reconcile outcomes by kind (created/updated/noop/error)
    pub static ref RECONCILE_ACTIONS: CounterVec = register_counter_vec!(
        "hashi_reconcile_actions_total",
        "Reconciliation outcomes by kind",
        &["action"]
    )
    .expect("Failed to create reconcile_actions metric");

    /// Counter: remote API errors
    pub static ref API_ERRORS: CounterVec = register_counter_vec!(
        "hashi_api_errors_total",
        "Total API errors by type",
        &["error_type", "integration"]
    )
    .expect("Failed to create api_errors metric");

    /// Counter: webhook deliveries by outcome
    pub static ref WEBHOOK_DELIVERIES: CounterVec = register_counter_vec!(
        "hashi_webhook_deliveries_total",
        "Inbound webhook deliveries by outcome",
        &["outcome"]
    )
    .expect("Failed to create webhook_deliveries metric");

    /// Gauge: service health (1 = running, 0 = stopped)
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "hashi_health_status",
        "Service health status (1 = healthy, 0 = unhealthy)"
    )
    .expect("Failed to create health_status metric");
}

pub fn record_cycle_duration(duration_secs: f64) {
    CYCLE_DURATION.observe(duration_secs);
}

pub fn record_sync_cycle(status: &str) {
    SYNC_CYCLES.with_label_values(&[status]).inc();
}

pub fn record_reconcile(action: &str) {
    RECONCILE_ACTIONS.with_label_values(&[action]).inc();
}

pub fn record_api_error(error_type: &str, integration: &str) {
    API_ERRORS
        .with_label_values(&[error_type, integration])
        .inc();
}

pub fn record_webhook(outcome: &str) {
    WEBHOOK_DELIVERIES.with_label_values(&[outcome]).inc();
}

pub fn set_health_status(healthy: bool) {
    HEALTH_STATUS.set(if healthy { 1.0 } else { 0.0 });
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_exported() {
        record_cycle_duration(1.5);
        record_sync_cycle("success");
        record_reconcile("created");
        record_api_error("transport", "github");
        record_webhook("accepted");
        set_health_status(true);

        let output = encode_metrics();
        assert!(output.contains("hashi_cycle_duration_seconds"));
        assert!(output.contains("hashi_reconcile_actions_total"));
        assert!(output.contains("hashi_webhook_deliveries_total"));
    }
}
