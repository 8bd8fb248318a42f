//! Prometheus metrics

use crate::webhook::EventKind;
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record an upload attempt; `outcome` is `success` or the failing stage
pub fn record_upload(repo: &str, outcome: &'static str) {
    metrics::counter!("modelbox_uploads_total",
        "repo" => repo.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record model deletion
pub fn record_model_deleted(repo: &str) {
    metrics::counter!("modelbox_models_deleted_total",
        "repo" => repo.to_string()
    )
    .increment(1);
}

/// Record a denied access check
pub fn record_access_denied(permission: &'static str) {
    metrics::counter!("modelbox_access_denied_total",
        "permission" => permission
    )
    .increment(1);
}

/// Record webhook delivery failure
pub fn record_webhook_failure(event: EventKind) {
    let event = match event {
        EventKind::ModelUploaded => "model_uploaded",
        EventKind::ModelDeleted => "model_deleted",
    };
    metrics::counter!("modelbox_webhook_failures_total",
        "event" => event
    )
    .increment(1);
}

/// Record a prediction call by outcome
pub fn record_prediction(outcome: &'static str) {
    metrics::counter!("modelbox_predictions_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Update catalogued model count gauge
pub fn update_model_count(count: usize) {
    metrics::gauge!("modelbox_models_count").set(count as f64);
}
