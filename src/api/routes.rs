//! API route definitions

use crate::orchestrator::Orchestrator;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, put},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    // Multipart framing on top of the bundle itself
    let upload_limit = usize::try_from(state.orchestrator.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(64 * 1024);

    Router::new()
        // Liveness
        .route("/", get(handlers::root))
        .route("/ping", get(handlers::ping))
        .route("/metrics", get(handlers::metrics))
        // Repository catalogue
        .route(
            "/v1/repos/{user}/{name}/models/",
            put(handlers::upload_model)
                .layer(DefaultBodyLimit::max(upload_limit))
                .get(handlers::list_models),
        )
        .route(
            "/v1/repos/{user}/{name}/models/{id}",
            get(handlers::get_model).delete(handlers::delete_model),
        )
        .route(
            "/v1/repos/{user}/{name}/cache-hashes/",
            get(handlers::cache_hashes),
        )
        .route("/v1/repos/{user}/{name}/check-read", get(handlers::check_read))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
