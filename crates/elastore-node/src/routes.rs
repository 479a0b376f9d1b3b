//! Diagnostics HTTP routes

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use elastore_core::StorageService;
use tower_http::trace::TraceLayer;

/// Create the diagnostics router
pub fn create_router(service: StorageService) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// `200 OK` while the service is running, `503` otherwise
async fn health_check(State(service): State<StorageService>) -> impl IntoResponse {
    if service.is_running() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stopped")
    }
}

async fn stats(State(service): State<StorageService>) -> impl IntoResponse {
    Json(service.stats().await)
}
