use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::AppState;

/// `GET /health`: liveness plus current cache occupancy.
pub async fn health(State(state): State<AppState>) -> Response {
    let stats = state.service.cache_stats().await;
    let settings = state.service.cache_settings();

    (
        [(header::CACHE_CONTROL, "no-store")],
        Json(json!({
            "status": "ok",
            "cache": {
                "entries": stats.entries(),
                "capacity": settings.capacity,
            }
        })),
    )
        .into_response()
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    state.service.refresh_cache_gauges().await;
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => super::ApiError::Internal(format!("metrics error: {}", err)).into_response(),
    }
}
