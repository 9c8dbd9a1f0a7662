use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::MasterBusError;

use super::{ApiError, AppState};

/// Exactly one of `key` or `prefix`.
#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub key: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

/// `POST /cache/invalidate`
pub async fn invalidate(
    State(state): State<AppState>,
    body: Result<Json<InvalidateRequest>, JsonRejection>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let Json(request) = body?;

    let removed = match (request.key, request.prefix) {
        (Some(key), None) => state.service.invalidate_key(&key).await,
        (None, Some(prefix)) if !prefix.is_empty() => {
            state.service.invalidate_prefix(&prefix).await
        }
        (None, Some(_)) => {
            return Err(MasterBusError::validation("prefix", "must not be empty").into())
        }
        _ => {
            return Err(
                MasterBusError::validation("body", "exactly one of `key` or `prefix` is required")
                    .into(),
            )
        }
    };

    state.service.refresh_cache_gauges().await;
    tracing::info!(removed, "Cache invalidated on request");
    Ok(Json(InvalidateResponse { removed }))
}
