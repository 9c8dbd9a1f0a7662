//! Facility and organization endpoints.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde_json::Value;

use crate::aggregation::types::Facility;
use crate::error::MasterBusError;
use crate::validation::{is_valid_id, validate_facility_data};

use super::{cached_json, ApiError, AppState, WindowQuery};

/// Reject ids that could never have been stored and would not form a
/// well-delimited cache key.
pub(crate) fn checked_path_id(field: &str, id: &str) -> Result<(), ApiError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(MasterBusError::validation(field, "must be 1-64 characters of [A-Za-z0-9_.-]").into())
    }
}

/// `GET /facilities/:id/metrics`
pub async fn facility_metrics(
    State(state): State<AppState>,
    Path(facility_id): Path<String>,
    query: Result<Query<WindowQuery>, QueryRejection>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    checked_path_id("facility_id", &facility_id)?;
    let Query(query) = query?;
    let window = query.resolve(&state.service)?;

    let metric = state.service.facility_metrics(&facility_id, window).await?;
    cached_json(&state, &request_headers, &metric)
}

/// `GET /organizations/:id/metrics`
pub async fn organization_metrics(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
    query: Result<Query<WindowQuery>, QueryRejection>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    checked_path_id("organization_id", &organization_id)?;
    let Query(query) = query?;
    let window = query.resolve(&state.service)?;

    let metric = state
        .service
        .organization_metrics(&organization_id, window)
        .await?;
    cached_json(&state, &request_headers, &metric)
}

/// `POST /facilities`: create or replace a facility.
pub async fn create_facility(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Facility>), ApiError> {
    let Json(payload) = body?;
    let facility = validate_facility_data(&payload)?;

    let previous_organization = {
        let mut store = state.store.write().await;
        let previous = store
            .facility(&facility.id)
            .map(|existing| existing.organization_id.clone());

        if let Some(repository) = &state.repository {
            repository.upsert_facility(&facility).await?;
        }
        store.upsert_facility(facility.clone());
        previous
    };

    state
        .service
        .invalidate_facility(&facility.id, &facility.organization_id)
        .await;
    if let Some(previous) = previous_organization.filter(|org| *org != facility.organization_id) {
        state
            .service
            .invalidate_facility(&facility.id, &previous)
            .await;
    }

    tracing::info!(
        facility_id = %facility.id,
        organization_id = %facility.organization_id,
        "Facility stored"
    );
    Ok((StatusCode::CREATED, Json(facility)))
}
