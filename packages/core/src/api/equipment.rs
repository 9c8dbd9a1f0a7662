//! Equipment and maintenance intake.
//!
//! Every write validates, persists (when a database is configured),
//! updates the store and then drops the cached metrics it affects.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::aggregation::types::{Equipment, MaintenanceRecord};
use crate::error::MasterBusError;
use crate::validation::{validate_equipment_data, validate_maintenance_record_data};

use super::facilities::checked_path_id;
use super::{ApiError, AppState};

/// `POST /equipment`: create or replace equipment, including any
/// embedded maintenance history.
pub async fn create_equipment(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Equipment>), ApiError> {
    let Json(payload) = body?;
    let equipment = validate_equipment_data(&payload)?;

    // (facility id, organization id) pairs whose metrics change.
    let affected = {
        let mut store = state.store.write().await;
        let organization = store
            .facility(&equipment.facility_id)
            .map(|facility| facility.organization_id.clone())
            .ok_or_else(|| MasterBusError::facility_not_found(&equipment.facility_id))?;

        let mut affected = vec![(equipment.facility_id.clone(), organization)];
        if let Some(previous) = store.equipment(&equipment.id) {
            if previous.facility_id != equipment.facility_id {
                if let Some(old) = store.facility(&previous.facility_id) {
                    affected.push((old.id.clone(), old.organization_id.clone()));
                }
            }
        }

        if let Some(repository) = &state.repository {
            repository.upsert_equipment(&equipment).await?;
        }
        store.upsert_equipment(equipment.clone())?;
        affected
    };

    for (facility_id, organization_id) in &affected {
        state
            .service
            .invalidate_facility(facility_id, organization_id)
            .await;
    }

    tracing::info!(
        equipment_id = %equipment.id,
        facility_id = %equipment.facility_id,
        records = equipment.maintenance_records.len(),
        "Equipment stored"
    );
    Ok((StatusCode::CREATED, Json(equipment)))
}

/// `POST /equipment/:id/maintenance`: record one maintenance event. The
/// body's `equipment_id` may be omitted; if present it must match the path.
pub async fn record_maintenance(
    State(state): State<AppState>,
    Path(equipment_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<MaintenanceRecord>), ApiError> {
    checked_path_id("equipment_id", &equipment_id)?;
    let Json(mut payload) = body?;

    if let Some(fields) = payload.as_object_mut() {
        match fields.get("equipment_id").cloned() {
            None | Some(Value::Null) => {
                fields.insert("equipment_id".to_string(), Value::String(equipment_id.clone()));
            }
            Some(given) if given.as_str() != Some(equipment_id.as_str()) => {
                return Err(MasterBusError::validation(
                    "equipment_id",
                    format!("does not match equipment '{}'", equipment_id),
                )
                .into());
            }
            Some(_) => {}
        }
    }
    let record = validate_maintenance_record_data(&payload)?;

    let (facility_id, organization_id) = {
        let mut store = state.store.write().await;
        let facility_id = store
            .equipment(&record.equipment_id)
            .map(|equipment| equipment.facility_id.clone())
            .ok_or_else(|| MasterBusError::equipment_not_found(&record.equipment_id))?;
        let organization_id = store
            .facility(&facility_id)
            .map(|facility| facility.organization_id.clone())
            .ok_or_else(|| MasterBusError::facility_not_found(&facility_id))?;

        if let Some(repository) = &state.repository {
            repository.upsert_maintenance_record(&record).await?;
        }
        store.add_maintenance_record(record.clone())?;
        (facility_id, organization_id)
    };

    state
        .service
        .invalidate_facility(&facility_id, &organization_id)
        .await;

    tracing::info!(
        equipment_id = %record.equipment_id,
        record_id = %record.id,
        outcome = %record.outcome,
        "Maintenance recorded"
    );
    Ok((StatusCode::CREATED, Json(record)))
}
