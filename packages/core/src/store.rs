//! In-memory facility store.
//!
//! `FacilityStore` holds the primary data model: facilities, their
//! equipment and each equipment's maintenance history. Records are kept
//! sorted by `performed_at`, so every read sees a non-decreasing sequence.
//!
//! The store itself is not `Sync`; callers wrap it in
//! `Arc<RwLock<FacilityStore>>` so it can be shared between the intake
//! handlers (writers) and the aggregator (reader).

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::aggregation::provider::{
    FacilityDataProvider, FacilitySnapshot, ProviderError, ProviderResult,
};
use crate::aggregation::types::{Equipment, Facility, MaintenanceRecord};
use crate::error::MasterBusError;

/// Primary data model for facilities, equipment and maintenance history.
#[derive(Debug, Default)]
pub struct FacilityStore {
    facilities: BTreeMap<String, Facility>,
    equipment: BTreeMap<String, Equipment>,
    /// facility id -> equipment ids
    facility_equipment: BTreeMap<String, BTreeSet<String>>,
}

impl FacilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a facility. Existing equipment stays attached.
    pub fn upsert_facility(&mut self, facility: Facility) {
        self.facility_equipment
            .entry(facility.id.clone())
            .or_default();
        self.facilities.insert(facility.id.clone(), facility);
    }

    /// Insert or replace a piece of equipment.
    ///
    /// Fails with `FacilityNotFound` when its facility does not exist.
    /// Moving equipment to another facility detaches it from the old one.
    pub fn upsert_equipment(&mut self, mut equipment: Equipment) -> Result<(), MasterBusError> {
        if !self.facilities.contains_key(&equipment.facility_id) {
            return Err(MasterBusError::facility_not_found(&equipment.facility_id));
        }

        if let Some(previous) = self.equipment.get(&equipment.id) {
            if previous.facility_id != equipment.facility_id {
                if let Some(ids) = self.facility_equipment.get_mut(&previous.facility_id) {
                    ids.remove(&equipment.id);
                }
            }
        }

        equipment
            .maintenance_records
            .sort_by_key(|record| record.performed_at);

        self.facility_equipment
            .entry(equipment.facility_id.clone())
            .or_default()
            .insert(equipment.id.clone());
        self.equipment.insert(equipment.id.clone(), equipment);
        Ok(())
    }

    /// Append a maintenance record, keeping the history ordered.
    ///
    /// A record with the id of an existing record replaces it. Returns the
    /// owning equipment's facility id.
    pub fn add_maintenance_record(
        &mut self,
        record: MaintenanceRecord,
    ) -> Result<&str, MasterBusError> {
        let equipment = self
            .equipment
            .get_mut(&record.equipment_id)
            .ok_or_else(|| MasterBusError::equipment_not_found(&record.equipment_id))?;

        let records = &mut equipment.maintenance_records;
        records.retain(|existing| existing.id != record.id);
        let at = records.partition_point(|existing| existing.performed_at <= record.performed_at);
        records.insert(at, record);

        Ok(&equipment.facility_id)
    }

    /// Remove a piece of equipment with its history. Returns it if present.
    pub fn remove_equipment(&mut self, equipment_id: &str) -> Option<Equipment> {
        let equipment = self.equipment.remove(equipment_id)?;
        if let Some(ids) = self.facility_equipment.get_mut(&equipment.facility_id) {
            ids.remove(equipment_id);
        }
        Some(equipment)
    }

    pub fn facility(&self, facility_id: &str) -> Option<&Facility> {
        self.facilities.get(facility_id)
    }

    pub fn equipment(&self, equipment_id: &str) -> Option<&Equipment> {
        self.equipment.get(equipment_id)
    }

    /// Facility snapshot with equipment ordered by id.
    pub fn snapshot(&self, facility_id: &str) -> Option<FacilitySnapshot> {
        let facility = self.facilities.get(facility_id)?.clone();
        let equipment = self
            .facility_equipment
            .get(facility_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.equipment.get(id).cloned())
            .collect();
        Some(FacilitySnapshot {
            facility,
            equipment,
        })
    }

    /// Snapshots of every facility in `organization_id`, ordered by id.
    pub fn organization_snapshot(&self, organization_id: &str) -> Vec<FacilitySnapshot> {
        self.facilities
            .values()
            .filter(|facility| facility.organization_id == organization_id)
            .filter_map(|facility| self.snapshot(&facility.id))
            .collect()
    }

    /// Number of facilities currently held.
    pub fn facility_count(&self) -> usize {
        self.facilities.len()
    }

    /// Number of equipment entries currently held.
    pub fn equipment_count(&self) -> usize {
        self.equipment.len()
    }

    /// `true` when the store contains no facilities.
    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }
}

#[async_trait]
impl FacilityDataProvider for RwLock<FacilityStore> {
    async fn facility_snapshot(&self, facility_id: &str) -> ProviderResult<Option<FacilitySnapshot>> {
        let snapshot = self.read().await.snapshot(facility_id);
        if let Some(snapshot) = &snapshot {
            check_ordering(snapshot)?;
        }
        Ok(snapshot)
    }

    async fn organization_snapshot(
        &self,
        organization_id: &str,
    ) -> ProviderResult<Vec<FacilitySnapshot>> {
        let snapshots = self.read().await.organization_snapshot(organization_id);
        for snapshot in &snapshots {
            check_ordering(snapshot)?;
        }
        Ok(snapshots)
    }

    fn provider_name(&self) -> &str {
        "memory"
    }
}

fn check_ordering(snapshot: &FacilitySnapshot) -> Result<(), ProviderError> {
    for equipment in &snapshot.equipment {
        let ordered = equipment
            .maintenance_records
            .windows(2)
            .all(|pair| pair[0].performed_at <= pair[1].performed_at);
        if !ordered {
            return Err(ProviderError::Inconsistent {
                message: format!(
                    "maintenance history of equipment '{}' is out of order",
                    equipment.id
                ),
            });
        }
    }
    Ok(())
}
