//! Database repository for facility data persistence.
//!
//! All SQLite read/write logic lives here. The intake handlers call the
//! `upsert_*` methods before updating the in-memory store, and on startup
//! [`FacilityRepository::load_into`] rehydrates the [`FacilityStore`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::aggregation::types::{
    Equipment, EquipmentType, Facility, MaintenanceOutcome, MaintenanceRecord,
};
use crate::store::FacilityStore;

/// Counts of rows loaded into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub facilities: usize,
    pub equipment: usize,
    pub maintenance_records: usize,
    /// Rows that could not be decoded or referenced a missing parent.
    pub skipped: usize,
}

/// Repository for reading and writing facility data to SQLite.
pub struct FacilityRepository {
    pool: SqlitePool,
}

impl FacilityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a facility.
    pub async fn upsert_facility(&self, facility: &Facility) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO facilities (id, name, organization_id)
             VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                organization_id = excluded.organization_id,
                updated_at = datetime('now')",
        )
        .bind(&facility.id)
        .bind(&facility.name)
        .bind(&facility.organization_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or update a piece of equipment together with its embedded
    /// maintenance records, in a single transaction.
    pub async fn upsert_equipment(&self, equipment: &Equipment) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO equipment (id, facility_id, name, equipment_type)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                facility_id = excluded.facility_id,
                name = excluded.name,
                equipment_type = excluded.equipment_type,
                updated_at = datetime('now')",
        )
        .bind(&equipment.id)
        .bind(&equipment.facility_id)
        .bind(&equipment.name)
        .bind(equipment.equipment_type.as_str())
        .execute(&mut *tx)
        .await?;

        for record in &equipment.maintenance_records {
            upsert_record(&mut tx, record).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Insert or update one maintenance record.
    pub async fn upsert_maintenance_record(
        &self,
        record: &MaintenanceRecord,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        upsert_record(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Load every persisted row into `store`. Rows that fail to decode or
    /// reference a missing parent are skipped and counted.
    pub async fn load_into(&self, store: &mut FacilityStore) -> Result<LoadSummary, sqlx::Error> {
        let mut summary = LoadSummary::default();

        let rows = sqlx::query(
            "SELECT id, name, organization_id FROM facilities ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            match decode_facility(&row) {
                Some(facility) => {
                    store.upsert_facility(facility);
                    summary.facilities += 1;
                }
                None => summary.skipped += 1,
            }
        }

        let mut records: HashMap<String, Vec<MaintenanceRecord>> = HashMap::new();
        let rows = sqlx::query(
            "SELECT id, equipment_id, performed_at, outcome
             FROM maintenance_records
             ORDER BY equipment_id ASC, performed_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            match decode_record(&row) {
                Some(record) => records
                    .entry(record.equipment_id.clone())
                    .or_default()
                    .push(record),
                None => summary.skipped += 1,
            }
        }

        let rows = sqlx::query(
            "SELECT id, facility_id, name, equipment_type FROM equipment ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let Some(mut equipment) = decode_equipment(&row) else {
                summary.skipped += 1;
                continue;
            };
            equipment.maintenance_records = records.remove(&equipment.id).unwrap_or_default();
            let record_count = equipment.maintenance_records.len();

            match store.upsert_equipment(equipment) {
                Ok(()) => {
                    summary.equipment += 1;
                    summary.maintenance_records += record_count;
                }
                Err(err) => {
                    tracing::warn!("Skipping persisted equipment: {}", err);
                    summary.skipped += 1 + record_count;
                }
            }
        }

        // Records whose equipment row is gone.
        summary.skipped += records.values().map(Vec::len).sum::<usize>();

        Ok(summary)
    }
}

async fn upsert_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    record: &MaintenanceRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO maintenance_records (id, equipment_id, performed_at, outcome)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (equipment_id, id) DO UPDATE SET
            performed_at = excluded.performed_at,
            outcome = excluded.outcome",
    )
    .bind(&record.id)
    .bind(&record.equipment_id)
    .bind(record.performed_at.to_rfc3339())
    .bind(record.outcome.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn decode_facility(row: &sqlx::sqlite::SqliteRow) -> Option<Facility> {
    Some(Facility {
        id: row.try_get("id").ok()?,
        name: row.try_get("name").ok()?,
        organization_id: row.try_get("organization_id").ok()?,
    })
}

fn decode_equipment(row: &sqlx::sqlite::SqliteRow) -> Option<Equipment> {
    let equipment_type: String = row.try_get("equipment_type").ok()?;
    Some(Equipment {
        id: row.try_get("id").ok()?,
        facility_id: row.try_get("facility_id").ok()?,
        name: row.try_get("name").ok()?,
        equipment_type: equipment_type.parse::<EquipmentType>().ok()?,
        maintenance_records: Vec::new(),
    })
}

fn decode_record(row: &sqlx::sqlite::SqliteRow) -> Option<MaintenanceRecord> {
    let performed_at: String = row.try_get("performed_at").ok()?;
    let outcome: String = row.try_get("outcome").ok()?;
    Some(MaintenanceRecord {
        id: row.try_get("id").ok()?,
        equipment_id: row.try_get("equipment_id").ok()?,
        performed_at: DateTime::parse_from_rfc3339(&performed_at)
            .ok()?
            .with_timezone(&Utc),
        outcome: outcome.parse::<MaintenanceOutcome>().ok()?,
    })
}
