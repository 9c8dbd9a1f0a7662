//! Compliance scoring
//!
//! Pure functions that turn a facility snapshot into a [`FacilityMetric`]
//! and facility metrics into an [`OrganizationMetric`].

use std::collections::BTreeMap;

use crate::aggregation::{
    config::AggregationConfig,
    provider::FacilitySnapshot,
    types::*,
};
use crate::error::MasterBusError;

/// Outcome counts of one equipment's in-window, non-pending records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EquipmentTally {
    pub on_time: usize,
    pub overdue: usize,
    pub missed: usize,
}

impl EquipmentTally {
    /// Count outcomes of `records` falling inside `window`.
    ///
    /// `records` must be sorted by `performed_at`; the window bounds are
    /// located by binary search.
    pub fn from_records(records: &[MaintenanceRecord], window: &TimeWindow) -> Self {
        let lo = records.partition_point(|r| r.performed_at < window.start);
        let hi = records.partition_point(|r| r.performed_at <= window.end);

        let mut tally = Self::default();
        for record in records.get(lo..hi).unwrap_or_default() {
            match record.outcome {
                MaintenanceOutcome::OnTime => tally.on_time += 1,
                MaintenanceOutcome::Overdue => tally.overdue += 1,
                MaintenanceOutcome::Missed => tally.missed += 1,
                MaintenanceOutcome::Pending => {}
            }
        }
        tally
    }

    pub fn scored(&self) -> usize {
        self.on_time + self.overdue + self.missed
    }

    /// On-time share of scored records, `None` when nothing was scored.
    pub fn ratio(&self) -> Option<f64> {
        match self.scored() {
            0 => None,
            n => Some(self.on_time as f64 / n as f64),
        }
    }
}

#[derive(Default)]
struct TypeAccumulator {
    equipment_count: usize,
    scored_equipment: usize,
    tally: EquipmentTally,
    ratio_sum: f64,
}

/// Score one facility over `window`.
pub fn score_facility(
    snapshot: &FacilitySnapshot,
    window: &TimeWindow,
    config: &AggregationConfig,
) -> Result<FacilityMetric, MasterBusError> {
    let mut by_type: BTreeMap<EquipmentType, TypeAccumulator> = BTreeMap::new();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut scored_equipment = 0;
    let mut records_considered = 0;

    for equipment in &snapshot.equipment {
        let tally = EquipmentTally::from_records(&equipment.maintenance_records, window);
        let acc = by_type.entry(equipment.equipment_type).or_default();
        acc.equipment_count += 1;
        acc.tally.on_time += tally.on_time;
        acc.tally.overdue += tally.overdue;
        acc.tally.missed += tally.missed;
        records_considered += tally.scored();

        if let Some(ratio) = tally.ratio() {
            let weight = config.weights.weight(equipment.equipment_type);
            weighted_sum += weight * ratio;
            weight_total += weight;
            acc.scored_equipment += 1;
            acc.ratio_sum += ratio;
            scored_equipment += 1;
        }
    }

    let neutral = weight_total <= 0.0;
    let score = if neutral {
        config.neutral_score
    } else {
        weighted_sum / weight_total
    };
    let score = finite_score(score, &snapshot.facility.id)?;

    let breakdown = by_type
        .into_iter()
        .map(|(equipment_type, acc)| TypeBreakdown {
            equipment_type,
            weight: config.weights.weight(equipment_type),
            equipment_count: acc.equipment_count,
            scored_equipment: acc.scored_equipment,
            on_time: acc.tally.on_time,
            overdue: acc.tally.overdue,
            missed: acc.tally.missed,
            score: if acc.scored_equipment == 0 {
                config.neutral_score
            } else {
                acc.ratio_sum / acc.scored_equipment as f64
            },
        })
        .collect();

    Ok(FacilityMetric {
        facility_id: snapshot.facility.id.clone(),
        organization_id: snapshot.facility.organization_id.clone(),
        window: *window,
        score,
        neutral,
        equipment_count: snapshot.equipment.len(),
        scored_equipment,
        records_considered,
        breakdown,
    })
}

/// Roll facility metrics up to an organization, weighting each facility
/// by its scored equipment. Equipment without scorable records carries no
/// weight here either, so neutral facilities do not pull the score.
pub fn roll_up_organization(
    organization_id: &str,
    window: &TimeWindow,
    facilities: &[FacilityMetric],
    neutral_score: f64,
) -> Result<OrganizationMetric, MasterBusError> {
    let equipment_count: usize = facilities.iter().map(|f| f.equipment_count).sum();
    let scored_equipment: usize = facilities.iter().map(|f| f.scored_equipment).sum();

    let neutral = scored_equipment == 0;
    let score = if neutral {
        neutral_score
    } else {
        let weighted: f64 = facilities
            .iter()
            .filter(|f| !f.neutral)
            .map(|f| f.score * f.scored_equipment as f64)
            .sum();
        weighted / scored_equipment as f64
    };
    let score = finite_score(score, organization_id)?;

    Ok(OrganizationMetric {
        organization_id: organization_id.to_string(),
        window: *window,
        score,
        neutral,
        facility_count: facilities.len(),
        equipment_count,
        scored_equipment,
        facilities: facilities
            .iter()
            .map(|f| FacilityScore {
                facility_id: f.facility_id.clone(),
                score: f.score,
                neutral: f.neutral,
                equipment_count: f.equipment_count,
                scored_equipment: f.scored_equipment,
            })
            .collect(),
    })
}

fn finite_score(score: f64, subject: &str) -> Result<f64, MasterBusError> {
    if !score.is_finite() {
        return Err(MasterBusError::computation(format!(
            "non-finite score {} for '{}'",
            score, subject
        )));
    }
    Ok(score.clamp(0.0, 1.0))
}
