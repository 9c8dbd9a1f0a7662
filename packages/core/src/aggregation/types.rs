//! Core data types for facility compliance aggregation

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MasterBusError;

/// A physical site that owns equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub id: String,
    pub name: String,
    pub organization_id: String,
}

/// A tracked asset belonging to exactly one facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: String,
    pub facility_id: String,
    pub name: String,
    pub equipment_type: EquipmentType,
    /// Ordered by `performed_at`, oldest first.
    #[serde(default)]
    pub maintenance_records: Vec<MaintenanceRecord>,
}

/// Closed set of equipment categories. Declaration order is the order
/// used in metric breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentType {
    Hvac,
    Electrical,
    Generator,
    Transformer,
    FireSafety,
    Elevator,
    Plumbing,
}

impl EquipmentType {
    pub const ALL: [EquipmentType; 7] = [
        EquipmentType::Hvac,
        EquipmentType::Electrical,
        EquipmentType::Generator,
        EquipmentType::Transformer,
        EquipmentType::FireSafety,
        EquipmentType::Elevator,
        EquipmentType::Plumbing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentType::Hvac => "hvac",
            EquipmentType::Electrical => "electrical",
            EquipmentType::Generator => "generator",
            EquipmentType::Transformer => "transformer",
            EquipmentType::FireSafety => "fire_safety",
            EquipmentType::Elevator => "elevator",
            EquipmentType::Plumbing => "plumbing",
        }
    }
}

impl fmt::Display for EquipmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EquipmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        EquipmentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown equipment type '{}'", s))
    }
}

/// A single timestamped maintenance event for one piece of equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub id: String,
    pub equipment_id: String,
    pub performed_at: DateTime<Utc>,
    pub outcome: MaintenanceOutcome,
}

/// How a maintenance event resolved relative to its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOutcome {
    /// Completed within its scheduled slot.
    OnTime,
    /// Completed after its due date.
    Overdue,
    /// Never performed.
    Missed,
    /// Scheduled but not yet due; excluded from scoring.
    Pending,
}

impl MaintenanceOutcome {
    pub const ALL: [MaintenanceOutcome; 4] = [
        MaintenanceOutcome::OnTime,
        MaintenanceOutcome::Overdue,
        MaintenanceOutcome::Missed,
        MaintenanceOutcome::Pending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceOutcome::OnTime => "on_time",
            MaintenanceOutcome::Overdue => "overdue",
            MaintenanceOutcome::Missed => "missed",
            MaintenanceOutcome::Pending => "pending",
        }
    }
}

impl fmt::Display for MaintenanceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaintenanceOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        MaintenanceOutcome::ALL
            .iter()
            .copied()
            .find(|o| o.as_str() == normalized)
            .ok_or_else(|| format!("unknown maintenance outcome '{}'", s))
    }
}

/// Inclusive `[start, end]` computation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, rejecting `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, MasterBusError> {
        let window = Self { start, end };
        window.validate()?;
        Ok(window)
    }

    /// Window of `length` ending at `now`, truncated to whole seconds so
    /// requests issued within the same second share a cache key.
    pub fn trailing(length: Duration, now: DateTime<Utc>) -> Self {
        let end = now.duration_trunc(Duration::seconds(1)).unwrap_or(now);
        Self {
            start: end - length,
            end,
        }
    }

    pub fn validate(&self) -> Result<(), MasterBusError> {
        if self.start > self.end {
            return Err(MasterBusError::InvalidWindow {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// Per-equipment-type slice of a facility metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeBreakdown {
    pub equipment_type: EquipmentType,
    pub weight: f64,
    pub equipment_count: usize,
    pub scored_equipment: usize,
    pub on_time: usize,
    pub overdue: usize,
    pub missed: usize,
    /// Mean ratio of the scored equipment of this type, neutral if none.
    pub score: f64,
}

/// Compliance score of one facility over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityMetric {
    pub facility_id: String,
    pub organization_id: String,
    pub window: TimeWindow,
    /// In `[0.0, 1.0]`.
    pub score: f64,
    /// `true` when no equipment had scorable records in the window.
    pub neutral: bool,
    pub equipment_count: usize,
    pub scored_equipment: usize,
    pub records_considered: usize,
    pub breakdown: Vec<TypeBreakdown>,
}

/// One facility's contribution to an organization roll-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityScore {
    pub facility_id: String,
    pub score: f64,
    pub neutral: bool,
    pub equipment_count: usize,
    pub scored_equipment: usize,
}

/// Roll-up across an organization's facilities, weighted by scored
/// equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationMetric {
    pub organization_id: String,
    pub window: TimeWindow,
    pub score: f64,
    /// `true` when no equipment in any facility had scorable records.
    pub neutral: bool,
    pub facility_count: usize,
    pub equipment_count: usize,
    pub scored_equipment: usize,
    pub facilities: Vec<FacilityScore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn equipment_type_parses_case_insensitively() {
        assert_eq!("HVAC".parse::<EquipmentType>(), Ok(EquipmentType::Hvac));
        assert_eq!(
            " fire_safety ".parse::<EquipmentType>(),
            Ok(EquipmentType::FireSafety)
        );
        assert!("boiler".parse::<EquipmentType>().is_err());
    }

    #[test]
    fn equipment_type_serializes_as_snake_case() {
        let json = serde_json::to_string(&EquipmentType::FireSafety).unwrap();
        assert_eq!(json, "\"fire_safety\"");
    }

    #[test]
    fn outcome_round_trips_through_display() {
        for outcome in MaintenanceOutcome::ALL {
            assert_eq!(outcome.to_string().parse::<MaintenanceOutcome>(), Ok(outcome));
        }
    }

    #[test]
    fn window_rejects_start_after_end() {
        let err = TimeWindow::new(ts("2024-06-01T00:00:00Z"), ts("2024-01-01T00:00:00Z"))
            .unwrap_err();
        assert!(matches!(err, MasterBusError::InvalidWindow { .. }));
    }

    #[test]
    fn window_allows_zero_length() {
        let t = ts("2024-01-01T00:00:00Z");
        let window = TimeWindow::new(t, t).unwrap();
        assert!(window.contains(t));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let window =
            TimeWindow::new(ts("2024-01-01T00:00:00Z"), ts("2024-03-01T00:00:00Z")).unwrap();
        assert!(window.contains(ts("2024-01-01T00:00:00Z")));
        assert!(window.contains(ts("2024-03-01T00:00:00Z")));
        assert!(!window.contains(ts("2024-03-01T00:00:01Z")));
        assert!(!window.contains(ts("2023-12-31T23:59:59Z")));
    }

    #[test]
    fn trailing_window_truncates_to_seconds() {
        let now = ts("2024-05-01T12:00:00.750Z");
        let window = TimeWindow::trailing(Duration::days(30), now);
        assert_eq!(window.end, ts("2024-05-01T12:00:00Z"));
        assert_eq!(window.start, ts("2024-04-01T12:00:00Z"));
    }
}
