//! Input validation for facility, equipment and maintenance payloads.
//!
//! Payloads arrive as loosely typed JSON from the API layer. Each validator
//! returns the typed record or the first problem found as a
//! `MasterBusError::Validation`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::aggregation::types::{
    Equipment, EquipmentType, Facility, MaintenanceOutcome, MaintenanceRecord,
};
use crate::error::MasterBusError;

/// Maximum length of any identifier.
pub const MAX_ID_LENGTH: usize = 64;

/// Maximum length of a display name.
pub const MAX_NAME_LENGTH: usize = 200;

type Fields = Map<String, Value>;

/// Identifiers are 1-64 characters of `[A-Za-z0-9_.-]`. `:` is excluded so
/// ids can be embedded in cache keys.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LENGTH
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Validate a facility payload: `id`, `name`, `organization_id`.
pub fn validate_facility_data(data: &Value) -> Result<Facility, MasterBusError> {
    let fields = as_object(data, "facility")?;

    Ok(Facility {
        id: required_id(fields, "id")?,
        name: required_name(fields, "name")?,
        organization_id: required_id(fields, "organization_id")?,
    })
}

/// Validate an equipment payload: `id`, `facility_id`, `equipment_type`,
/// optional `name` and optional `maintenance_records`.
pub fn validate_equipment_data(data: &Value) -> Result<Equipment, MasterBusError> {
    let fields = as_object(data, "equipment")?;

    let id = required_id(fields, "id")?;
    let facility_id = required_id(fields, "facility_id")?;
    let equipment_type = required_str(fields, "equipment_type")?
        .parse::<EquipmentType>()
        .map_err(|message| MasterBusError::validation("equipment_type", message))?;
    let name = match fields.get("name") {
        None | Some(Value::Null) => id.clone(),
        Some(_) => required_name(fields, "name")?,
    };

    let maintenance_records = match fields.get("maintenance_records") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| embedded_record(item, &id, i))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(MasterBusError::validation(
                "maintenance_records",
                "must be an array",
            ))
        }
    };

    Ok(Equipment {
        id,
        facility_id,
        name,
        equipment_type,
        maintenance_records,
    })
}

/// Validate a maintenance record payload: `id`, `equipment_id`,
/// `performed_at` (RFC 3339) and `outcome`.
pub fn validate_maintenance_record_data(data: &Value) -> Result<MaintenanceRecord, MasterBusError> {
    let fields = as_object(data, "maintenance_record")?;
    record_fields(fields, None, "")
}

fn embedded_record(
    item: &Value,
    equipment_id: &str,
    index: usize,
) -> Result<MaintenanceRecord, MasterBusError> {
    let path = format!("maintenance_records[{}].", index);
    let fields = item.as_object().ok_or_else(|| {
        MasterBusError::validation(path.trim_end_matches('.'), "must be an object")
    })?;
    record_fields(fields, Some(equipment_id), &path)
}

fn record_fields(
    fields: &Fields,
    owner: Option<&str>,
    path: &str,
) -> Result<MaintenanceRecord, MasterBusError> {
    let field = |name: &str| format!("{}{}", path, name);

    let id = required_id(fields, "id").map_err(|err| prefixed(err, path))?;

    let equipment_id = match (fields.get("equipment_id"), owner) {
        (None | Some(Value::Null), Some(owner)) => owner.to_string(),
        (_, owner) => {
            let equipment_id =
                required_id(fields, "equipment_id").map_err(|err| prefixed(err, path))?;
            if let Some(owner) = owner {
                if equipment_id != owner {
                    return Err(MasterBusError::validation(
                        field("equipment_id"),
                        format!("does not match equipment '{}'", owner),
                    ));
                }
            }
            equipment_id
        }
    };

    let performed_at = required_str(fields, "performed_at")
        .map_err(|err| prefixed(err, path))?;
    let performed_at = DateTime::parse_from_rfc3339(performed_at)
        .map_err(|err| {
            MasterBusError::validation(
                field("performed_at"),
                format!("must be an RFC 3339 timestamp ({})", err),
            )
        })?
        .with_timezone(&Utc);

    let outcome = required_str(fields, "outcome")
        .map_err(|err| prefixed(err, path))?
        .parse::<MaintenanceOutcome>()
        .map_err(|message| MasterBusError::validation(field("outcome"), message))?;

    Ok(MaintenanceRecord {
        id,
        equipment_id,
        performed_at,
        outcome,
    })
}

fn prefixed(err: MasterBusError, path: &str) -> MasterBusError {
    match err {
        MasterBusError::Validation { field, message } if !path.is_empty() => {
            MasterBusError::validation(format!("{}{}", path, field), message)
        }
        other => other,
    }
}

fn as_object<'a>(data: &'a Value, what: &str) -> Result<&'a Fields, MasterBusError> {
    data.as_object()
        .ok_or_else(|| MasterBusError::validation(what, "payload must be a JSON object"))
}

fn required_str<'a>(fields: &'a Fields, name: &str) -> Result<&'a str, MasterBusError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(MasterBusError::validation(name, "is required")),
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(_) => Err(MasterBusError::validation(name, "must be a string")),
    }
}

fn required_id(fields: &Fields, name: &str) -> Result<String, MasterBusError> {
    let value = required_str(fields, name)?;
    if !is_valid_id(value) {
        return Err(MasterBusError::validation(
            name,
            format!(
                "must be 1-{} characters of letters, digits, '_', '-' or '.'",
                MAX_ID_LENGTH
            ),
        ));
    }
    Ok(value.to_string())
}

fn required_name(fields: &Fields, name: &str) -> Result<String, MasterBusError> {
    let value = required_str(fields, name)?.trim();
    if value.is_empty() {
        return Err(MasterBusError::validation(name, "must not be blank"));
    }
    if value.chars().count() > MAX_NAME_LENGTH {
        return Err(MasterBusError::validation(
            name,
            format!("must be at most {} characters", MAX_NAME_LENGTH),
        ));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_of(err: MasterBusError) -> String {
        match err {
            MasterBusError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    // ---- identifiers ----

    #[test]
    fn id_rules() {
        assert!(is_valid_id("plant-7.north_A"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("has:colon"));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id(&"x".repeat(MAX_ID_LENGTH + 1)));
    }

    // ---- facilities ----

    #[test]
    fn valid_facility_is_accepted() {
        let facility = validate_facility_data(&json!({
            "id": "f1",
            "name": "  North Substation ",
            "organization_id": "acme"
        }))
        .unwrap();
        assert_eq!(facility.id, "f1");
        assert_eq!(facility.name, "North Substation");
        assert_eq!(facility.organization_id, "acme");
    }

    #[test]
    fn facility_must_be_an_object() {
        let err = validate_facility_data(&json!(["f1"])).unwrap_err();
        assert_eq!(field_of(err), "facility");
    }

    #[test]
    fn facility_missing_name_is_rejected() {
        let err = validate_facility_data(&json!({ "id": "f1", "organization_id": "acme" }))
            .unwrap_err();
        assert_eq!(err, MasterBusError::validation("name", "is required"));
    }

    #[test]
    fn facility_with_numeric_id_is_rejected() {
        let err = validate_facility_data(&json!({
            "id": 7,
            "name": "Plant",
            "organization_id": "acme"
        }))
        .unwrap_err();
        assert_eq!(err, MasterBusError::validation("id", "must be a string"));
    }

    #[test]
    fn facility_with_malformed_organization_is_rejected() {
        let err = validate_facility_data(&json!({
            "id": "f1",
            "name": "Plant",
            "organization_id": "acme:corp"
        }))
        .unwrap_err();
        assert_eq!(field_of(err), "organization_id");
    }

    #[test]
    fn blank_or_overlong_names_are_rejected() {
        let blank = validate_facility_data(&json!({
            "id": "f1", "name": "   ", "organization_id": "acme"
        }))
        .unwrap_err();
        assert_eq!(field_of(blank), "name");

        let long = validate_facility_data(&json!({
            "id": "f1", "name": "n".repeat(MAX_NAME_LENGTH + 1), "organization_id": "acme"
        }))
        .unwrap_err();
        assert_eq!(field_of(long), "name");
    }

    // ---- equipment ----

    #[test]
    fn valid_equipment_with_history_is_accepted() {
        let equipment = validate_equipment_data(&json!({
            "id": "e1",
            "facility_id": "f1",
            "equipment_type": "HVAC",
            "maintenance_records": [
                { "id": "r1", "performed_at": "2024-01-05T00:00:00Z", "outcome": "on_time" },
                { "id": "r2", "equipment_id": "e1", "performed_at": "2024-02-10T08:30:00+02:00", "outcome": "overdue" }
            ]
        }))
        .unwrap();

        assert_eq!(equipment.equipment_type, EquipmentType::Hvac);
        assert_eq!(equipment.name, "e1");
        assert_eq!(equipment.maintenance_records.len(), 2);
        assert_eq!(equipment.maintenance_records[0].equipment_id, "e1");
        assert_eq!(
            equipment.maintenance_records[1].performed_at,
            "2024-02-10T06:30:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn unknown_equipment_type_is_rejected() {
        let err = validate_equipment_data(&json!({
            "id": "e1", "facility_id": "f1", "equipment_type": "boiler"
        }))
        .unwrap_err();
        assert_eq!(field_of(err), "equipment_type");
    }

    #[test]
    fn equipment_without_facility_is_rejected() {
        let err = validate_equipment_data(&json!({ "id": "e1", "equipment_type": "generator" }))
            .unwrap_err();
        assert_eq!(err, MasterBusError::validation("facility_id", "is required"));
    }

    #[test]
    fn records_must_be_an_array() {
        let err = validate_equipment_data(&json!({
            "id": "e1", "facility_id": "f1", "equipment_type": "generator",
            "maintenance_records": {}
        }))
        .unwrap_err();
        assert_eq!(field_of(err), "maintenance_records");
    }

    #[test]
    fn embedded_record_errors_carry_their_index() {
        let err = validate_equipment_data(&json!({
            "id": "e1", "facility_id": "f1", "equipment_type": "generator",
            "maintenance_records": [
                { "id": "r1", "performed_at": "2024-01-05T00:00:00Z", "outcome": "on_time" },
                { "id": "r2", "performed_at": "yesterday", "outcome": "on_time" }
            ]
        }))
        .unwrap_err();
        assert_eq!(field_of(err), "maintenance_records[1].performed_at");
    }

    #[test]
    fn embedded_record_for_other_equipment_is_rejected() {
        let err = validate_equipment_data(&json!({
            "id": "e1", "facility_id": "f1", "equipment_type": "generator",
            "maintenance_records": [
                { "id": "r1", "equipment_id": "e2", "performed_at": "2024-01-05T00:00:00Z", "outcome": "on_time" }
            ]
        }))
        .unwrap_err();
        assert_eq!(field_of(err), "maintenance_records[0].equipment_id");
    }

    // ---- maintenance records ----

    #[test]
    fn standalone_record_requires_equipment_id() {
        let err = validate_maintenance_record_data(&json!({
            "id": "r1", "performed_at": "2024-01-05T00:00:00Z", "outcome": "missed"
        }))
        .unwrap_err();
        assert_eq!(err, MasterBusError::validation("equipment_id", "is required"));
    }

    #[test]
    fn unknown_outcome_is_rejected() {
        let err = validate_maintenance_record_data(&json!({
            "id": "r1", "equipment_id": "e1",
            "performed_at": "2024-01-05T00:00:00Z", "outcome": "skipped"
        }))
        .unwrap_err();
        assert_eq!(field_of(err), "outcome");
    }

    #[test]
    fn valid_standalone_record_is_accepted() {
        let record = validate_maintenance_record_data(&json!({
            "id": "r1", "equipment_id": "e1",
            "performed_at": "2024-01-05T00:00:00Z", "outcome": "Pending"
        }))
        .unwrap();
        assert_eq!(record.outcome, MaintenanceOutcome::Pending);
        assert_eq!(record.equipment_id, "e1");
    }
}
