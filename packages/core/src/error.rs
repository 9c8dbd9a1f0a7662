use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Domain errors surfaced by validation, the aggregator and the cache.
///
/// Every variant maps to a machine-readable [`ErrorKind`]; the API layer
/// decides how each kind is presented.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MasterBusError {
    #[error("Validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("Facility not found: {facility_id}")]
    FacilityNotFound { facility_id: String },

    #[error("Equipment not found: {equipment_id}")]
    EquipmentNotFound { equipment_id: String },

    #[error("Organization not found: {organization_id}")]
    OrganizationNotFound { organization_id: String },

    #[error("Invalid time window: start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Computation error: {message}")]
    Computation { message: String },
}

/// Machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    FacilityNotFound,
    EquipmentNotFound,
    OrganizationNotFound,
    InvalidWindow,
    ComputationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::FacilityNotFound => "facility_not_found",
            ErrorKind::EquipmentNotFound => "equipment_not_found",
            ErrorKind::OrganizationNotFound => "organization_not_found",
            ErrorKind::InvalidWindow => "invalid_window",
            ErrorKind::ComputationError => "computation_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MasterBusError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn facility_not_found(facility_id: impl Into<String>) -> Self {
        Self::FacilityNotFound {
            facility_id: facility_id.into(),
        }
    }

    pub fn equipment_not_found(equipment_id: impl Into<String>) -> Self {
        Self::EquipmentNotFound {
            equipment_id: equipment_id.into(),
        }
    }

    pub fn organization_not_found(organization_id: impl Into<String>) -> Self {
        Self::OrganizationNotFound {
            organization_id: organization_id.into(),
        }
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::FacilityNotFound { .. } => ErrorKind::FacilityNotFound,
            Self::EquipmentNotFound { .. } => ErrorKind::EquipmentNotFound,
            Self::OrganizationNotFound { .. } => ErrorKind::OrganizationNotFound,
            Self::InvalidWindow { .. } => ErrorKind::InvalidWindow,
            Self::Computation { .. } => ErrorKind::ComputationError,
        }
    }

    /// `false` only for internal failures; every other kind can be fixed
    /// by the caller changing its input.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Computation { .. })
    }
}

/// Unified start-up error.
///
/// Covers the process-level failures (config, database, listener, metrics
/// registry) that happen before any request is served.
#[derive(Debug)]
pub enum AppError {
    Config(String),
    Database(String),
    Server(String),
    Metrics(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Config error: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::Server(msg) => write!(f, "Server error: {}", msg),
            AppError::Metrics(msg) => write!(f, "Metrics error: {}", msg),
        }
    }
}

impl Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        AppError::Metrics(err.to_string())
    }
}
