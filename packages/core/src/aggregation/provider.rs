//! Facility Data Provider Interface
//!
//! Read-only query surface the aggregator uses to reach the primary data
//! model, so it never depends on how facilities are stored.

use async_trait::async_trait;
use thiserror::Error;

use crate::aggregation::types::{Equipment, Facility};

/// A consistent view of one facility and everything it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilitySnapshot {
    pub facility: Facility,
    /// Ordered by equipment id.
    pub equipment: Vec<Equipment>,
}

/// Errors from facility data providers
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Data source unavailable: {message}")]
    Unavailable { message: String },

    #[error("Inconsistent data: {message}")]
    Inconsistent { message: String },
}

/// Trait for facility data sources
#[async_trait]
pub trait FacilityDataProvider {
    /// Snapshot of one facility, `None` if the id is unknown.
    async fn facility_snapshot(
        &self,
        facility_id: &str,
    ) -> Result<Option<FacilitySnapshot>, ProviderError>;

    /// Snapshots of every facility in an organization, ordered by facility
    /// id and taken together. Empty when the organization is unknown.
    async fn organization_snapshot(
        &self,
        organization_id: &str,
    ) -> Result<Vec<FacilitySnapshot>, ProviderError>;

    /// Get the name of this provider for logging/debugging
    fn provider_name(&self) -> &str;
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;
