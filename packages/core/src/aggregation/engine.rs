//! Facility Aggregator - computes compliance metrics from the data model

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::aggregation::{
    config::AggregationConfig,
    provider::{FacilityDataProvider, ProviderError},
    scoring,
    types::*,
};
use crate::error::MasterBusError;

/// Stateless aggregator over a read-only facility data provider.
///
/// Concurrent calls are independent; deduplicating identical calls is the
/// cache manager's job.
#[derive(Clone)]
pub struct FacilityAggregator {
    provider: Arc<dyn FacilityDataProvider + Send + Sync>,
    config: AggregationConfig,
}

impl FacilityAggregator {
    pub fn new(
        provider: Arc<dyn FacilityDataProvider + Send + Sync>,
        config: AggregationConfig,
    ) -> Self {
        Self { provider, config }
    }

    /// Compliance score of one facility over `window`.
    ///
    /// Fails with `InvalidWindow` when `window.start > window.end` and with
    /// `FacilityNotFound` for an unknown facility.
    pub async fn aggregate(
        &self,
        facility_id: &str,
        window: TimeWindow,
    ) -> Result<FacilityMetric, MasterBusError> {
        window.validate()?;

        let snapshot = self
            .provider
            .facility_snapshot(facility_id)
            .await
            .map_err(|err| self.provider_failure(err))?
            .ok_or_else(|| MasterBusError::facility_not_found(facility_id))?;

        let metric = scoring::score_facility(&snapshot, &window, &self.config)?;

        tracing::debug!(
            facility_id,
            score = metric.score,
            equipment = metric.equipment_count,
            records = metric.records_considered,
            "Facility aggregated"
        );

        Ok(metric)
    }

    /// Equipment-count-weighted score across every facility of an
    /// organization.
    pub async fn aggregate_organization(
        &self,
        organization_id: &str,
        window: TimeWindow,
    ) -> Result<OrganizationMetric, MasterBusError> {
        window.validate()?;

        let snapshots = self
            .provider
            .organization_snapshot(organization_id)
            .await
            .map_err(|err| self.provider_failure(err))?;

        if snapshots.is_empty() {
            return Err(MasterBusError::organization_not_found(organization_id));
        }

        let facilities = snapshots
            .iter()
            .map(|snapshot| scoring::score_facility(snapshot, &window, &self.config))
            .collect::<Result<Vec<_>, _>>()?;

        let metric = scoring::roll_up_organization(
            organization_id,
            &window,
            &facilities,
            self.config.neutral_score,
        )?;

        tracing::debug!(
            organization_id,
            score = metric.score,
            facilities = metric.facility_count,
            "Organization aggregated"
        );

        Ok(metric)
    }

    /// The configured trailing window ending at `now`.
    pub fn default_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::trailing(self.config.default_window, now)
    }

    /// Get aggregator configuration
    pub fn get_config(&self) -> &AggregationConfig {
        &self.config
    }

    fn provider_failure(&self, err: ProviderError) -> MasterBusError {
        tracing::error!(
            provider = self.provider.provider_name(),
            "Facility data provider failed: {}",
            err
        );
        MasterBusError::computation(format!(
            "{} provider failed: {}",
            self.provider.provider_name(),
            err
        ))
    }
}
