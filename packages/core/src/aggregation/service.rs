//! Cached metrics service
//!
//! Fronts the [`FacilityAggregator`] with two [`CacheManager`]s, one for
//! facility metrics and one for organization roll-ups, and drops the
//! affected entries whenever the underlying records change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::aggregation::{engine::FacilityAggregator, types::*};
use crate::cache::{CacheManager, CacheSettings, CacheStats};
use crate::error::MasterBusError;
use crate::metrics::AppMetrics;

/// Cache key prefix covering every window of one facility.
pub fn facility_prefix(facility_id: &str) -> String {
    format!("facility:{}:", facility_id)
}

/// Cache key prefix covering every window of one organization.
pub fn organization_prefix(organization_id: &str) -> String {
    format!("organization:{}:", organization_id)
}

/// `facility:<id>:<start>:<end>` with RFC 3339 bounds.
pub fn facility_key(facility_id: &str, window: &TimeWindow) -> String {
    format!(
        "{}{}:{}",
        facility_prefix(facility_id),
        window.start.to_rfc3339(),
        window.end.to_rfc3339()
    )
}

/// `organization:<id>:<start>:<end>` with RFC 3339 bounds.
pub fn organization_key(organization_id: &str, window: &TimeWindow) -> String {
    format!(
        "{}{}:{}",
        organization_prefix(organization_id),
        window.start.to_rfc3339(),
        window.end.to_rfc3339()
    )
}

/// Combined statistics of both metric caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsCacheStats {
    pub facility: CacheStats,
    pub organization: CacheStats,
}

impl MetricsCacheStats {
    pub fn entries(&self) -> usize {
        self.facility.entries + self.organization.entries
    }

    pub fn evictions(&self) -> u64 {
        self.facility.evictions + self.organization.evictions
    }
}

/// Aggregator plus caches, shared across request handlers.
#[derive(Clone)]
pub struct MetricsService {
    aggregator: FacilityAggregator,
    facility_cache: CacheManager<FacilityMetric, MasterBusError>,
    organization_cache: CacheManager<OrganizationMetric, MasterBusError>,
    metrics: Option<Arc<AppMetrics>>,
}

impl MetricsService {
    pub fn new(aggregator: FacilityAggregator, settings: CacheSettings) -> Self {
        Self {
            aggregator,
            facility_cache: CacheManager::init(settings),
            organization_cache: CacheManager::init(settings),
            metrics: None,
        }
    }

    /// Record cache and aggregation activity in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Facility metric for `window`, or the default trailing window.
    pub async fn facility_metrics(
        &self,
        facility_id: &str,
        window: Option<TimeWindow>,
    ) -> Result<FacilityMetric, MasterBusError> {
        let window = self.resolve_window(window)?;
        let key = facility_key(facility_id, &window);

        let computed = AtomicBool::new(false);
        let (aggregator, flag) = (&self.aggregator, &computed);

        let result = self
            .facility_cache
            .get_or_compute(&key, move || async move {
                flag.store(true, Ordering::Relaxed);
                aggregator.aggregate(facility_id, window).await
            })
            .await;

        self.record_outcome(computed.into_inner(), &result);
        result
    }

    /// Organization roll-up for `window`, or the default trailing window.
    pub async fn organization_metrics(
        &self,
        organization_id: &str,
        window: Option<TimeWindow>,
    ) -> Result<OrganizationMetric, MasterBusError> {
        let window = self.resolve_window(window)?;
        let key = organization_key(organization_id, &window);

        let computed = AtomicBool::new(false);
        let (aggregator, flag) = (&self.aggregator, &computed);

        let result = self
            .organization_cache
            .get_or_compute(&key, move || async move {
                flag.store(true, Ordering::Relaxed);
                aggregator
                    .aggregate_organization(organization_id, window)
                    .await
            })
            .await;

        self.record_outcome(computed.into_inner(), &result);
        result
    }

    /// Drop every cached metric of a facility and of its organization.
    /// Returns the number of entries removed.
    pub async fn invalidate_facility(&self, facility_id: &str, organization_id: &str) -> usize {
        let facility = self
            .facility_cache
            .invalidate_prefix(&facility_prefix(facility_id))
            .await;
        let organization = self
            .organization_cache
            .invalidate_prefix(&organization_prefix(organization_id))
            .await;

        tracing::debug!(
            facility_id,
            organization_id,
            removed = facility + organization,
            "Metrics invalidated"
        );
        facility + organization
    }

    /// Drop one exact cache key from both caches.
    pub async fn invalidate_key(&self, key: &str) -> usize {
        let facility = self.facility_cache.invalidate(key).await;
        let organization = self.organization_cache.invalidate(key).await;
        usize::from(facility) + usize::from(organization)
    }

    /// Drop every key starting with `prefix` from both caches.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.facility_cache.invalidate_prefix(prefix).await
            + self.organization_cache.invalidate_prefix(prefix).await
    }

    /// Eagerly remove expired entries. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let removed = self.facility_cache.purge_expired().await
            + self.organization_cache.purge_expired().await;
        self.refresh_cache_gauges().await;
        removed
    }

    pub async fn cache_stats(&self) -> MetricsCacheStats {
        MetricsCacheStats {
            facility: self.facility_cache.stats().await,
            organization: self.organization_cache.stats().await,
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        self.facility_cache.settings()
    }

    pub fn aggregator(&self) -> &FacilityAggregator {
        &self.aggregator
    }

    /// Copy cache entry/eviction counts into the Prometheus gauges.
    pub async fn refresh_cache_gauges(&self) {
        if let Some(metrics) = &self.metrics {
            let stats = self.cache_stats().await;
            metrics.cache_entries.set(stats.entries() as f64);
            metrics.cache_evictions.set(stats.evictions() as f64);
        }
    }

    /// Stop caching and release every entry.
    pub async fn shutdown(&self) {
        self.facility_cache.shutdown().await;
        self.organization_cache.shutdown().await;
    }

    /// Rejected windows never reach the cache, so they are counted here.
    fn resolve_window(&self, window: Option<TimeWindow>) -> Result<TimeWindow, MasterBusError> {
        let window = window.unwrap_or_else(|| self.aggregator.default_window(Utc::now()));
        if let Err(err) = window.validate() {
            self.record_error(&err);
            return Err(err);
        }
        Ok(window)
    }

    fn record_outcome<T>(&self, computed: bool, result: &Result<T, MasterBusError>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        if computed {
            metrics.cache_misses_total.inc();
            metrics.aggregations_total.inc();
        } else if result.is_ok() {
            metrics.cache_hits_total.inc();
        }
        if let Err(err) = result {
            self.record_error(err);
        }
    }

    fn record_error(&self, err: &MasterBusError) {
        if let Some(metrics) = &self.metrics {
            metrics
                .aggregation_errors_total
                .with_label_values(&[err.kind().as_str()])
                .inc();
        }
    }
}
