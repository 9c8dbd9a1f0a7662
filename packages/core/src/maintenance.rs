//! Background cache maintenance.
//!
//! Expired entries are otherwise only dropped when read. This loop sweeps
//! them periodically and keeps the cache gauges current.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::aggregation::MetricsService;

/// Run the sweep loop until `shutdown` flips to `true` or its sender is
/// dropped.
pub async fn run_cache_maintenance(
    service: MetricsService,
    sweep_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = time::interval(sweep_interval);
    // The first tick completes immediately.
    interval.tick().await;

    tracing::info!(
        "Cache maintenance started (interval: {}s)",
        sweep_interval.as_secs()
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep_once(&service).await;
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Shutdown signal received. Stopping cache maintenance.");
                    break;
                }
            }
        }
    }

    tracing::info!("Cache maintenance stopped cleanly");
}

/// One sweep. Returns the number of expired entries removed.
async fn sweep_once(service: &MetricsService) -> usize {
    let removed = service.purge_expired().await;
    if removed > 0 {
        tracing::info!(removed, "Expired cache entries purged");
    } else {
        tracing::debug!("No expired cache entries");
    }
    removed
}
