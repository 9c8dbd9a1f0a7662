//! Prometheus metrics registry for the MasterBus metrics service.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the metrics service and the HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry,
};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Aggregations actually computed (cache misses that ran the aggregator).
    pub aggregations_total: Counter,
    /// Failed metric requests, labelled by error kind.
    pub aggregation_errors_total: CounterVec,
    /// Metric requests answered from the cache.
    pub cache_hits_total: Counter,
    /// Metric requests that had to compute.
    pub cache_misses_total: Counter,
    /// Entries currently held across the metric caches.
    pub cache_entries: Gauge,
    /// LRU evictions since start-up across the metric caches.
    pub cache_evictions: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let aggregations_total = Counter::with_opts(Opts::new(
            "masterbus_aggregations_total",
            "Facility and organization aggregations computed",
        ))?;

        let aggregation_errors_total = CounterVec::new(
            Opts::new(
                "masterbus_aggregation_errors_total",
                "Failed metric requests by error kind",
            ),
            &["kind"],
        )?;

        let cache_hits_total = Counter::with_opts(Opts::new(
            "masterbus_cache_hits_total",
            "Metric requests served from cache",
        ))?;

        let cache_misses_total = Counter::with_opts(Opts::new(
            "masterbus_cache_misses_total",
            "Metric requests that ran the aggregator",
        ))?;

        let cache_entries = Gauge::with_opts(Opts::new(
            "masterbus_cache_entries",
            "Entries currently cached",
        ))?;

        let cache_evictions = Gauge::with_opts(Opts::new(
            "masterbus_cache_evictions",
            "LRU evictions since start-up",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "masterbus_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "masterbus_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(aggregations_total.clone()))?;
        registry.register(Box::new(aggregation_errors_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(cache_evictions.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            aggregations_total,
            aggregation_errors_total,
            cache_hits_total,
            cache_misses_total,
            cache_entries,
            cache_evictions,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_register_without_error() {
        let metrics = AppMetrics::new();
        assert!(metrics.is_ok(), "AppMetrics::new() failed: {:?}", metrics.err());
    }

    #[test]
    fn render_contains_counter_after_increment() {
        let metrics = AppMetrics::new().unwrap();
        metrics.aggregations_total.inc_by(3.0);
        let output = metrics.render().unwrap();
        assert!(output.contains("masterbus_aggregations_total 3"));
    }

    #[test]
    fn error_counter_is_labelled_by_kind() {
        let metrics = AppMetrics::new().unwrap();
        metrics
            .aggregation_errors_total
            .with_label_values(&["facility_not_found"])
            .inc();
        let output = metrics.render().unwrap();
        assert!(output.contains("kind=\"facility_not_found\""));
    }

    #[test]
    fn gauges_set_and_get() {
        let metrics = AppMetrics::new().unwrap();
        metrics.cache_entries.set(12.0);
        metrics.cache_evictions.set(4.0);
        assert!((metrics.cache_entries.get() - 12.0).abs() < f64::EPSILON);
        assert!((metrics.cache_evictions.get() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn http_requests_counter_vec_labels_work() {
        let metrics = AppMetrics::new().unwrap();
        metrics
            .http_requests_total
            .with_label_values(&["GET", "/facilities/:id/metrics", "200"])
            .inc();
        let val = metrics
            .http_requests_total
            .with_label_values(&["GET", "/facilities/:id/metrics", "200"])
            .get();
        assert!((val - 1.0).abs() < f64::EPSILON);
    }
}
