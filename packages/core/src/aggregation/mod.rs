//! Facility Compliance Aggregation Module
//!
//! Turns facility, equipment and maintenance history into criticality
//! weighted compliance scores, and fronts the computation with a cache.

pub mod config;
pub mod engine;
pub mod provider;
pub mod scoring;
pub mod service;
pub mod types;


pub use config::{AggregationConfig, CriticalityWeights};
pub use engine::FacilityAggregator;
pub use provider::{FacilityDataProvider, FacilitySnapshot, ProviderError};
pub use service::{MetricsCacheStats, MetricsService};
pub use types::*;
