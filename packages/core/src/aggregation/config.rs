//! Configuration for facility aggregation

use std::collections::BTreeMap;

use chrono::Duration;

use crate::aggregation::types::EquipmentType;

/// Configuration for the facility aggregator
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Length of the trailing window used when a request names none.
    pub default_window: Duration,
    /// Score reported when nothing in the window can be scored.
    pub neutral_score: f64,
    pub weights: CriticalityWeights,
}

/// Relative criticality of each equipment type in the weighted average.
#[derive(Debug, Clone)]
pub struct CriticalityWeights {
    weights: BTreeMap<EquipmentType, f64>,
}

impl CriticalityWeights {
    /// Weight for `equipment_type`, `1.0` when not configured.
    pub fn weight(&self, equipment_type: EquipmentType) -> f64 {
        self.weights.get(&equipment_type).copied().unwrap_or(1.0)
    }

    /// Override one type's weight. Negative or non-finite values are ignored.
    pub fn with_weight(mut self, equipment_type: EquipmentType, weight: f64) -> Self {
        if weight.is_finite() && weight >= 0.0 {
            self.weights.insert(equipment_type, weight);
        }
        self
    }

    /// Same weight for every type.
    pub fn uniform(weight: f64) -> Self {
        let weights = EquipmentType::ALL.iter().map(|t| (*t, weight)).collect();
        Self { weights }
    }
}

impl Default for CriticalityWeights {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (EquipmentType::FireSafety, 3.0),
            (EquipmentType::Generator, 2.5),
            (EquipmentType::Transformer, 2.5),
            (EquipmentType::Electrical, 2.0),
            (EquipmentType::Elevator, 2.0),
            (EquipmentType::Hvac, 1.0),
            (EquipmentType::Plumbing, 1.0),
        ]);
        Self { weights }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            default_window: Duration::days(30),
            neutral_score: 1.0,
            weights: CriticalityWeights::default(),
        }
    }
}

impl AggregationConfig {
    pub fn with_default_window(mut self, default_window: Duration) -> Self {
        self.default_window = default_window;
        self
    }
}
