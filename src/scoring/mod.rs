pub mod model;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::incident::IncidentType;
use crate::units::UnitType;

pub const DEFAULT_PRIORITY_WEIGHTS: [f64; 5] = [0.25, 0.5, 0.75, 0.9, 1.0];
pub const FALLBACK_PRIORITY_WEIGHT: f64 = 0.5;

/// Lookup tables for the scoring model. Built once at startup and shared
/// read-only between requests.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringTables {
    priority_weights: [f64; 5],
    fallback_priority_weight: f64,
    compatibility: BTreeMap<IncidentType, Vec<UnitType>>,
}

impl ScoringTables {
    /// `priority_weights[i]` is the weight of priority `i + 1`.
    pub fn new(priority_weights: [f64; 5], fallback_priority_weight: f64) -> Self {
        Self {
            priority_weights,
            fallback_priority_weight,
            compatibility: default_compatibility(),
        }
    }

    pub fn priority_weight(&self, priority: i64) -> f64 {
        match priority {
            1..=5 => self.priority_weights[(priority - 1) as usize],
            _ => self.fallback_priority_weight,
        }
    }

    /// Unit types eligible for `incident`. Types missing from the table,
    /// including unrecognized ones, have none.
    pub fn compatible_unit_types(&self, incident: &IncidentType) -> &[UnitType] {
        self.compatibility
            .get(incident)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn type_score(&self, incident: &IncidentType, unit: UnitType) -> f64 {
        if self.compatible_unit_types(incident).contains(&unit) {
            1.0
        } else {
            0.0
        }
    }
}

fn default_compatibility() -> BTreeMap<IncidentType, Vec<UnitType>> {
    BTreeMap::from([
        (IncidentType::Medical, vec![UnitType::Ambulance]),
        (IncidentType::Fire, vec![UnitType::FireEngine]),
        (IncidentType::Police, vec![UnitType::PoliceCar]),
        (IncidentType::Other, UnitType::ALL.to_vec()),
    ])
}

impl Default for ScoringTables {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY_WEIGHTS, FALLBACK_PRIORITY_WEIGHT)
    }
}

/// One ranked unit as returned by `/predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub unit_id: String,
    pub call_sign: String,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub distance: f64,
    pub score: f64,
}
