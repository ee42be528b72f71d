use crate::geo::{planar_distance_km, GeoPoint};
use crate::incident::IncidentType;
use crate::scoring::{ScoredCandidate, ScoringTables};
use crate::units::Unit;

pub fn distance_score(distance_km: f64) -> f64 {
    1.0 / (1.0 + distance_km)
}

/// Scores `unit` for an incident. Incompatible unit types score 0 but are
/// still returned so the caller can rank them last.
pub fn score_unit(
    tables: &ScoringTables,
    unit: &Unit,
    incident_location: GeoPoint,
    incident_type: &IncidentType,
    priority: i64,
) -> ScoredCandidate {
    let distance = planar_distance_km(unit.location, incident_location);
    let score = distance_score(distance)
        * tables.type_score(incident_type, unit.unit_type)
        * tables.priority_weight(priority);

    ScoredCandidate {
        unit_id: unit.id.clone(),
        call_sign: unit.call_sign.clone(),
        unit_type: unit.unit_type,
        distance,
        score,
    }
}
