use anyhow::Result;

use crate::incidents::Incident;
use crate::recommendations::StoredBatch;
use crate::scoring::ScoredCandidate;
use crate::units::{NearbyUnit, Unit};

pub fn candidates_to_csv(candidates: &[ScoredCandidate]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["rank", "unit_id", "call_sign", "type", "distance_km", "score"])?;
    for (rank, candidate) in candidates.iter().enumerate() {
        writer.write_record([
            (rank + 1).to_string(),
            candidate.unit_id.clone(),
            candidate.call_sign.clone(),
            candidate.unit_type.to_string(),
            format!("{:.4}", candidate.distance),
            format!("{:.6}", candidate.score),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn units_to_csv(units: &[Unit]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["id", "call_sign", "type", "status", "longitude", "latitude"])?;
    for unit in units {
        writer.write_record([
            unit.id.clone(),
            unit.call_sign.clone(),
            unit.unit_type.to_string(),
            unit.status.to_string(),
            unit.location.longitude.to_string(),
            unit.location.latitude.to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn nearby_units_to_csv(units: &[NearbyUnit]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["id", "call_sign", "type", "distance_km", "capabilities"])?;
    for nearby in units {
        writer.write_record([
            nearby.unit.id.clone(),
            nearby.unit.call_sign.clone(),
            nearby.unit.unit_type.to_string(),
            format!("{:.4}", nearby.distance_km),
            join_labels(nearby.unit.capabilities.iter()),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn incidents_to_csv(incidents: &[Incident]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "id",
        "type",
        "priority",
        "status",
        "longitude",
        "latitude",
        "description",
        "dispatched_units",
    ])?;
    for incident in incidents {
        writer.write_record([
            incident.id.clone(),
            incident.incident_type.to_string(),
            incident.priority.to_string(),
            incident.status.to_string(),
            incident.location.longitude.to_string(),
            incident.location.latitude.to_string(),
            incident.description.clone(),
            join_labels(incident.dispatched_units.iter()),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

/// One row per stored batch; candidates are listed by call sign in rank order.
pub fn batches_to_csv(batches: &[StoredBatch]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "id",
        "incident_id",
        "status",
        "created_at",
        "accepted_unit_id",
        "call_signs",
    ])?;
    for stored in batches {
        writer.write_record([
            stored.id.clone(),
            stored.batch.incident_id.clone(),
            stored.batch.status.to_string(),
            stored.batch.timestamp.to_rfc3339(),
            stored.accepted_unit_id.clone().unwrap_or_default(),
            join_labels(stored.batch.recommendations.iter().map(|c| &c.call_sign)),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

fn join_labels<T: ToString>(items: impl Iterator<Item = T>) -> String {
    items.map(|item| item.to_string()).collect::<Vec<_>>().join(";")
}
