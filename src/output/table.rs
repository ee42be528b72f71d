use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::incidents::{Incident, IncidentStatus};
use crate::recommendations::StoredBatch;
use crate::scoring::ScoredCandidate;
use crate::units::{NearbyUnit, Unit, UnitStatus};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

pub fn render_candidates_table(candidates: &[ScoredCandidate]) -> String {
    let mut table = new_table(vec!["Rank", "Unit ID", "Call Sign", "Type", "Distance (km)", "Score"]);
    for (rank, candidate) in candidates.iter().enumerate() {
        let score_cell = if candidate.score > 0.0 {
            Cell::new(format!("{:.4}", candidate.score)).fg(Color::Green)
        } else {
            Cell::new(format!("{:.4}", candidate.score)).fg(Color::DarkGrey)
        };
        table.add_row(Row::from(vec![
            Cell::new(rank + 1),
            Cell::new(&candidate.unit_id),
            Cell::new(&candidate.call_sign),
            Cell::new(candidate.unit_type.as_str()),
            Cell::new(format!("{:.2}", candidate.distance)),
            score_cell,
        ]));
    }
    table.to_string()
}

pub fn render_units_table(units: &[Unit]) -> String {
    let mut table = new_table(vec!["ID", "Call Sign", "Type", "Status", "Longitude", "Latitude"]);
    for unit in units {
        let status_cell = match unit.status {
            UnitStatus::Available => Cell::new(unit.status.as_str()).fg(Color::Green),
            UnitStatus::OutOfService => Cell::new(unit.status.as_str()).fg(Color::Red),
            _ => Cell::new(unit.status.as_str()).fg(Color::Yellow),
        };
        table.add_row(Row::from(vec![
            Cell::new(&unit.id),
            Cell::new(&unit.call_sign),
            Cell::new(unit.unit_type.as_str()),
            status_cell,
            Cell::new(format!("{:.6}", unit.location.longitude)),
            Cell::new(format!("{:.6}", unit.location.latitude)),
        ]));
    }
    table.to_string()
}

pub fn render_nearby_table(units: &[NearbyUnit]) -> String {
    let mut table = new_table(vec!["ID", "Call Sign", "Type", "Distance (km)", "Capabilities"]);
    for nearby in units {
        let capabilities = nearby
            .unit
            .capabilities
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(Row::from(vec![
            Cell::new(&nearby.unit.id),
            Cell::new(&nearby.unit.call_sign),
            Cell::new(nearby.unit.unit_type.as_str()),
            Cell::new(format!("{:.2}", nearby.distance_km)),
            Cell::new(if capabilities.is_empty() { "-".to_string() } else { capabilities }),
        ]));
    }
    table.to_string()
}

pub fn render_incidents_table(incidents: &[Incident]) -> String {
    let mut table = new_table(vec!["ID", "Type", "Priority", "Status", "Description", "Units"]);
    for incident in incidents {
        let status_cell = match incident.status {
            IncidentStatus::Pending => Cell::new(incident.status.as_str()).fg(Color::Red),
            IncidentStatus::Resolved => Cell::new(incident.status.as_str()).fg(Color::DarkGrey),
            _ => Cell::new(incident.status.as_str()).fg(Color::Yellow),
        };
        let units = incident.dispatched_units.join(", ");
        table.add_row(Row::from(vec![
            Cell::new(&incident.id),
            Cell::new(incident.incident_type.as_str()),
            Cell::new(incident.priority),
            status_cell,
            Cell::new(&incident.description),
            Cell::new(if units.is_empty() { "-".to_string() } else { units }),
        ]));
    }
    table.to_string()
}

pub fn render_batches_table(batches: &[StoredBatch]) -> String {
    let mut table = new_table(vec!["Batch", "Incident", "Status", "Accepted", "Created", "Call Signs"]);
    for stored in batches {
        let call_signs = stored
            .batch
            .recommendations
            .iter()
            .map(|c| c.call_sign.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(Row::from(vec![
            Cell::new(&stored.id),
            Cell::new(&stored.batch.incident_id),
            Cell::new(stored.batch.status.as_str()),
            Cell::new(stored.accepted_unit_id.as_deref().unwrap_or("-")),
            Cell::new(stored.batch.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(if call_signs.is_empty() { "-".to_string() } else { call_signs }),
        ]));
    }
    table.to_string()
}
