use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::geo::GeoPoint;
use crate::incident::IncidentType;
use crate::incidents::{
    Assignment, Incident, IncidentStatus, NewIncident, WorkflowError, WorkflowResult,
};
use crate::recommendations::BatchStatus;
use crate::storage::store::{
    conversion_error, ensure_pending, load_batch, load_unit, parse_rowid, parse_timestamp,
    set_batch_status, timestamp_now, SqliteStore,
};
use crate::units::{Unit, UnitStatus};

const INCIDENT_COLUMNS: &str = "id, incident_type, priority, longitude, latitude, address, \
     description, status, created_at, updated_at";

impl SqliteStore {
    pub fn insert_incident(&self, incident: &NewIncident) -> Result<Incident> {
        let conn = self.lock()?;
        let now = timestamp_now();
        conn.execute(
            r#"
INSERT INTO incidents(incident_type, priority, longitude, latitude, address, description,
                      status, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
"#,
            params![
                incident.incident_type.as_str(),
                incident.priority,
                incident.location.longitude,
                incident.location.latitude,
                incident.address,
                incident.description,
                IncidentStatus::Pending.as_str(),
                now
            ],
        )
        .context("failed inserting incident")?;
        let id = conn.last_insert_rowid().to_string();
        load_incident(&conn, &id)?.with_context(|| format!("incident {id} vanished after insert"))
    }

    pub fn incident_by_id(&self, id: &str) -> Result<Option<Incident>> {
        let conn = self.lock()?;
        Ok(load_incident(&conn, id)?)
    }

    pub fn list_incidents(&self) -> Result<Vec<Incident>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM incidents ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut incidents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(incident) = load_incident(&conn, &id.to_string())? {
                incidents.push(incident);
            }
        }
        Ok(incidents)
    }

    pub fn update_incident_status(
        &self,
        id: &str,
        status: IncidentStatus,
    ) -> Result<Option<Incident>> {
        let Some(rowid) = parse_rowid(id) else {
            return Ok(None);
        };
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE incidents SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), timestamp_now(), rowid],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(load_incident(&conn, id)?)
    }

    /// Removes every incident and its unit links.
    pub fn clear_incidents(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM incident_units", [])?;
        let removed = tx.execute("DELETE FROM incidents", [])?;
        tx.execute("UPDATE units SET current_incident = NULL", [])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Dispatcher override: commits `unit_id` to the incident whatever its
    /// current status and, when given, marks the recommendation it came from
    /// `ACCEPTED`.
    pub fn dispatch_unit(
        &self,
        incident_id: &str,
        unit_id: &str,
        recommendation_id: Option<&str>,
    ) -> WorkflowResult<Assignment> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let incident = require_incident(&tx, incident_id)?;
        let unit = require_unit(&tx, unit_id)?;
        if incident.has_unit(&unit.id) {
            return Err(WorkflowError::AlreadyAssigned {
                unit_id: unit.id,
                incident_id: incident.id,
            });
        }
        if let Some(recommendation_id) = recommendation_id {
            let batch = load_batch(&tx, recommendation_id)?.ok_or_else(|| {
                WorkflowError::RecommendationNotFound(recommendation_id.to_string())
            })?;
            ensure_pending(&batch)?;
            set_batch_status(&tx, &batch.id, BatchStatus::Accepted, Some(&unit.id))?;
        }
        attach_unit(&tx, &incident, &unit.id)?;
        commit_unit(&tx, &unit.id, UnitStatus::Dispatched, &incident.id)?;
        let assignment = reload_assignment(&tx, &incident.id, &unit.id)?;
        tx.commit()?;
        Ok(assignment)
    }

    /// Sends an available unit to an incident; the unit goes `EN_ROUTE`.
    pub fn assign_unit(&self, unit_id: &str, incident_id: &str) -> WorkflowResult<Assignment> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let unit = require_unit(&tx, unit_id)?;
        let incident = require_incident(&tx, incident_id)?;
        ensure_available(&unit)?;
        commit_unit(&tx, &unit.id, UnitStatus::EnRoute, &incident.id)?;
        if !incident.has_unit(&unit.id) {
            attach_unit(&tx, &incident, &unit.id)?;
        }
        let assignment = reload_assignment(&tx, &incident.id, &unit.id)?;
        tx.commit()?;
        Ok(assignment)
    }

    /// Accepts a pending recommendation by dispatching `unit_id` to the
    /// batch's incident. The unit must be available.
    pub fn accept_recommendation(
        &self,
        recommendation_id: &str,
        unit_id: &str,
    ) -> WorkflowResult<Assignment> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let batch = load_batch(&tx, recommendation_id)?
            .ok_or_else(|| WorkflowError::RecommendationNotFound(recommendation_id.to_string()))?;
        ensure_pending(&batch)?;
        let unit = require_unit(&tx, unit_id)?;
        ensure_available(&unit)?;
        let incident = require_incident(&tx, &batch.batch.incident_id)?;

        set_batch_status(&tx, &batch.id, BatchStatus::Accepted, Some(&unit.id))?;
        if !incident.has_unit(&unit.id) {
            attach_unit(&tx, &incident, &unit.id)?;
        }
        commit_unit(&tx, &unit.id, UnitStatus::Dispatched, &incident.id)?;
        let assignment = reload_assignment(&tx, &incident.id, &unit.id)?;
        tx.commit()?;
        Ok(assignment)
    }

    /// Moves a committed unit to `EN_ROUTE`.
    pub fn mark_en_route(&self, unit_id: &str) -> WorkflowResult<Unit> {
        let conn = self.lock()?;
        let unit = require_unit(&conn, unit_id)?;
        if unit.current_incident.is_none() {
            return Err(WorkflowError::NotAssigned(unit.id));
        }
        conn.execute(
            "UPDATE units SET status = ?1, last_updated = ?2 WHERE id = ?3",
            params![UnitStatus::EnRoute.as_str(), timestamp_now(), parse_rowid(&unit.id)],
        )?;
        require_unit(&conn, unit_id)
    }
}

fn require_incident(conn: &Connection, id: &str) -> WorkflowResult<Incident> {
    load_incident(conn, id)?.ok_or_else(|| WorkflowError::IncidentNotFound(id.to_string()))
}

fn require_unit(conn: &Connection, id: &str) -> WorkflowResult<Unit> {
    load_unit(conn, id)?.ok_or_else(|| WorkflowError::UnitNotFound(id.to_string()))
}

fn ensure_available(unit: &Unit) -> WorkflowResult<()> {
    if unit.is_available() {
        Ok(())
    } else {
        Err(WorkflowError::UnitUnavailable {
            unit_id: unit.id.clone(),
            status: unit.status,
        })
    }
}

/// Links the unit to the incident; a `PENDING` incident becomes `DISPATCHED`.
fn attach_unit(conn: &Connection, incident: &Incident, unit_id: &str) -> rusqlite::Result<()> {
    let incident_rowid = parse_rowid(&incident.id);
    conn.execute(
        "INSERT OR IGNORE INTO incident_units(incident_id, unit_id) VALUES (?1, ?2)",
        params![incident_rowid, unit_id],
    )?;
    let status = match incident.status {
        IncidentStatus::Pending => IncidentStatus::Dispatched,
        other => other,
    };
    conn.execute(
        "UPDATE incidents SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), timestamp_now(), incident_rowid],
    )?;
    Ok(())
}

fn commit_unit(
    conn: &Connection,
    unit_id: &str,
    status: UnitStatus,
    incident_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE units SET status = ?1, current_incident = ?2, last_updated = ?3 WHERE id = ?4",
        params![
            status.as_str(),
            parse_rowid(incident_id),
            timestamp_now(),
            parse_rowid(unit_id)
        ],
    )?;
    Ok(())
}

fn reload_assignment(
    conn: &Connection,
    incident_id: &str,
    unit_id: &str,
) -> WorkflowResult<Assignment> {
    Ok(Assignment {
        incident: require_incident(conn, incident_id)?,
        unit: require_unit(conn, unit_id)?,
    })
}

fn load_incident(conn: &Connection, id: &str) -> rusqlite::Result<Option<Incident>> {
    let Some(rowid) = parse_rowid(id) else {
        return Ok(None);
    };
    let sql = format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1");
    let Some(mut incident) = conn.query_row(&sql, params![rowid], row_to_incident).optional()?
    else {
        return Ok(None);
    };
    let mut stmt =
        conn.prepare("SELECT unit_id FROM incident_units WHERE incident_id = ?1 ORDER BY id")?;
    incident.dispatched_units = stmt
        .query_map(params![rowid], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(incident))
}

fn row_to_incident(row: &rusqlite::Row<'_>) -> rusqlite::Result<Incident> {
    let incident_type: String = row.get(1)?;
    let status_raw: String = row.get(7)?;
    let created_raw: String = row.get(8)?;
    let updated_raw: String = row.get(9)?;
    Ok(Incident {
        id: row.get::<_, i64>(0)?.to_string(),
        incident_type: IncidentType::from(incident_type),
        priority: row.get(2)?,
        location: GeoPoint::new(row.get(3)?, row.get(4)?),
        address: row.get(5)?,
        description: row.get(6)?,
        status: status_raw
            .parse::<IncidentStatus>()
            .map_err(|e| conversion_error(7, e))?,
        dispatched_units: Vec::new(),
        created_at: parse_timestamp(8, &created_raw)?,
        updated_at: parse_timestamp(9, &updated_raw)?,
    })
}
