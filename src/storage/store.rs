use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::geo::GeoPoint;
use crate::incidents::{WorkflowError, WorkflowResult};
use crate::recommendations::{
    BatchStatus, RecommendationBatch, RecommendationStore, StoredBatch,
};
use crate::storage::migrations::BASE_MIGRATION;
use crate::units::{NewUnit, Unit, UnitRepository, UnitStatus, UnitType};

const UNIT_COLUMNS: &str =
    "id, call_sign, unit_type, status, longitude, latitude, capabilities_json, current_incident";
const BATCH_COLUMNS: &str =
    "id, incident_id, status, created_at, candidates_json, accepted_unit_id";

/// SQLite-backed unit repository, recommendation store and incident log.
/// Clones share one connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed creating database directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed opening database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.lock()?.execute_batch(BASE_MIGRATION)?;
        Ok(())
    }

    pub(super) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection mutex poisoned"))
    }

    pub fn insert_unit(&self, unit: &NewUnit) -> Result<Unit> {
        let conn = self.lock()?;
        conn.execute(
            r#"
INSERT INTO units(call_sign, unit_type, status, longitude, latitude, capabilities_json, last_updated)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
            params![
                unit.call_sign,
                unit.unit_type.as_str(),
                unit.status.as_str(),
                unit.location.longitude,
                unit.location.latitude,
                serde_json::to_string(&unit.capabilities)?,
                timestamp_now()
            ],
        )
        .with_context(|| format!("failed inserting unit {}", unit.call_sign))?;
        Ok(Unit {
            id: conn.last_insert_rowid().to_string(),
            call_sign: unit.call_sign.clone(),
            unit_type: unit.unit_type,
            location: unit.location,
            status: unit.status,
            capabilities: unit.capabilities.clone(),
            current_incident: None,
        })
    }

    pub fn unit_by_id(&self, id: &str) -> Result<Option<Unit>> {
        let conn = self.lock()?;
        Ok(load_unit(&conn, id)?)
    }

    pub fn list_units(&self, status: Option<UnitStatus>) -> Result<Vec<Unit>> {
        let conn = self.lock()?;
        let units = if let Some(status) = status {
            let sql = format!("SELECT {UNIT_COLUMNS} FROM units WHERE status = ?1 ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![status.as_str()], row_to_unit)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        } else {
            let sql = format!("SELECT {UNIT_COLUMNS} FROM units ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], row_to_unit)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        Ok(units)
    }

    /// Sets a unit's status. Returning a unit to `AVAILABLE` releases it from
    /// its current incident.
    pub fn update_unit_status(&self, id: &str, status: UnitStatus) -> Result<Option<Unit>> {
        let Some(rowid) = parse_rowid(id) else {
            return Ok(None);
        };
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
UPDATE units
SET status = ?1,
    current_incident = CASE WHEN ?1 = 'AVAILABLE' THEN NULL ELSE current_incident END,
    last_updated = ?2
WHERE id = ?3
"#,
            params![status.as_str(), timestamp_now(), rowid],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(load_unit(&conn, id)?)
    }

    pub fn update_unit_location(&self, id: &str, location: GeoPoint) -> Result<Option<Unit>> {
        let Some(rowid) = parse_rowid(id) else {
            return Ok(None);
        };
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE units SET longitude = ?1, latitude = ?2, last_updated = ?3 WHERE id = ?4",
            params![location.longitude, location.latitude, timestamp_now(), rowid],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(load_unit(&conn, id)?)
    }

    pub fn clear_units(&self) -> Result<usize> {
        Ok(self.lock()?.execute("DELETE FROM units", [])?)
    }

    pub fn insert_recommendation_batch(&self, batch: &RecommendationBatch) -> Result<String> {
        let conn = self.lock()?;
        conn.execute(
            r#"
INSERT INTO recommendations(incident_id, status, created_at, candidates_json)
VALUES (?1, ?2, ?3, ?4)
"#,
            params![
                batch.incident_id,
                batch.status.as_str(),
                batch.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                serde_json::to_string(&batch.recommendations)?
            ],
        )?;
        Ok(conn.last_insert_rowid().to_string())
    }

    /// Batches stored for one incident, newest first.
    pub fn batches_for_incident(&self, incident_id: &str) -> Result<Vec<StoredBatch>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM recommendations WHERE incident_id = ?1 \
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![incident_id], row_to_stored_batch)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every stored batch, newest first.
    pub fn list_batches(&self) -> Result<Vec<StoredBatch>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM recommendations ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_stored_batch)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn batch_by_id(&self, id: &str) -> Result<Option<StoredBatch>> {
        let conn = self.lock()?;
        Ok(load_batch(&conn, id)?)
    }

    /// Marks a pending batch `REJECTED`.
    pub fn reject_recommendation(&self, id: &str) -> WorkflowResult<StoredBatch> {
        let conn = self.lock()?;
        let batch = load_batch(&conn, id)?
            .ok_or_else(|| WorkflowError::RecommendationNotFound(id.to_string()))?;
        ensure_pending(&batch)?;
        set_batch_status(&conn, &batch.id, BatchStatus::Rejected, None)?;
        load_batch(&conn, id)?.ok_or_else(|| WorkflowError::RecommendationNotFound(id.to_string()))
    }
}

#[async_trait]
impl UnitRepository for SqliteStore {
    async fn available_units(&self) -> Result<Vec<Unit>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list_units(Some(UnitStatus::Available)))
            .await
            .context("unit query task failed")?
    }
}

#[async_trait]
impl RecommendationStore for SqliteStore {
    async fn insert_batch(&self, batch: &RecommendationBatch) -> Result<String> {
        let store = self.clone();
        let batch = batch.clone();
        tokio::task::spawn_blocking(move || store.insert_recommendation_batch(&batch))
            .await
            .context("recommendation insert task failed")?
    }
}

pub(super) fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn parse_rowid(id: &str) -> Option<i64> {
    id.trim().parse::<i64>().ok()
}

pub(super) fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

pub(super) fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

pub(super) fn load_unit(conn: &Connection, id: &str) -> rusqlite::Result<Option<Unit>> {
    let Some(rowid) = parse_rowid(id) else {
        return Ok(None);
    };
    let sql = format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = ?1");
    conn.query_row(&sql, params![rowid], row_to_unit).optional()
}

pub(super) fn load_batch(conn: &Connection, id: &str) -> rusqlite::Result<Option<StoredBatch>> {
    let Some(rowid) = parse_rowid(id) else {
        return Ok(None);
    };
    let sql = format!("SELECT {BATCH_COLUMNS} FROM recommendations WHERE id = ?1");
    conn.query_row(&sql, params![rowid], row_to_stored_batch).optional()
}

pub(super) fn ensure_pending(batch: &StoredBatch) -> WorkflowResult<()> {
    if batch.is_pending() {
        Ok(())
    } else {
        Err(WorkflowError::BatchNotPending {
            id: batch.id.clone(),
            status: batch.batch.status,
        })
    }
}

pub(super) fn set_batch_status(
    conn: &Connection,
    id: &str,
    status: BatchStatus,
    accepted_unit_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE recommendations SET status = ?1, accepted_unit_id = ?2 WHERE id = ?3",
        params![status.as_str(), accepted_unit_id, parse_rowid(id)],
    )?;
    Ok(())
}

fn row_to_unit(row: &rusqlite::Row<'_>) -> rusqlite::Result<Unit> {
    let unit_type_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let capabilities_raw: String = row.get(6)?;
    let current_incident: Option<i64> = row.get(7)?;
    Ok(Unit {
        id: row.get::<_, i64>(0)?.to_string(),
        call_sign: row.get(1)?,
        unit_type: unit_type_raw.parse::<UnitType>().map_err(|e| conversion_error(2, e))?,
        status: status_raw.parse::<UnitStatus>().map_err(|e| conversion_error(3, e))?,
        location: GeoPoint::new(row.get(4)?, row.get(5)?),
        capabilities: serde_json::from_str(&capabilities_raw)
            .map_err(|e| conversion_error(6, e))?,
        current_incident: current_incident.map(|id| id.to_string()),
    })
}

fn row_to_stored_batch(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredBatch> {
    let status_raw: String = row.get(2)?;
    let created_raw: String = row.get(3)?;
    let candidates_raw: String = row.get(4)?;
    Ok(StoredBatch {
        id: row.get::<_, i64>(0)?.to_string(),
        batch: RecommendationBatch {
            incident_id: row.get(1)?,
            recommendations: serde_json::from_str(&candidates_raw)
                .map_err(|e| conversion_error(4, e))?,
            timestamp: parse_timestamp(3, &created_raw)?,
            status: status_raw
                .parse::<BatchStatus>()
                .map_err(|e| conversion_error(2, e))?,
        },
        accepted_unit_id: row.get(5)?,
    })
}
