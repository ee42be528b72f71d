pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS units (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    call_sign TEXT NOT NULL UNIQUE,
    unit_type TEXT NOT NULL,
    status TEXT NOT NULL,
    longitude REAL NOT NULL,
    latitude REAL NOT NULL,
    capabilities_json TEXT NOT NULL DEFAULT '[]',
    current_incident INTEGER,
    last_updated TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_units_status
    ON units(status);

CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    incident_type TEXT NOT NULL,
    priority INTEGER NOT NULL,
    longitude REAL NOT NULL,
    latitude REAL NOT NULL,
    address TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS incident_units (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    incident_id INTEGER NOT NULL,
    unit_id TEXT NOT NULL,
    UNIQUE(incident_id, unit_id)
);

CREATE TABLE IF NOT EXISTS recommendations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    incident_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    candidates_json TEXT NOT NULL,
    accepted_unit_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_recommendations_incident_created
    ON recommendations(incident_id, created_at DESC);
"#;
