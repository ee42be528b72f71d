use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::GeoPoint;
use crate::incident::{IncidentRequest, IncidentType};
use crate::recommendations::BatchStatus;
use crate::units::{Unit, UnitStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    #[default]
    Pending,
    Dispatched,
    EnRoute,
    OnScene,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Dispatched => "DISPATCHED",
            Self::EnRoute => "EN_ROUTE",
            Self::OnScene => "ON_SCENE",
            Self::Resolved => "RESOLVED",
        }
    }
}

impl Display for IncidentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown incident status: {0}")]
pub struct ParseIncidentStatusError(pub String);

impl FromStr for IncidentStatus {
    type Err = ParseIncidentStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "PENDING" => Ok(Self::Pending),
            "DISPATCHED" => Ok(Self::Dispatched),
            "EN_ROUTE" => Ok(Self::EnRoute),
            "ON_SCENE" => Ok(Self::OnScene),
            "RESOLVED" => Ok(Self::Resolved),
            _ => Err(ParseIncidentStatusError(s.to_string())),
        }
    }
}

/// A reported incident as tracked by dispatchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub priority: i64,
    pub location: GeoPoint,
    pub address: String,
    pub description: String,
    pub status: IncidentStatus,
    /// Units committed to this incident, in dispatch order.
    pub dispatched_units: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// The ranking request for this incident. Units already dispatched are
    /// excluded and the shortlist is stored under the incident's id.
    pub fn recommendation_request(&self) -> IncidentRequest {
        IncidentRequest::new(self.incident_type.clone(), self.priority, self.location)
            .with_assigned(self.dispatched_units.iter().cloned())
            .with_incident_id(self.id.as_str())
    }

    pub fn has_unit(&self, unit_id: &str) -> bool {
        self.dispatched_units.iter().any(|id| id == unit_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIncident {
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub priority: i64,
    pub location: GeoPoint,
    #[serde(default)]
    pub address: String,
    pub description: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum InvalidIncident {
    #[error("unsupported incident type: {0}")]
    UnsupportedType(String),
    #[error("priority must be between 1 and 5, got {0}")]
    PriorityOutOfRange(i64),
    #[error("location must be two finite numbers")]
    NonFiniteLocation,
    #[error("description is required")]
    MissingDescription,
}

impl NewIncident {
    pub fn new(
        incident_type: impl Into<IncidentType>,
        priority: i64,
        location: GeoPoint,
        address: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            incident_type: incident_type.into(),
            priority,
            location,
            address: address.into(),
            description: description.into(),
        }
    }

    /// Registered incidents are stricter than `/predict` input: the type must
    /// be a known category and the priority inside 1..=5.
    pub fn validate(&self) -> std::result::Result<(), InvalidIncident> {
        if let IncidentType::Unrecognized(raw) = &self.incident_type {
            return Err(InvalidIncident::UnsupportedType(raw.clone()));
        }
        if !(1..=5).contains(&self.priority) {
            return Err(InvalidIncident::PriorityOutOfRange(self.priority));
        }
        if !self.location.is_finite() {
            return Err(InvalidIncident::NonFiniteLocation);
        }
        if self.description.trim().is_empty() {
            return Err(InvalidIncident::MissingDescription);
        }
        Ok(())
    }
}

/// Result of committing a unit to an incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub incident: Incident,
    pub unit: Unit,
}

/// Failures of the dispatcher workflow: assigning units and resolving
/// recommendation batches.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("incident not found: {0}")]
    IncidentNotFound(String),
    #[error("unit not found: {0}")]
    UnitNotFound(String),
    #[error("recommendation not found: {0}")]
    RecommendationNotFound(String),
    #[error("unit {unit_id} already assigned to incident {incident_id}")]
    AlreadyAssigned { unit_id: String, incident_id: String },
    #[error("unit {unit_id} is not available, current status: {status}")]
    UnitUnavailable { unit_id: String, status: UnitStatus },
    #[error("unit {0} is not assigned to any incident")]
    NotAssigned(String),
    #[error("recommendation {id} is already {status}")]
    BatchNotPending { id: String, status: BatchStatus },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

/// Sample incidents loaded by `seed` alongside the demo fleet.
pub fn demo_incidents() -> Vec<NewIncident> {
    vec![
        NewIncident::new(
            "MEDICAL",
            5,
            GeoPoint::new(-122.420679, 37.772537),
            "500 Market St, San Francisco, CA",
            "Heart attack emergency",
        ),
        NewIncident::new(
            "FIRE",
            4,
            GeoPoint::new(-122.435097, 37.764853),
            "123 Main St, San Francisco, CA",
            "Building fire reported",
        ),
        NewIncident::new(
            "POLICE",
            3,
            GeoPoint::new(-122.447478, 37.758788),
            "456 Elm St, San Francisco, CA",
            "Armed robbery in progress",
        ),
        NewIncident::new(
            "MEDICAL",
            2,
            GeoPoint::new(-122.405097, 37.784853),
            "789 Oak St, San Francisco, CA",
            "Fall victim with possible fracture",
        ),
        NewIncident::new(
            "FIRE",
            4,
            GeoPoint::new(-122.415097, 37.774853),
            "321 Pine St, San Francisco, CA",
            "Gas leak reported",
        ),
    ]
}
