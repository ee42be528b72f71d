use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Incident category. Strings outside the known set are kept verbatim so they
/// can be scored (they match no unit type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IncidentType {
    Medical,
    Fire,
    Police,
    Other,
    Unrecognized(String),
}

impl IncidentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Medical => "MEDICAL",
            Self::Fire => "FIRE",
            Self::Police => "POLICE",
            Self::Other => "OTHER",
            Self::Unrecognized(raw) => raw.as_str(),
        }
    }
}

impl From<String> for IncidentType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "MEDICAL" => Self::Medical,
            "FIRE" => Self::Fire,
            "POLICE" => Self::Police,
            "OTHER" => Self::Other,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<&str> for IncidentType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<IncidentType> for String {
    fn from(value: IncidentType) -> Self {
        match value {
            IncidentType::Unrecognized(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for IncidentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dispatch decision request, as posted to `/predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRequest {
    #[serde(alias = "incident_type")]
    pub incident_type: IncidentType,
    pub priority: i64,
    pub location: GeoPoint,
    #[serde(
        default,
        rename = "currentlyAssignedUnits",
        alias = "currently_assigned_units",
        alias = "assigned_units"
    )]
    pub assigned_units: BTreeSet<String>,
    #[serde(default, alias = "incident_id", skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
}

impl IncidentRequest {
    pub fn new(incident_type: impl Into<IncidentType>, priority: i64, location: GeoPoint) -> Self {
        Self {
            incident_type: incident_type.into(),
            priority,
            location,
            assigned_units: BTreeSet::new(),
            incident_id: None,
        }
    }

    pub fn with_assigned<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assigned_units.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_incident_id(mut self, id: impl Into<String>) -> Self {
        self.incident_id = Some(id.into());
        self
    }

    /// The incident id to persist under, if one was supplied. Blank ids count
    /// as absent.
    pub fn persistence_id(&self) -> Option<&str> {
        self.incident_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn is_assigned(&self, unit_id: &str) -> bool {
        self.assigned_units.contains(unit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{IncidentRequest, IncidentType};
    use crate::geo::GeoPoint;

    #[test]
    fn parses_camel_case_body_from_backend() {
        let body = r#"{
            "incidentType": "FIRE",
            "priority": 4,
            "location": [-122.435097, 37.764853],
            "currentlyAssignedUnits": ["u1", "u2"],
            "incidentId": "inc-9"
        }"#;
        let request: IncidentRequest = serde_json::from_str(body).expect("valid body");
        assert_eq!(request.incident_type, IncidentType::Fire);
        assert_eq!(request.priority, 4);
        assert_eq!(request.location, GeoPoint::new(-122.435097, 37.764853));
        assert!(request.is_assigned("u2"));
        assert_eq!(request.persistence_id(), Some("inc-9"));
    }

    #[test]
    fn optional_fields_default_to_empty() {
        let body = r#"{"incident_type": "MEDICAL", "priority": 9, "location": [0.0, 0.0]}"#;
        let request: IncidentRequest = serde_json::from_str(body).expect("valid body");
        assert!(request.assigned_units.is_empty());
        assert_eq!(request.persistence_id(), None);
    }

    #[test]
    fn unknown_incident_type_is_kept_verbatim() {
        let parsed: IncidentType = serde_json::from_str("\"HAZMAT\"").expect("string");
        assert_eq!(parsed, IncidentType::Unrecognized("HAZMAT".to_string()));
        assert_eq!(serde_json::to_string(&parsed).expect("ser"), "\"HAZMAT\"");
    }

    #[test]
    fn blank_incident_id_does_not_count() {
        let request = IncidentRequest::new("OTHER", 3, GeoPoint::new(0.0, 0.0))
            .with_incident_id("   ");
        assert_eq!(request.persistence_id(), None);
    }

    #[test]
    fn rejects_malformed_location() {
        let body = r#"{"incidentType": "FIRE", "priority": 1, "location": ["a", "b"]}"#;
        assert!(serde_json::from_str::<IncidentRequest>(body).is_err());
    }
}
