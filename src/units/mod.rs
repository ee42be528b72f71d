pub mod memory;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{planar_distance_km, GeoPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitType {
    Ambulance,
    FireEngine,
    PoliceCar,
    Other,
}

impl UnitType {
    pub const ALL: [UnitType; 4] = [
        UnitType::Ambulance,
        UnitType::FireEngine,
        UnitType::PoliceCar,
        UnitType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ambulance => "AMBULANCE",
            Self::FireEngine => "FIRE_ENGINE",
            Self::PoliceCar => "POLICE_CAR",
            Self::Other => "OTHER",
        }
    }
}

impl Display for UnitType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown unit type: {0}")]
pub struct ParseUnitTypeError(pub String);

impl FromStr for UnitType {
    type Err = ParseUnitTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "AMBULANCE" => Ok(Self::Ambulance),
            "FIRE_ENGINE" | "FIRE" => Ok(Self::FireEngine),
            "POLICE_CAR" | "POLICE" => Ok(Self::PoliceCar),
            "OTHER" => Ok(Self::Other),
            _ => Err(ParseUnitTypeError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    #[default]
    Available,
    Dispatched,
    EnRoute,
    OnScene,
    Returning,
    OutOfService,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Dispatched => "DISPATCHED",
            Self::EnRoute => "EN_ROUTE",
            Self::OnScene => "ON_SCENE",
            Self::Returning => "RETURNING",
            Self::OutOfService => "OUT_OF_SERVICE",
        }
    }
}

impl Display for UnitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown unit status: {0}")]
pub struct ParseUnitStatusError(pub String);

impl FromStr for UnitStatus {
    type Err = ParseUnitStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "AVAILABLE" => Ok(Self::Available),
            "DISPATCHED" => Ok(Self::Dispatched),
            "EN_ROUTE" => Ok(Self::EnRoute),
            "ON_SCENE" => Ok(Self::OnScene),
            "RETURNING" => Ok(Self::Returning),
            "OUT_OF_SERVICE" => Ok(Self::OutOfService),
            _ => Err(ParseUnitStatusError(s.to_string())),
        }
    }
}

/// Specialist equipment or crew skills carried by a unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    #[serde(rename = "ALS")]
    Als,
    #[serde(rename = "BLS")]
    Bls,
    #[serde(rename = "HAZMAT")]
    Hazmat,
    #[serde(rename = "RESCUE")]
    Rescue,
    #[serde(rename = "K9")]
    K9,
    #[serde(rename = "TACTICAL")]
    Tactical,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Als => "ALS",
            Self::Bls => "BLS",
            Self::Hazmat => "HAZMAT",
            Self::Rescue => "RESCUE",
            Self::K9 => "K9",
            Self::Tactical => "TACTICAL",
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown capability: {0}")]
pub struct ParseCapabilityError(pub String);

impl FromStr for Capability {
    type Err = ParseCapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALS" => Ok(Self::Als),
            "BLS" => Ok(Self::Bls),
            "HAZMAT" => Ok(Self::Hazmat),
            "RESCUE" => Ok(Self::Rescue),
            "K9" => Ok(Self::K9),
            "TACTICAL" => Ok(Self::Tactical),
            _ => Err(ParseCapabilityError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    pub call_sign: String,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub location: GeoPoint,
    #[serde(default)]
    pub status: UnitStatus,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Incident the unit is committed to, if any.
    #[serde(default)]
    pub current_incident: Option<String>,
}

impl Unit {
    pub fn new(
        id: impl Into<String>,
        call_sign: impl Into<String>,
        unit_type: UnitType,
        location: GeoPoint,
    ) -> Self {
        Self {
            id: id.into(),
            call_sign: call_sign.into(),
            unit_type,
            location,
            status: UnitStatus::Available,
            capabilities: Vec::new(),
            current_incident: None,
        }
    }

    pub fn with_status(mut self, status: UnitStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_available(&self) -> bool {
        self.status == UnitStatus::Available
    }
}

/// A unit registration before the store assigns it an id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewUnit {
    pub call_sign: String,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub location: GeoPoint,
    #[serde(default)]
    pub status: UnitStatus,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl NewUnit {
    pub fn available(call_sign: impl Into<String>, unit_type: UnitType, location: GeoPoint) -> Self {
        Self {
            call_sign: call_sign.into(),
            unit_type,
            location,
            status: UnitStatus::Available,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }
}

/// An available unit together with its distance from a query point.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NearbyUnit {
    #[serde(flatten)]
    pub unit: Unit,
    pub distance_km: f64,
}

/// Available units within `max_distance_km` of `point`, closest first, at
/// most `limit` of them. Units at equal distance keep their input order.
pub fn nearest_available(
    units: &[Unit],
    point: GeoPoint,
    max_distance_km: f64,
    limit: usize,
) -> Vec<NearbyUnit> {
    let mut nearby = units
        .iter()
        .filter(|unit| unit.is_available())
        .map(|unit| NearbyUnit {
            unit: unit.clone(),
            distance_km: planar_distance_km(unit.location, point),
        })
        .filter(|candidate| candidate.distance_km <= max_distance_km)
        .collect::<Vec<_>>();
    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    nearby.truncate(limit);
    nearby
}

/// Demo fleet loaded by `seed`, matching the San Francisco sample data.
pub fn demo_fleet() -> Vec<NewUnit> {
    vec![
        NewUnit::available("A101", UnitType::Ambulance, GeoPoint::new(-122.4194, 37.7749))
            .with_capabilities([Capability::Als, Capability::Bls]),
        NewUnit::available("F202", UnitType::FireEngine, GeoPoint::new(-122.431297, 37.773972))
            .with_capabilities([Capability::Hazmat, Capability::Rescue]),
        NewUnit::available("P303", UnitType::PoliceCar, GeoPoint::new(-122.446747, 37.765136))
            .with_capabilities([Capability::K9]),
        NewUnit::available("A102", UnitType::Ambulance, GeoPoint::new(-122.410679, 37.782537))
            .with_capabilities([Capability::Als]),
        NewUnit::available("F203", UnitType::FireEngine, GeoPoint::new(-122.425097, 37.774853))
            .with_capabilities([Capability::Rescue]),
    ]
}

/// Source of the dispatchable unit pool.
#[async_trait]
pub trait UnitRepository: Send + Sync {
    /// Every unit whose status is `AVAILABLE`, in the repository's natural order.
    async fn available_units(&self) -> Result<Vec<Unit>>;
}
