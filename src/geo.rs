use serde::{Deserialize, Serialize};

/// Kilometres per degree of latitude.
pub const KM_PER_DEGREE: f64 = 111.32;

/// A point serialized as `[longitude, latitude]` in degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.longitude.is_finite() && self.latitude.is_finite()
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(value: GeoPoint) -> Self {
        [value.longitude, value.latitude]
    }
}

/// Flat-earth distance in kilometres between `unit` and `incident`.
///
/// Longitude degrees are shrunk by the cosine of the incident's latitude. Good
/// enough inside one service area; not geodesic.
pub fn planar_distance_km(unit: GeoPoint, incident: GeoPoint) -> f64 {
    let lat_km = KM_PER_DEGREE * (unit.latitude - incident.latitude);
    let lon_km =
        KM_PER_DEGREE * incident.latitude.to_radians().cos() * (unit.longitude - incident.longitude);
    lat_km.hypot(lon_km)
}
