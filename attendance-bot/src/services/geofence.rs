//! Geofence evaluator
//!
//! Pure great-circle math; callers validate coordinate ranges first
//! (see [`GeoPoint::new`]).

use attendance_common::db::Geofence;

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Validated WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// None unless both values are finite and inside [-90, 90] / [-180, 180]
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }
}

/// Great-circle distance in meters (haversine)
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` marginally outside [0, 1] for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Boundary inclusive: a point exactly `radius_m` away is inside
pub fn within_fence(point: GeoPoint, center: GeoPoint, radius_m: f64) -> bool {
    distance_meters(point.lat, point.lon, center.lat, center.lon) <= radius_m
}

/// Result of checking a reported location against a lecture's geofence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Containment {
    /// Lecture has no geofence
    Unfenced,
    Inside { distance_m: f64 },
    Outside { distance_m: f64 },
    /// Geofence configured but no location reported
    NoLocation,
}

impl Containment {
    /// Evaluate a (possibly absent) location against a (possibly absent) fence
    pub fn evaluate(fence: Option<&Geofence>, point: Option<GeoPoint>) -> Self {
        let Some(fence) = fence else {
            return Containment::Unfenced;
        };
        let Some(point) = point else {
            return Containment::NoLocation;
        };

        let distance_m = distance_meters(point.lat, point.lon, fence.lat, fence.lon);
        if distance_m <= fence.radius_m {
            Containment::Inside { distance_m }
        } else {
            Containment::Outside { distance_m }
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, Containment::Unfenced | Containment::Inside { .. })
    }

    pub fn distance_m(&self) -> Option<f64> {
        match self {
            Containment::Inside { distance_m } | Containment::Outside { distance_m } => Some(*distance_m),
            Containment::Unfenced | Containment::NoLocation => None,
        }
    }
}
