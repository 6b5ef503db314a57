//! Great-circle distance on a spherical Earth.

use serde::{Deserialize, Serialize};

use crate::types::GeofenceConfig;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Haversine distance between two coordinates, in metres.
///
/// Symmetric in its arguments and zero only for identical coordinates.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    if a == b {
        return 0.0;
    }

    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    // abs() keeps the result bit-identical when the arguments are swapped.
    let d_phi = (b.lat - a.lat).abs().to_radians();
    let d_lambda = (b.lng - a.lng).abs().to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for near-antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Result of placing a position against the office geofence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceDecision {
    pub distance_m: f64,
    pub within: bool,
}

impl GeofenceConfig {
    /// Measure `position` against the fence. The boundary itself is inside.
    pub fn evaluate(&self, position: Coordinate) -> GeofenceDecision {
        let distance_m = distance_meters(position, self.center());
        GeofenceDecision {
            distance_m,
            within: distance_m <= self.max_distance_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Metres per degree of latitude on the sphere used here.
    const M_PER_DEG: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = Coordinate::new(-6.2, 106.816666);
        assert_eq!(distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_distance_symmetric() {
        let pairs = [
            (Coordinate::new(0.0, 0.0), Coordinate::new(0.001, 0.0)),
            (Coordinate::new(-6.2, 106.816666), Coordinate::new(-6.2005, 106.8167)),
            (Coordinate::new(51.5, -0.12), Coordinate::new(40.71, -74.0)),
            (Coordinate::new(89.9, 10.0), Coordinate::new(-89.9, -170.0)),
        ];
        for (a, b) in pairs {
            assert_eq!(distance_meters(a, b), distance_meters(b, a));
            assert!(distance_meters(a, b) > 0.0);
        }
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        assert!((d - M_PER_DEG).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn test_distance_office_scenario() {
        // Registered office vs. reported device position, roughly 56 m apart.
        let office = Coordinate::new(-6.200000, 106.816666);
        let device = Coordinate::new(-6.200500, 106.816700);
        let d = distance_meters(office, device);
        assert!((55.0..57.0).contains(&d), "got {d}");
    }

    #[test]
    fn test_distance_antipodal_is_half_circumference() {
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!((d - EARTH_RADIUS_M * std::f64::consts::PI).abs() < 1e-3);
    }

    #[test]
    fn test_geofence_evaluate() {
        let fence = GeofenceConfig {
            center_lat: 0.0,
            center_lng: 0.0,
            max_distance_m: 100.0,
        };
        let near = fence.evaluate(Coordinate::new(50.0 / M_PER_DEG, 0.0));
        assert!(near.within);
        assert!((near.distance_m - 50.0).abs() < 1e-6);

        let far = fence.evaluate(Coordinate::new(150.0 / M_PER_DEG, 0.0));
        assert!(!far.within);
        assert!((far.distance_m - 150.0).abs() < 1e-6);
    }
}
