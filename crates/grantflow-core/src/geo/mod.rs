//! Great-circle distance and site-proximity verification.
//!
//! Evidence photos are verified against the work site by haversine
//! distance. The verification decision is strict: a capture at exactly the
//! radius is **not** verified, and a capture with no fix is never verified.
//! Verification is recomputed wherever evidence crosses a trust boundary —
//! the daemon recomputes it at report commit time rather than trusting a
//! client-supplied flag.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default radius within which a capture counts as on-site.
pub const SITE_VERIFICATION_RADIUS_M: f64 = 500.0;

/// Errors that can occur validating coordinates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GeoError {
    /// Latitude outside `-90.0..=90.0` or longitude outside
    /// `-180.0..=180.0`, or a non-finite value.
    #[error("coordinate out of range: lat={latitude}, lon={longitude}")]
    OutOfRange {
        /// The rejected latitude.
        latitude: f64,
        /// The rejected longitude.
        longitude: f64,
    },
}

/// A point on the Earth's surface, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, `-90.0..=90.0`.
    pub latitude: f64,
    /// Longitude in degrees, `-180.0..=180.0`.
    pub longitude: f64,
}

impl GeoPoint {
    /// Creates a validated point.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::OutOfRange`] for non-finite or out-of-range
    /// coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        let in_range = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !in_range {
            return Err(GeoError::OutOfRange {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Outcome of checking a capture location against the site reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteVerification {
    /// Haversine distance in metres, `None` when no fix was acquired.
    pub distance_m: Option<f64>,
    /// Whether the capture counts as on-site (`distance < radius`).
    pub verified: bool,
}

impl SiteVerification {
    /// Verification outcome when location acquisition failed: never
    /// verified, no distance recorded.
    pub const UNAVAILABLE: Self = Self {
        distance_m: None,
        verified: false,
    };
}

/// Haversine great-circle distance between two points, in metres.
///
/// ```text
/// a = sin²(Δφ/2) + cos(φ1)·cos(φ2)·sin²(Δλ/2)
/// d = 2·R·atan2(√a, √(1−a))
/// ```
#[must_use]
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Checks a capture location against the site reference.
///
/// `capture = None` means location acquisition failed or timed out; the
/// result is [`SiteVerification::UNAVAILABLE`], never a silent pass.
/// Verification is strictly `distance < radius`: exactly the radius fails.
#[must_use]
pub fn verify_proximity(
    capture: Option<GeoPoint>,
    site: GeoPoint,
    radius_m: f64,
) -> SiteVerification {
    match capture {
        Some(point) => {
            let distance = haversine_distance_m(point, site);
            SiteVerification {
                distance_m: Some(distance),
                verified: distance < radius_m,
            }
        },
        None => SiteVerification::UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Moves `meters` north of `point` along a meridian.
    fn north_of(point: GeoPoint, meters: f64) -> GeoPoint {
        let d_lat = (meters / EARTH_RADIUS_M).to_degrees();
        GeoPoint::new(point.latitude + d_lat, point.longitude).unwrap()
    }

    #[test]
    fn test_zero_distance() {
        let p = GeoPoint::new(28.6139, 77.2090).unwrap();
        assert!(haversine_distance_m(p, p) < 1e-9);
    }

    #[test]
    fn test_known_distance_delhi_to_agra() {
        // New Delhi to Agra is roughly 180 km as the crow flies.
        let delhi = GeoPoint::new(28.6139, 77.2090).unwrap();
        let agra = GeoPoint::new(27.1767, 78.0081).unwrap();
        let d = haversine_distance_m(delhi, agra);
        assert!((175_000.0..185_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn test_boundary_at_exactly_the_radius_is_not_verified() {
        let site = GeoPoint::new(25.3176, 82.9739).unwrap();
        let at_radius = north_of(site, SITE_VERIFICATION_RADIUS_M);

        let v = verify_proximity(Some(at_radius), site, SITE_VERIFICATION_RADIUS_M);
        let d = v.distance_m.unwrap();
        // The synthetic point lands within a millimetre of 500 m; verification
        // must agree with the strict `<` comparison on the computed distance.
        assert!((d - SITE_VERIFICATION_RADIUS_M).abs() < 1e-3, "got {d}");
        assert_eq!(v.verified, d < SITE_VERIFICATION_RADIUS_M);
    }

    #[test]
    fn test_inside_and_outside_radius() {
        let site = GeoPoint::new(25.3176, 82.9739).unwrap();

        let near = north_of(site, 120.0);
        let v = verify_proximity(Some(near), site, SITE_VERIFICATION_RADIUS_M);
        assert!(v.verified);

        let far = north_of(site, 2_000.0);
        let v = verify_proximity(Some(far), site, SITE_VERIFICATION_RADIUS_M);
        assert!(!v.verified);
        assert!(v.distance_m.unwrap() > 1_900.0);
    }

    #[test]
    fn test_unavailable_location_is_never_verified() {
        let site = GeoPoint::new(25.3176, 82.9739).unwrap();
        let v = verify_proximity(None, site, SITE_VERIFICATION_RADIUS_M);
        assert!(!v.verified);
        assert!(v.distance_m.is_none());
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, 180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::new(-90.0, 180.0).is_ok());
    }
}
