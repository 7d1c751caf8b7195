//! Great-circle geometry on a spherical Earth.
//!
//! All angles are in degrees at the API boundary.  Bearings follow compass
//! convention: 0° = north, 90° = east, values in `[0, 360)`.
//!
//! # Example
//!
//! ```rust
//! use waymark_geo::geodesic::{bearing_degrees, cardinal_name, distance_meters, format_distance};
//!
//! let d = distance_meters(13.7181, -89.2041, 13.7200, -89.2000);
//! let b = bearing_degrees(13.7181, -89.2041, 13.7200, -89.2000);
//!
//! assert!((d - 490.7).abs() < 1.0);
//! assert_eq!(cardinal_name(b), "NE");
//! assert_eq!(format_distance(d), "491 m");
//! ```

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

const CARDINALS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

/// Great-circle distance between two coordinates, in metres (haversine).
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Initial bearing from point 1 toward point 2, in `[0, 360)`.
pub fn bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if bearing >= 360.0 { 0.0 } else { bearing }
}

/// Map any angle into `[-180, 180)`.
///
/// Used to compute the shortest signed delta between two headings.
/// Idempotent: values already in range are returned bit-for-bit unchanged.
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle;
    if a.abs() > 720.0 {
        // fmod is exact, so this only shortens the loops below.
        a %= 360.0;
    }
    while a >= 180.0 {
        a -= 360.0;
    }
    while a < -180.0 {
        a += 360.0;
    }
    a
}

/// Nearest of the eight compass points for `bearing`.
pub fn cardinal_name(bearing: f64) -> &'static str {
    let index = ((bearing / 45.0).round() as i64).rem_euclid(8) as usize;
    CARDINALS[index]
}

/// Human-readable distance: whole metres below one kilometre, otherwise
/// kilometres with two decimals.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}
