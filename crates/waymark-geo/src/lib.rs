//! `waymark-geo` – geodesic math.
//!
//! Pure functions, no state, no error conditions.  Everything the engine
//! needs to turn two GPS coordinates into "how far, which way".
//!
//! # Modules
//!
//! - [`geodesic`] – great-circle distance, initial bearing, angle
//!   normalisation, cardinal names and distance formatting.
//! - [`interp`] – scalar interpolation helpers shared by the steering
//!   smoother (inverse lerp, frame-rate independent smoothing factor,
//!   shortest-path angular interpolation).

pub mod geodesic;
pub mod interp;

pub use geodesic::{
    EARTH_RADIUS_METERS, bearing_degrees, cardinal_name, distance_meters, format_distance,
    normalize_angle,
};
pub use interp::{inverse_lerp, lerp_angle, smoothing_factor};
