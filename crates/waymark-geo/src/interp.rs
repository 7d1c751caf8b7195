//! Scalar interpolation helpers.
//!
//! The steering smoother runs on a variable frame time, so every smoothing
//! step goes through [`smoothing_factor`] instead of the naive
//! `rate * dt`, which overshoots on long frames and depends on frame rate.

use crate::geodesic::normalize_angle;

/// Fraction of the remaining gap to close this frame for exponential
/// smoothing at `rate` (1/s) over `dt` seconds: `1 - exp(-rate * dt)`.
///
/// Always in `[0, 1)`.  Non-positive `rate` or `dt` yield 0 (no movement).
pub fn smoothing_factor(rate: f64, dt: f64) -> f64 {
    if rate <= 0.0 || dt <= 0.0 {
        return 0.0;
    }
    1.0 - (-rate * dt).exp()
}

/// Where `value` lies between `a` and `b`, clamped to `[0, 1]`.
///
/// `a` may be greater than `b` (e.g. "far" = 100 m, "near" = 20 m).
/// Returns 0 when `a == b`.
pub fn inverse_lerp(a: f64, b: f64, value: f64) -> f64 {
    if a == b {
        return 0.0;
    }
    ((value - a) / (b - a)).clamp(0.0, 1.0)
}

/// Interpolate from `current` toward `target` (degrees) along the shortest
/// arc.  The result is normalised to `[-180, 180)`.
pub fn lerp_angle(current: f64, target: f64, t: f64) -> f64 {
    let delta = normalize_angle(target - current);
    normalize_angle(current + delta * t.clamp(0.0, 1.0))
}
