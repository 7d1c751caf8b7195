//! Visual feedback curves for the direction indicator.

use serde::{Deserialize, Serialize};
use waymark_geo::inverse_lerp;

/// Linear RGBA colour, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const RED: Rgba = Rgba::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Rgba = Rgba::new(0.0, 1.0, 0.0, 1.0);
    pub const WHITE: Rgba = Rgba::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Channel-wise interpolation; `t` is clamped to `[0, 1]`.
    pub fn lerp(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: f32, b: f32| a + (b - a) * t;
        Self::new(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
            mix(self.a, other.a),
        )
    }

    /// `#rrggbb` hex notation, alpha ignored.
    pub fn to_hex(self) -> String {
        let byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", byte(self.r), byte(self.g), byte(self.b))
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Colour for `distance_m`: `far` at or beyond `far_m`, `near` at or within
/// `near_m`, blended in between.
pub fn distance_color(far: Rgba, near: Rgba, far_m: f64, near_m: f64, distance_m: f64) -> Rgba {
    far.lerp(near, inverse_lerp(far_m, near_m, distance_m) as f32)
}

/// Scale multiplier of the breathing animation at `elapsed_secs`.
pub fn pulse(elapsed_secs: f64, speed: f32, intensity: f32) -> f32 {
    1.0 + ((elapsed_secs * f64::from(speed)).sin() as f32) * intensity
}
