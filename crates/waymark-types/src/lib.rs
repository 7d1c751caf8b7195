use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Application mode
// ────────────────────────────────────────────────────────────────────────────

/// The two operating modes of the engine.  Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppMode {
    /// Overlays are spawned on recognised printed markers.
    #[default]
    MarkerTracking,
    /// The steering indicator points toward a selected destination.
    Navigation,
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppMode::MarkerTracking => write!(f, "MARKER_TRACKING"),
            AppMode::Navigation => write!(f, "NAVIGATION"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Camera tracking
// ────────────────────────────────────────────────────────────────────────────

/// Runtime handle the camera subsystem assigns to one physical instance of a
/// tracked marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackableId(pub u64);

impl fmt::Display for TrackableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tracking confidence reported by the camera subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    #[default]
    None,
    /// Detected but not reliably tracked (typical for markers on screens).
    Limited,
    Tracking,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingState::None => write!(f, "none"),
            TrackingState::Limited => write!(f, "limited"),
            TrackingState::Tracking => write!(f, "tracking"),
        }
    }
}

impl std::str::FromStr for TrackingState {
    type Err = WaymarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(TrackingState::None),
            "limited" => Ok(TrackingState::Limited),
            "tracking" => Ok(TrackingState::Tracking),
            other => Err(WaymarkError::InvalidInvocation(format!(
                "unknown tracking state '{other}'"
            ))),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Spatial primitives
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector in scene space.  +Y is up, +Z is forward.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);
    pub const FORWARD: Vec3 = Vec3::new(0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if len <= f32::EPSILON {
            None
        } else {
            Some(self.scale(1.0 / len))
        }
    }

    /// Projection onto the horizontal plane (y dropped), normalised.
    ///
    /// Returns `None` when the vector points straight up or down.
    pub fn horizontal(self) -> Option<Self> {
        Self::new(self.x, 0.0, self.z).normalized()
    }

    /// Linear interpolation; `t` is clamped to `[0, 1]`.
    pub fn lerp(self, target: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        self.add(target.sub(self).scale(t))
    }
}

/// Position plus facing direction of a camera or a tracked marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub forward: Vec3,
}

impl Pose {
    pub fn new(position: Vec3, forward: Vec3) -> Self {
        Self { position, forward }
    }

    /// Heading of the forward vector around +Y, in degrees (0 = +Z, 90 = +X).
    pub fn yaw_degrees(&self) -> f32 {
        self.forward.x.atan2(self.forward.z).to_degrees()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new(Vec3::zero(), Vec3::FORWARD)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Content records
// ────────────────────────────────────────────────────────────────────────────

/// Informational content attached to a marker, or a synthetic fallback
/// describing why the real content could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub title: String,
    pub body: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl ContentRecord {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            latitude,
            longitude,
        }
    }

    /// Generic fallback used after network, parse or timeout failures.
    pub fn fetch_failed(id: &str) -> Self {
        Self::new(
            "Connection Error",
            format!(
                "Could not load the information for:\n{id}\n\n\
                 Possible causes:\n\
                 - No internet connection\n\
                 - Document store rules too restrictive\n\
                 - Invalid store credentials\n\n\
                 Check the logs for details."
            ),
            0.0,
            0.0,
        )
    }

    /// Fallback used when the store has no document for `id`.
    pub fn not_found(id: &str, collection: &str) -> Self {
        Self::new(
            "Document Not Found",
            format!(
                "The document with ID:\n{id}\n\n\
                 does not exist in the '{collection}' collection.\n\n\
                 Fixes:\n\
                 - Create the document in the store\n\
                 - Or use a marker whose name matches an existing document"
            ),
            0.0,
            0.0,
        )
    }

    /// Fallback used when the store rejects the read.
    pub fn permission_denied(id: &str) -> Self {
        Self::new(
            "Permission Denied",
            format!(
                "The document store rejected the read for:\n{id}\n\n\
                 Cause:\n\
                 The store's security rules are blocking reads.\n\n\
                 Fix:\n\
                 1. Open the store's rule editor\n\
                 2. Allow reads for this collection\n\
                 3. Publish the change and restart the app"
            ),
            0.0,
            0.0,
        )
    }

    /// Fallback used when a marker reports an empty identifier.
    pub fn missing_identifier() -> Self {
        Self::new(
            "Missing Marker Identifier",
            "The tracked marker has no registered name, so no content can be looked up.",
            0.0,
            0.0,
        )
    }

    /// `false` when both coordinates are exactly zero (the "unset" value).
    pub fn has_coordinates(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }

    pub fn formatted_coordinates(&self) -> String {
        if !self.has_coordinates() {
            return "Coordinates unavailable".to_string();
        }
        format!("Lat: {:.6}, Lon: {:.6}", self.latitude, self.longitude)
    }
}

/// A navigation target selected by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Destination {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
        }
    }
}

impl From<&ContentRecord> for Destination {
    fn from(record: &ContentRecord) -> Self {
        Self::new(record.title.clone(), record.latitude, record.longitude)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Device fix
// ────────────────────────────────────────────────────────────────────────────

/// Latest GPS/compass reading of the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    /// Compass heading in `[0, 360)`, 0 = north.
    pub heading_deg: f64,
    pub updated_at: DateTime<Utc>,
}

impl Default for DeviceFix {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            accuracy_m: 0.0,
            heading_deg: 0.0,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Engine-level error type.  Content-resolution failures never appear here:
/// they are turned into fallback [`ContentRecord`]s at the resolver boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaymarkError {
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Location service did not start within {seconds}s")]
    StartupTimeout { seconds: u64 },

    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
