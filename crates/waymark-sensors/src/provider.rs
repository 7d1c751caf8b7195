//! Platform location/compass seam.
//!
//! The real platform calls (enable check, start, stop, last sample) are thin
//! wrappers that live outside the engine.  A driver implements
//! [`LocationProvider`] and hands it to a
//! [`LocationTracker`][crate::tracker::LocationTracker].
//!
//! [`SimulatedProvider`] stands in for the device when running on a desktop
//! or in tests: the position and heading are set by hand and the service
//! status can be scripted to exercise the startup failure paths.

use std::sync::{Mutex, MutexGuard, PoisonError};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle status reported by the platform location service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Stopped,
    Initializing,
    Running,
    Failed,
}

/// One raw GPS sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    pub accuracy_m: f64,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
        }
    }
}

/// A platform location + compass service.
///
/// Methods take `&self`; implementations use interior mutability so a
/// single provider can be shared between the tracker and the code that
/// feeds it.
pub trait LocationProvider: Send + Sync {
    /// Whether the user has location services switched on.
    fn is_enabled_by_user(&self) -> bool;

    /// Ask the platform to begin producing samples.
    fn start(&self, desired_accuracy_m: f64, update_distance_m: f64);

    /// Current service status.
    fn status(&self) -> ProviderStatus;

    /// Most recent location sample, if the service has produced one.
    fn last_location(&self) -> Option<LocationSample>;

    /// Switch the compass on or off.
    fn set_compass_enabled(&self, enabled: bool);

    /// Current true-north heading in degrees, if the compass is on.
    fn heading(&self) -> Option<f64>;

    /// Stop the service.  Must be safe to call in any status.
    fn stop(&self);
}

// ────────────────────────────────────────────────────────────────────────────
// SimulatedProvider
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SimulatedState {
    enabled_by_user: bool,
    startup_status: ProviderStatus,
    status: ProviderStatus,
    location: LocationSample,
    heading_deg: f64,
    compass_enabled: bool,
    start_calls: u32,
}

/// Hand-driven [`LocationProvider`].
///
/// # Example
///
/// ```
/// use waymark_sensors::provider::{LocationProvider, ProviderStatus, SimulatedProvider};
///
/// let sim = SimulatedProvider::new(13.7181033, -89.2040915).with_heading(45.0);
/// assert_eq!(sim.status(), ProviderStatus::Stopped);
///
/// sim.start(10.0, 5.0);
/// assert_eq!(sim.status(), ProviderStatus::Running);
/// assert_eq!(sim.last_location().unwrap().latitude, 13.7181033);
/// ```
#[derive(Debug)]
pub struct SimulatedProvider {
    state: Mutex<SimulatedState>,
}

impl SimulatedProvider {
    /// A provider parked at (`latitude`, `longitude`) with 5 m accuracy,
    /// heading north, that reaches [`ProviderStatus::Running`] as soon as it
    /// is started.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                enabled_by_user: true,
                startup_status: ProviderStatus::Running,
                status: ProviderStatus::Stopped,
                location: LocationSample::new(latitude, longitude, 5.0),
                heading_deg: 0.0,
                compass_enabled: false,
                start_calls: 0,
            }),
        }
    }

    pub fn with_heading(self, heading_deg: f64) -> Self {
        self.lock().heading_deg = heading_deg;
        self
    }

    /// Status the service enters when [`LocationProvider::start`] is called.
    pub fn with_startup_status(self, status: ProviderStatus) -> Self {
        self.lock().startup_status = status;
        self
    }

    /// Simulate the user having switched location services off.
    pub fn disabled_by_user(self) -> Self {
        self.lock().enabled_by_user = false;
        self
    }

    pub fn set_location(&self, latitude: f64, longitude: f64) {
        let mut state = self.lock();
        state.location.latitude = latitude;
        state.location.longitude = longitude;
    }

    pub fn set_accuracy(&self, accuracy_m: f64) {
        self.lock().location.accuracy_m = accuracy_m;
    }

    pub fn set_heading(&self, heading_deg: f64) {
        self.lock().heading_deg = heading_deg;
    }

    /// Turn the simulated device by `delta_deg` (positive = clockwise).
    pub fn rotate_heading(&self, delta_deg: f64) {
        let mut state = self.lock();
        state.heading_deg = (state.heading_deg + delta_deg).rem_euclid(360.0);
    }

    /// Force the service status, e.g. to finish a scripted startup.
    pub fn set_status(&self, status: ProviderStatus) {
        self.lock().status = status;
    }

    pub fn start_calls(&self) -> u32 {
        self.lock().start_calls
    }

    pub fn compass_enabled(&self) -> bool {
        self.lock().compass_enabled
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocationProvider for SimulatedProvider {
    fn is_enabled_by_user(&self) -> bool {
        self.lock().enabled_by_user
    }

    fn start(&self, _desired_accuracy_m: f64, _update_distance_m: f64) {
        let mut state = self.lock();
        state.start_calls += 1;
        state.status = state.startup_status;
    }

    fn status(&self) -> ProviderStatus {
        self.lock().status
    }

    fn last_location(&self) -> Option<LocationSample> {
        let state = self.lock();
        (state.status == ProviderStatus::Running).then_some(state.location)
    }

    fn set_compass_enabled(&self, enabled: bool) {
        self.lock().compass_enabled = enabled;
    }

    fn heading(&self) -> Option<f64> {
        let state = self.lock();
        state.compass_enabled.then_some(state.heading_deg)
    }

    fn stop(&self) {
        let mut state = self.lock();
        state.status = ProviderStatus::Stopped;
        state.compass_enabled = false;
    }
}
