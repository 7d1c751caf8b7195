//! [`NavigationSteering`] – per-frame direction indicator.
//!
//! Every [`tick`][NavigationSteering::tick] places the indicator a fixed
//! distance in front of the camera (on the horizontal plane, slightly below
//! eye level) and rotates it toward the destination using the
//! [`LocationTracker`]'s relative angle.  Position and yaw are smoothed with
//! a frame-rate independent exponential filter; yaw takes the shortest arc.
//!
//! ```text
//!             destination
//!                 ▲
//!                 │ relative angle (compass-corrected)
//!   camera ──▶ [indicator] at lookahead, height offset
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use waymark_geo::{cardinal_name, format_distance, lerp_angle, normalize_angle, smoothing_factor};
use waymark_sensors::{LocationEvent, LocationTracker};
use waymark_types::{Destination, Pose, Vec3};

use crate::feedback::{Rgba, distance_color, pulse};

/// Distance (m) that maps to one degree of indicator tilt.
const TILT_METERS_PER_DEGREE: f64 = 100.0;
const MAX_TILT_DEG: f64 = 30.0;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringConfig {
    /// Distance of the indicator in front of the camera, metres.
    pub lookahead_m: f32,
    /// Vertical offset from eye level, metres (negative = below).
    pub height_offset_m: f32,
    pub base_scale: f32,
    pub smooth_position: bool,
    pub position_smooth_rate: f64,
    pub rotation_smooth_rate: f64,
    /// Tilt the indicator with distance to the destination.
    pub vertical_tilt: bool,
    pub color_feedback: bool,
    pub far_color: Rgba,
    pub near_color: Rgba,
    pub far_distance_m: f64,
    pub near_distance_m: f64,
    pub pulse: bool,
    pub pulse_speed: f32,
    pub pulse_intensity: f32,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            lookahead_m: 2.0,
            height_offset_m: -0.5,
            base_scale: 0.3,
            smooth_position: true,
            position_smooth_rate: 10.0,
            rotation_smooth_rate: 8.0,
            vertical_tilt: true,
            color_feedback: true,
            far_color: Rgba::RED,
            near_color: Rgba::GREEN,
            far_distance_m: 100.0,
            near_distance_m: 20.0,
            pulse: true,
            pulse_speed: 2.0,
            pulse_intensity: 0.1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output types
// ─────────────────────────────────────────────────────────────────────────────

/// Transform and colour of the direction indicator in scene space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Indicator {
    pub position: Vec3,
    /// Rotation around +Y, degrees in `[-180, 180)`.
    pub yaw_deg: f64,
    /// Rotation around +X, degrees.
    pub pitch_deg: f64,
    pub scale: f32,
    pub color: Rgba,
}

/// Everything a HUD needs to render one navigation frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SteeringReading {
    pub destination: String,
    pub distance_m: f64,
    pub bearing_deg: f64,
    pub cardinal: &'static str,
    pub relative_angle_deg: f64,
    /// `"{name}\n{distance}"`, e.g. `"Biblioteca\n491 m"`.
    pub distance_label: String,
    /// `"{cardinal} ({bearing}°)"`, e.g. `"NE (64°)"`.
    pub direction_label: String,
    pub indicator: Indicator,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SteeringOutput {
    /// Disabled or no destination: nothing to draw.
    Idle,
    /// A destination is set but there is no usable fix.  The indicator
    /// still follows the camera; its yaw is frozen.
    SensorsUnavailable { indicator: Indicator, reason: String },
    Steering(SteeringReading),
}

// ─────────────────────────────────────────────────────────────────────────────
// NavigationSteering
// ─────────────────────────────────────────────────────────────────────────────

pub struct NavigationSteering {
    tracker: Arc<LocationTracker>,
    events: broadcast::Receiver<LocationEvent>,
    config: SteeringConfig,
    enabled: bool,
    destination: Option<Destination>,
    indicator: Option<Indicator>,
    last_camera: Pose,
    elapsed_secs: f64,
    sensor_error: Option<String>,
}

impl NavigationSteering {
    /// Starts disabled; the mode coordinator turns it on.
    pub fn new(tracker: Arc<LocationTracker>, config: SteeringConfig) -> Self {
        let events = tracker.subscribe();
        Self {
            tracker,
            events,
            config,
            enabled: false,
            destination: None,
            indicator: None,
            last_camera: Pose::default(),
            elapsed_secs: 0.0,
            sensor_error: None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            debug!(enabled, "navigation steering");
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Replace the destination and respawn the indicator in front of the last
    /// known camera pose, facing the camera's heading.
    pub fn set_destination(&mut self, destination: Destination) {
        info!(
            destination = %destination.name,
            latitude = destination.latitude,
            longitude = destination.longitude,
            "navigation destination set"
        );
        if !self.tracker.is_ready() {
            warn!("location services not ready; waiting for a fix");
        }
        self.indicator = Some(self.spawn_indicator(&self.last_camera));
        self.elapsed_secs = 0.0;
        self.destination = Some(destination);
    }

    /// Remove the indicator and forget the destination.  Idempotent.
    pub fn stop(&mut self) {
        if self.destination.take().is_some() | self.indicator.take().is_some() {
            info!("navigation stopped");
        }
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn indicator(&self) -> Option<&Indicator> {
        self.indicator.as_ref()
    }

    /// Steering is active: enabled with a destination.
    pub fn is_navigating(&self) -> bool {
        self.enabled && self.destination.is_some()
    }

    /// Most recent error broadcast by the location tracker.
    pub fn last_sensor_error(&self) -> Option<&str> {
        self.sensor_error.as_deref()
    }

    pub fn config(&self) -> &SteeringConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Per-frame update
    // -----------------------------------------------------------------------

    /// Advance one frame of `dt` seconds with the current camera pose.
    pub fn tick(&mut self, dt: f64, camera: Pose) -> SteeringOutput {
        self.drain_events();
        self.last_camera = camera;
        self.elapsed_secs += dt.max(0.0);

        if !self.enabled {
            return SteeringOutput::Idle;
        }
        let (Some(destination), Some(mut indicator)) = (self.destination.clone(), self.indicator)
        else {
            return SteeringOutput::Idle;
        };

        let target = self.anchor_position(&camera);
        indicator.position = if self.config.smooth_position {
            let t = smoothing_factor(self.config.position_smooth_rate, dt) as f32;
            indicator.position.lerp(target, t)
        } else {
            target
        };
        indicator.scale = self.pulsed_scale();

        let reading = self.tracker.relative_angle_to(destination.latitude, destination.longitude).zip(
            self.tracker
                .distance_to(destination.latitude, destination.longitude)
                .zip(self.tracker.bearing_to(destination.latitude, destination.longitude)),
        );
        let Some((relative, (distance, bearing))) = reading else {
            self.indicator = Some(indicator);
            return SteeringOutput::SensorsUnavailable {
                indicator,
                reason: self.unavailable_reason(),
            };
        };

        indicator.yaw_deg = lerp_angle(
            indicator.yaw_deg,
            relative,
            smoothing_factor(self.config.rotation_smooth_rate, dt),
        );
        if self.config.vertical_tilt {
            indicator.pitch_deg =
                (distance / TILT_METERS_PER_DEGREE).clamp(-MAX_TILT_DEG, MAX_TILT_DEG);
        }
        if self.config.color_feedback {
            indicator.color = distance_color(
                self.config.far_color,
                self.config.near_color,
                self.config.far_distance_m,
                self.config.near_distance_m,
                distance,
            );
        }
        self.indicator = Some(indicator);

        let cardinal = cardinal_name(bearing);
        SteeringOutput::Steering(SteeringReading {
            distance_label: format!("{}\n{}", destination.name, format_distance(distance)),
            direction_label: format!("{cardinal} ({bearing:.0}°)"),
            destination: destination.name,
            distance_m: distance,
            bearing_deg: bearing,
            cardinal,
            relative_angle_deg: relative,
            indicator,
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(LocationEvent::LocationChanged {
                    latitude,
                    longitude,
                    accuracy_m,
                }) => {
                    self.sensor_error = None;
                    if self.is_navigating() {
                        debug!(latitude, longitude, accuracy_m, "location updated while navigating");
                    }
                }
                Ok(LocationEvent::HeadingChanged { .. }) => {}
                Ok(LocationEvent::Error { reason }) => {
                    warn!(%reason, "location error reported to steering");
                    self.sensor_error = Some(reason);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "steering lagged behind location events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// Point `lookahead_m` in front of the camera on the horizontal plane,
    /// offset vertically.
    fn anchor_position(&self, camera: &Pose) -> Vec3 {
        let forward = camera.forward.horizontal().unwrap_or(Vec3::FORWARD);
        camera
            .position
            .add(forward.scale(self.config.lookahead_m))
            .add(Vec3::UP.scale(self.config.height_offset_m))
    }

    fn spawn_indicator(&self, camera: &Pose) -> Indicator {
        let forward = camera.forward.horizontal().unwrap_or(Vec3::FORWARD);
        Indicator {
            position: self.anchor_position(camera),
            yaw_deg: normalize_angle(f64::from(forward.x.atan2(forward.z).to_degrees())),
            pitch_deg: 0.0,
            scale: self.config.base_scale,
            color: if self.config.color_feedback {
                self.config.far_color
            } else {
                Rgba::WHITE
            },
        }
    }

    fn pulsed_scale(&self) -> f32 {
        if self.config.pulse {
            self.config.base_scale
                * pulse(
                    self.elapsed_secs,
                    self.config.pulse_speed,
                    self.config.pulse_intensity,
                )
        } else {
            self.config.base_scale
        }
    }

    fn unavailable_reason(&self) -> String {
        self.sensor_error
            .clone()
            .or_else(|| self.tracker.last_error())
            .unwrap_or_else(|| {
                if self.tracker.is_ready() {
                    "waiting for the first GPS fix".to_string()
                } else {
                    "GPS not available".to_string()
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_sensors::{LocationConfig, ProviderStatus, SimulatedProvider};

    const CAMPUS: (f64, f64) = (13.7181, -89.2041);
    const LIBRARY: (f64, f64) = (13.7200, -89.2000);
    const DT: f64 = 1.0 / 30.0;

    fn library() -> Destination {
        Destination::new("Biblioteca", LIBRARY.0, LIBRARY.1)
    }

    async fn ready_tracker(heading: f64) -> (Arc<SimulatedProvider>, Arc<LocationTracker>) {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1).with_heading(heading));
        let tracker = Arc::new(LocationTracker::new(sim.clone(), LocationConfig::default()));
        tracker.start().await.unwrap();
        (sim, tracker)
    }

    fn steering(tracker: &Arc<LocationTracker>, config: SteeringConfig) -> NavigationSteering {
        let mut steering = NavigationSteering::new(tracker.clone(), config);
        steering.set_enabled(true);
        steering
    }

    fn reading(output: SteeringOutput) -> SteeringReading {
        match output {
            SteeringOutput::Steering(reading) => reading,
            other => panic!("expected a steering reading, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_without_destination_or_when_disabled() {
        let (_, tracker) = ready_tracker(0.0).await;
        let mut nav = NavigationSteering::new(tracker.clone(), SteeringConfig::default());

        nav.set_destination(library());
        assert_eq!(nav.tick(DT, Pose::default()), SteeringOutput::Idle);

        nav.set_enabled(true);
        nav.stop();
        assert_eq!(nav.tick(DT, Pose::default()), SteeringOutput::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn campus_to_library_readout() {
        let (_, tracker) = ready_tracker(0.0).await;
        let mut nav = steering(&tracker, SteeringConfig::default());
        nav.set_destination(library());

        let r = reading(nav.tick(DT, Pose::default()));

        assert!((r.distance_m - 495.0).abs() < 10.0, "distance {}", r.distance_m);
        assert!((r.bearing_deg - 63.0).abs() < 2.5, "bearing {}", r.bearing_deg);
        assert_eq!(r.cardinal, "NE");
        assert_eq!(r.distance_label, "Biblioteca\n491 m");
        assert_eq!(r.direction_label, "NE (64°)");
        assert!((r.indicator.pitch_deg - r.distance_m / 100.0).abs() < 1e-9);
        assert_eq!(r.indicator.color, Rgba::RED);
    }

    #[tokio::test(start_paused = true)]
    async fn yaw_converges_to_relative_angle() {
        let (_, tracker) = ready_tracker(90.0).await;
        let mut nav = steering(&tracker, SteeringConfig::default());
        nav.set_destination(library());

        let first = reading(nav.tick(DT, Pose::default()));
        // One frame only covers part of the turn.
        assert!((first.indicator.yaw_deg - first.relative_angle_deg).abs() > 1.0);

        let mut last = first;
        for _ in 0..120 {
            last = reading(nav.tick(DT, Pose::default()));
        }
        assert!((last.indicator.yaw_deg - last.relative_angle_deg).abs() < 0.01);
        // Facing east, the target lies to the left.
        assert!(last.relative_angle_deg < 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unsmoothed_position_snaps_to_anchor() {
        let (_, tracker) = ready_tracker(0.0).await;
        let mut nav = steering(
            &tracker,
            SteeringConfig {
                smooth_position: false,
                ..SteeringConfig::default()
            },
        );
        nav.set_destination(library());

        let camera = Pose::new(Vec3::new(1.0, 1.6, 0.0), Vec3::new(1.0, -0.5, 0.0));
        let r = reading(nav.tick(DT, camera));

        let expected = Vec3::new(3.0, 1.1, 0.0);
        assert!(r.indicator.position.sub(expected).length() < 1e-5);
    }

    #[tokio::test(start_paused = true)]
    async fn smoothed_position_approaches_anchor() {
        let (_, tracker) = ready_tracker(0.0).await;
        let mut nav = steering(&tracker, SteeringConfig::default());
        nav.set_destination(library());

        let camera = Pose::new(Vec3::new(10.0, 0.0, 0.0), Vec3::FORWARD);
        let target = Vec3::new(10.0, -0.5, 2.0);
        let start_gap = nav.indicator().unwrap().position.sub(target).length();

        let after_one = reading(nav.tick(DT, camera)).indicator.position.sub(target).length();
        assert!(after_one < start_gap);
        assert!(after_one > 0.0);

        for _ in 0..200 {
            nav.tick(DT, camera);
        }
        assert!(nav.indicator().unwrap().position.sub(target).length() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn near_destination_turns_green() {
        let (sim, tracker) = ready_tracker(0.0).await;
        let mut nav = steering(&tracker, SteeringConfig::default());
        nav.set_destination(library());

        sim.set_location(LIBRARY.0 - 0.0001, LIBRARY.1);
        tracker.poll();
        let r = reading(nav.tick(DT, Pose::default()));

        assert!(r.distance_m < 20.0);
        assert_eq!(r.indicator.color, Rgba::GREEN);
        assert_eq!(r.cardinal, "N");
    }

    #[tokio::test(start_paused = true)]
    async fn scale_pulses_around_base() {
        let (_, tracker) = ready_tracker(0.0).await;
        let mut nav = steering(&tracker, SteeringConfig::default());
        nav.set_destination(library());

        let mut scales = Vec::new();
        for _ in 0..60 {
            scales.push(reading(nav.tick(DT, Pose::default())).indicator.scale);
        }
        assert!(scales.iter().all(|s| (0.27..=0.33).contains(s)));
        assert!(scales.iter().any(|s| *s > 0.3));
    }

    #[tokio::test(start_paused = true)]
    async fn sensors_unavailable_reports_tracker_error() {
        let sim = Arc::new(
            SimulatedProvider::new(CAMPUS.0, CAMPUS.1).with_startup_status(ProviderStatus::Failed),
        );
        let tracker = Arc::new(LocationTracker::new(sim, LocationConfig::default()));
        let mut nav = steering(&tracker, SteeringConfig::default());
        nav.set_destination(library());

        assert!(tracker.start().await.is_err());
        match nav.tick(DT, Pose::default()) {
            SteeringOutput::SensorsUnavailable { reason, indicator } => {
                assert!(reason.contains("failed to start"), "reason: {reason}");
                assert_eq!(indicator.scale, nav.indicator().unwrap().scale);
            }
            other => panic!("expected SensorsUnavailable, got {other:?}"),
        }
        assert!(nav.last_sensor_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn set_destination_respawns_facing_camera() {
        let (_, tracker) = ready_tracker(0.0).await;
        let mut nav = steering(&tracker, SteeringConfig::default());
        let camera = Pose::new(Vec3::zero(), Vec3::new(1.0, 0.0, 0.0));
        nav.tick(DT, camera);

        nav.set_destination(library());
        let indicator = *nav.indicator().unwrap();
        assert!((indicator.yaw_deg - 90.0).abs() < 1e-4);
        assert!(indicator.position.sub(Vec3::new(2.0, -0.5, 0.0)).length() < 1e-5);

        // Walk and turn to face -X; the running indicator drifts toward the
        // destination meanwhile.
        let turned = Pose::new(Vec3::new(3.0, 1.0, 4.0), Vec3::new(-1.0, 0.0, 0.0));
        for _ in 0..30 {
            nav.tick(DT, turned);
        }
        assert!((nav.indicator().unwrap().yaw_deg + 90.0).abs() > 1.0);

        nav.set_destination(Destination::new("Cafetería", CAMPUS.0, CAMPUS.1 + 0.001));
        assert_eq!(nav.destination().unwrap().name, "Cafetería");
        let respawned = *nav.indicator().unwrap();
        assert!((respawned.yaw_deg + 90.0).abs() < 1e-4);
        assert!(respawned.position.sub(Vec3::new(1.0, 0.5, 4.0)).length() < 1e-5);
        assert_eq!(respawned.pitch_deg, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (_, tracker) = ready_tracker(0.0).await;
        let mut nav = steering(&tracker, SteeringConfig::default());
        nav.set_destination(library());

        nav.stop();
        nav.stop();
        assert!(nav.destination().is_none());
        assert!(nav.indicator().is_none());
        assert!(!nav.is_navigating());
    }
}
