//! [`LocationTracker`] – GPS/compass state machine.
//!
//! ```text
//! Uninitialized ──start()──▶ Starting ──running──▶ Ready
//!                              │
//!                              └──timeout / failed / disabled──▶ Failed
//! teardown() from any state ──▶ Uninitialized
//! ```
//!
//! While `Starting` the platform service is polled once per second until it
//! leaves `Initializing` or the startup timeout elapses.  While `Ready`,
//! every [`LocationTracker::poll`] ingests the newest platform sample:
//!
//! * a [`LocationEvent::LocationChanged`] is broadcast only when latitude or
//!   longitude differ from the previous fix;
//! * a [`LocationEvent::HeadingChanged`] is broadcast on every compass
//!   sample (the compass is high-frequency and not change-filtered).
//!
//! Subscribers receive events through a [`tokio::sync::broadcast`] channel,
//! so every subscriber sees every event in send order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use waymark_geo::{bearing_degrees, distance_meters, normalize_angle};
use waymark_types::{DeviceFix, WaymarkError};

use crate::provider::{LocationProvider, LocationSample, ProviderStatus};

/// Interval between status checks while the service is initialising.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning passed to the platform service and the startup watchdog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Requested accuracy in metres (smaller = more battery).
    pub desired_accuracy_m: f64,
    /// Minimum movement in metres before the platform reports a new sample.
    pub update_distance_m: f64,
    /// How long `start` waits for the service to leave `Initializing`.
    pub startup_timeout_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            desired_accuracy_m: 10.0,
            update_distance_m: 5.0,
            startup_timeout_secs: 20,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerState {
    Uninitialized,
    Starting,
    Ready,
    Failed,
}

/// Notification broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    LocationChanged {
        latitude: f64,
        longitude: f64,
        accuracy_m: f64,
    },
    HeadingChanged {
        heading_deg: f64,
    },
    /// The service could not be started; `reason` is user-presentable.
    Error {
        reason: String,
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

struct TrackerInner {
    state: TrackerState,
    location: Option<LocationSample>,
    heading_deg: f64,
    updated_at: DateTime<Utc>,
    compass_enabled: bool,
    last_error: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// LocationTracker
// ────────────────────────────────────────────────────────────────────────────

/// Owns the platform location subscription and exposes the latest fix.
///
/// Share it behind an [`Arc`]; every method takes `&self`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use waymark_sensors::{LocationConfig, LocationTracker, SimulatedProvider};
///
/// # tokio_test_block(async {
/// let sim = Arc::new(SimulatedProvider::new(13.7181, -89.2041).with_heading(60.0));
/// let tracker = LocationTracker::new(sim.clone(), LocationConfig::default());
/// tracker.start().await.unwrap();
///
/// let angle = tracker.relative_angle_to(13.7200, -89.2000).unwrap();
/// assert!(angle.abs() < 10.0); // destination is almost straight ahead
/// # });
/// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct LocationTracker {
    provider: Arc<dyn LocationProvider>,
    config: LocationConfig,
    inner: Mutex<TrackerInner>,
    events: broadcast::Sender<LocationEvent>,
}

impl LocationTracker {
    pub fn new(provider: Arc<dyn LocationProvider>, config: LocationConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            config,
            inner: Mutex::new(TrackerInner {
                state: TrackerState::Uninitialized,
                location: None,
                heading_deg: 0.0,
                updated_at: DateTime::<Utc>::UNIX_EPOCH,
                compass_enabled: false,
                last_error: None,
            }),
            events,
        }
    }

    /// Subscribe to location, heading and error notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LocationEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the platform service and wait for it to come up.
    ///
    /// Calling `start` while already `Starting` or `Ready` is a no-op.
    ///
    /// # Errors
    ///
    /// * [`WaymarkError::SensorUnavailable`] – location disabled by the user,
    ///   the service reported failure, or `teardown` ran mid-startup.
    /// * [`WaymarkError::StartupTimeout`] – still initialising after
    ///   `startup_timeout_secs`.
    ///
    /// Every error is also broadcast as [`LocationEvent::Error`].
    #[instrument(skip(self), fields(timeout_secs = self.config.startup_timeout_secs))]
    pub async fn start(&self) -> Result<(), WaymarkError> {
        {
            let mut inner = self.lock();
            if matches!(inner.state, TrackerState::Starting | TrackerState::Ready) {
                debug!(state = ?inner.state, "location tracker already started");
                return Ok(());
            }
            inner.state = TrackerState::Starting;
            inner.last_error = None;
        }
        info!("starting location services");

        if !self.provider.is_enabled_by_user() {
            return Err(self.fail(WaymarkError::SensorUnavailable(
                "location services are disabled by the user; enable them in settings".into(),
            )));
        }

        self.provider
            .start(self.config.desired_accuracy_m, self.config.update_distance_m);

        let max_polls = self.config.startup_timeout_secs;
        let mut polls = 0;
        while self.provider.status() == ProviderStatus::Initializing && polls < max_polls {
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
            if self.state() != TrackerState::Starting {
                break;
            }
            polls += 1;
            debug!(polls, max_polls, "waiting for location service");
        }

        // teardown() stops the provider, so its status says nothing here.
        if self.state() != TrackerState::Starting {
            return Err(Self::superseded());
        }

        match self.provider.status() {
            ProviderStatus::Running => {}
            ProviderStatus::Initializing => {
                return Err(self.fail(WaymarkError::StartupTimeout { seconds: max_polls }));
            }
            ProviderStatus::Failed | ProviderStatus::Stopped => {
                return Err(self.fail(WaymarkError::SensorUnavailable(
                    "location service failed to start; check permissions".into(),
                )));
            }
        }

        {
            let mut inner = self.lock();
            if inner.state != TrackerState::Starting {
                return Err(Self::superseded());
            }
            inner.state = TrackerState::Ready;
            inner.compass_enabled = true;
        }
        self.provider.set_compass_enabled(true);
        self.poll();

        if let Some(fix) = self.fix() {
            info!(
                latitude = fix.latitude,
                longitude = fix.longitude,
                accuracy_m = fix.accuracy_m,
                "location services ready"
            );
        } else {
            info!("location services ready, waiting for first fix");
        }
        Ok(())
    }

    /// Stop the platform subscription and forget the last fix.  Safe to
    /// call from any state; a `start` in progress returns an error without
    /// reporting a sensor failure.
    pub fn teardown(&self) {
        {
            let mut inner = self.lock();
            inner.state = TrackerState::Uninitialized;
            inner.compass_enabled = false;
            inner.location = None;
            inner.heading_deg = 0.0;
            inner.updated_at = DateTime::<Utc>::UNIX_EPOCH;
            inner.last_error = None;
        }
        self.provider.stop();
        self.provider.set_compass_enabled(false);
        info!("location services stopped");
    }

    // -----------------------------------------------------------------------
    // Sample ingestion
    // -----------------------------------------------------------------------

    /// Pull the newest sample from the platform (call once per frame).
    ///
    /// No-op unless the tracker is `Ready`.
    pub fn poll(&self) {
        let compass_enabled = {
            let inner = self.lock();
            if inner.state != TrackerState::Ready {
                return;
            }
            inner.compass_enabled
        };

        let status = self.provider.status();
        if status != ProviderStatus::Running {
            debug!(?status, "location service not running; sample skipped");
            return;
        }

        if let Some(sample) = self.provider.last_location() {
            self.ingest_location(sample);
        }
        if compass_enabled {
            if let Some(heading) = self.provider.heading() {
                self.ingest_heading(heading);
            }
        }
    }

    /// Record a location sample pushed by the platform.
    ///
    /// Returns `true` (and broadcasts [`LocationEvent::LocationChanged`])
    /// when latitude or longitude differ from the previous fix.  Ignored
    /// unless `Ready`.
    pub fn ingest_location(&self, sample: LocationSample) -> bool {
        {
            let mut inner = self.lock();
            if inner.state != TrackerState::Ready {
                return false;
            }
            let changed = match inner.location {
                Some(prev) => {
                    prev.latitude != sample.latitude || prev.longitude != sample.longitude
                }
                None => true,
            };
            if !changed {
                return false;
            }
            inner.location = Some(sample);
            inner.updated_at = Utc::now();
        }

        if sample.accuracy_m < 20.0 {
            debug!(
                latitude = sample.latitude,
                longitude = sample.longitude,
                accuracy_m = sample.accuracy_m,
                "location updated"
            );
        }
        let _ = self.events.send(LocationEvent::LocationChanged {
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy_m: sample.accuracy_m,
        });
        true
    }

    /// Record a compass sample.  Always broadcasts
    /// [`LocationEvent::HeadingChanged`] while `Ready`.
    pub fn ingest_heading(&self, heading_deg: f64) {
        let heading_deg = {
            let mut inner = self.lock();
            if inner.state != TrackerState::Ready {
                return;
            }
            let normalized = heading_deg.rem_euclid(360.0);
            inner.heading_deg = if normalized >= 360.0 { 0.0 } else { normalized };
            inner.heading_deg
        };
        let _ = self.events.send(LocationEvent::HeadingChanged { heading_deg });
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> TrackerState {
        self.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == TrackerState::Ready
    }

    /// Reason of the most recent startup failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Snapshot of the current fix; `None` until the first sample arrives.
    pub fn fix(&self) -> Option<DeviceFix> {
        let inner = self.lock();
        inner.location.map(|loc| DeviceFix {
            latitude: loc.latitude,
            longitude: loc.longitude,
            accuracy_m: loc.accuracy_m,
            heading_deg: inner.heading_deg,
            updated_at: inner.updated_at,
        })
    }

    /// Bearing from the device to the destination, `[0, 360)`.
    pub fn bearing_to(&self, dest_lat: f64, dest_lon: f64) -> Option<f64> {
        self.ready_fix()
            .map(|fix| bearing_degrees(fix.latitude, fix.longitude, dest_lat, dest_lon))
    }

    /// Great-circle distance from the device to the destination, metres.
    pub fn distance_to(&self, dest_lat: f64, dest_lon: f64) -> Option<f64> {
        self.ready_fix()
            .map(|fix| distance_meters(fix.latitude, fix.longitude, dest_lat, dest_lon))
    }

    /// Angle the user must turn to face the destination, `[-180, 180)`:
    /// 0 = straight ahead, 90 = right, -90 = left.
    pub fn relative_angle_to(&self, dest_lat: f64, dest_lon: f64) -> Option<f64> {
        self.ready_fix().map(|fix| {
            let bearing = bearing_degrees(fix.latitude, fix.longitude, dest_lat, dest_lon);
            normalize_angle(bearing - fix.heading_deg)
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn ready_fix(&self) -> Option<DeviceFix> {
        if !self.is_ready() {
            return None;
        }
        self.fix()
    }

    /// Mark a startup as failed.  A startup already superseded by
    /// `teardown` is left alone.
    fn fail(&self, err: WaymarkError) -> WaymarkError {
        let reason = err.to_string();
        {
            let mut inner = self.lock();
            if inner.state != TrackerState::Starting {
                return Self::superseded();
            }
            inner.state = TrackerState::Failed;
            inner.last_error = Some(reason.clone());
        }
        error!(%reason, "location services unavailable");
        let _ = self.events.send(LocationEvent::Error { reason });
        err
    }

    fn superseded() -> WaymarkError {
        warn!("location startup superseded by teardown");
        WaymarkError::SensorUnavailable("location startup aborted by teardown".into())
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SimulatedProvider;

    const CAMPUS: (f64, f64) = (13.7181, -89.2041);
    const LIBRARY: (f64, f64) = (13.7200, -89.2000);

    fn tracker_with(sim: &Arc<SimulatedProvider>) -> LocationTracker {
        LocationTracker::new(sim.clone(), LocationConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn start_reaches_ready_and_reads_first_fix() {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1).with_heading(90.0));
        let tracker = tracker_with(&sim);
        assert_eq!(tracker.state(), TrackerState::Uninitialized);

        tracker.start().await.unwrap();

        assert_eq!(tracker.state(), TrackerState::Ready);
        assert!(sim.compass_enabled());
        let fix = tracker.fix().unwrap();
        assert_eq!(fix.latitude, CAMPUS.0);
        assert_eq!(fix.heading_deg, 90.0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_times_out_when_service_never_initialises() {
        let sim = Arc::new(
            SimulatedProvider::new(CAMPUS.0, CAMPUS.1)
                .with_startup_status(ProviderStatus::Initializing),
        );
        let tracker = tracker_with(&sim);
        let mut rx = tracker.subscribe();

        let err = tracker.start().await.unwrap_err();

        assert_eq!(err, WaymarkError::StartupTimeout { seconds: 20 });
        assert_eq!(tracker.state(), TrackerState::Failed);
        assert!(matches!(rx.recv().await.unwrap(), LocationEvent::Error { .. }));
        assert!(tracker.last_error().unwrap().contains("20s"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_for_slow_service() {
        let sim = Arc::new(
            SimulatedProvider::new(CAMPUS.0, CAMPUS.1)
                .with_startup_status(ProviderStatus::Initializing),
        );
        let tracker = tracker_with(&sim);

        let finisher = {
            let sim = sim.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(3_500)).await;
                sim.set_status(ProviderStatus::Running);
            })
        };

        tracker.start().await.unwrap();
        finisher.await.unwrap();
        assert!(tracker.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn start_fails_when_disabled_by_user() {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1).disabled_by_user());
        let tracker = tracker_with(&sim);

        let err = tracker.start().await.unwrap_err();

        assert!(matches!(err, WaymarkError::SensorUnavailable(_)));
        assert_eq!(tracker.state(), TrackerState::Failed);
        assert_eq!(sim.start_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_fails_when_service_fails() {
        let sim = Arc::new(
            SimulatedProvider::new(CAMPUS.0, CAMPUS.1).with_startup_status(ProviderStatus::Failed),
        );
        let tracker = tracker_with(&sim);
        assert!(matches!(
            tracker.start().await,
            Err(WaymarkError::SensorUnavailable(_))
        ));
        assert!(tracker.bearing_to(LIBRARY.0, LIBRARY.1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn location_event_only_on_change() {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1));
        let tracker = tracker_with(&sim);
        tracker.start().await.unwrap();
        let mut rx = tracker.subscribe();

        // Same coordinates: no location event, heading event every time.
        tracker.poll();
        tracker.poll();
        sim.set_location(LIBRARY.0, LIBRARY.1);
        tracker.poll();

        let mut location_events = 0;
        let mut heading_events = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                LocationEvent::LocationChanged { latitude, .. } => {
                    assert_eq!(latitude, LIBRARY.0);
                    location_events += 1;
                }
                LocationEvent::HeadingChanged { .. } => heading_events += 1,
                LocationEvent::Error { .. } => panic!("unexpected error event"),
            }
        }
        assert_eq!(location_events, 1);
        assert_eq!(heading_events, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ingest_heading_normalises() {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1));
        let tracker = tracker_with(&sim);
        tracker.start().await.unwrap();

        tracker.ingest_heading(-90.0);
        assert_eq!(tracker.fix().unwrap().heading_deg, 270.0);
        tracker.ingest_heading(725.0);
        assert!((tracker.fix().unwrap().heading_deg - 5.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn derived_queries_match_geodesic_math() {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1).with_heading(90.0));
        let tracker = tracker_with(&sim);
        tracker.start().await.unwrap();

        let bearing = tracker.bearing_to(LIBRARY.0, LIBRARY.1).unwrap();
        let distance = tracker.distance_to(LIBRARY.0, LIBRARY.1).unwrap();
        let relative = tracker.relative_angle_to(LIBRARY.0, LIBRARY.1).unwrap();

        assert!((distance - 495.0).abs() < 10.0);
        assert!((relative - (bearing - 90.0)).abs() < 1e-9);
        // Facing east with the target to the north-east: turn left.
        assert!(relative < 0.0);
    }

    #[test]
    fn queries_are_none_before_start() {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1));
        let tracker = tracker_with(&sim);
        tracker.poll();
        assert!(tracker.fix().is_none());
        assert!(tracker.relative_angle_to(LIBRARY.0, LIBRARY.1).is_none());
        assert!(!tracker.ingest_location(LocationSample::new(1.0, 1.0, 3.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_is_safe_from_any_state() {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1));
        let tracker = tracker_with(&sim);
        tracker.teardown();
        assert_eq!(tracker.state(), TrackerState::Uninitialized);

        tracker.start().await.unwrap();
        tracker.teardown();
        tracker.teardown();
        assert_eq!(tracker.state(), TrackerState::Uninitialized);
        assert_eq!(sim.status(), ProviderStatus::Stopped);
        assert!(tracker.distance_to(LIBRARY.0, LIBRARY.1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_during_startup_is_not_a_failure() {
        let sim = Arc::new(
            SimulatedProvider::new(CAMPUS.0, CAMPUS.1)
                .with_startup_status(ProviderStatus::Initializing),
        );
        let tracker = Arc::new(tracker_with(&sim));
        let mut rx = tracker.subscribe();

        let starting = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.start().await })
        };
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(tracker.state(), TrackerState::Starting);
        tracker.teardown();

        let err = starting.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("teardown"));
        assert_eq!(tracker.state(), TrackerState::Uninitialized);
        assert!(tracker.last_error().is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(sim.status(), ProviderStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_forgets_fix_and_restart_reports_location_again() {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1).with_heading(45.0));
        let tracker = tracker_with(&sim);
        tracker.start().await.unwrap();
        assert!(tracker.fix().is_some());

        tracker.teardown();
        assert!(tracker.fix().is_none());

        let mut rx = tracker.subscribe();
        tracker.start().await.unwrap();
        let fix = tracker.fix().unwrap();
        assert_eq!((fix.latitude, fix.longitude), CAMPUS);
        assert_eq!(
            rx.try_recv().unwrap(),
            LocationEvent::LocationChanged {
                latitude: CAMPUS.0,
                longitude: CAMPUS.1,
                accuracy_m: 5.0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_noop_while_ready() {
        let sim = Arc::new(SimulatedProvider::new(CAMPUS.0, CAMPUS.1));
        let tracker = tracker_with(&sim);
        tracker.start().await.unwrap();
        tracker.start().await.unwrap();
        assert_eq!(sim.start_calls(), 1);
    }
}
