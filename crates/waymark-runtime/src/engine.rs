//! [`Engine`] – wires every component together and drives them per frame.
//!
//! ```text
//!  camera ──TrackingBatch──▶ MarkerTrackingCoordinator ──resolve──▶ ContentResolver ──▶ DocumentStore
//!                                   ▲ spawning gate
//!                            AppModeCoordinator
//!                                   ▼ steering gate
//!  GPS/compass ──▶ LocationTracker ──▶ NavigationSteering ──▶ SteeringOutput
//! ```
//!
//! The host calls [`Engine::handle_tracking_batch`] whenever the camera
//! reports marker changes and [`Engine::tick`] once per frame.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{info, instrument, warn};
use waymark_content::{CatalogEntry, ContentResolver, DocumentStore, ResolverConfig};
use waymark_navigation::{NavigationSteering, SteeringConfig, SteeringOutput};
use waymark_sensors::{LocationConfig, LocationProvider, LocationTracker, TrackerState};
use waymark_tracking::{
    CoordinatorConfig, MarkerTrackingCoordinator, OverlayFactory, SessionView, TrackingBatch,
};
use waymark_types::{AppMode, ContentRecord, Destination, DeviceFix, Pose, WaymarkError};

use crate::mode::AppModeCoordinator;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration of every engine component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub location: LocationConfig,
    pub content: ResolverConfig,
    pub tracking: CoordinatorConfig,
    pub steering: SteeringConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one [`Engine::tick`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub mode: AppMode,
    pub steering: SteeringOutput,
    /// Marker resolutions applied to live sessions during this frame.
    pub applied_resolutions: usize,
}

/// Snapshot for status panels and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub mode: AppMode,
    pub location_state: TrackerState,
    pub fix: Option<DeviceFix>,
    pub sensor_error: Option<String>,
    pub spawning_enabled: bool,
    pub session_count: usize,
    pub pending_resolutions: usize,
    pub cached_records: usize,
    pub destination: Option<Destination>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

pub struct Engine {
    tracker: Arc<LocationTracker>,
    resolver: Arc<ContentResolver>,
    modes: AppModeCoordinator<MarkerTrackingCoordinator, NavigationSteering>,
}

impl Engine {
    /// Build the engine.  Marker resolutions are spawned onto `runtime`.
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn LocationProvider>,
        store: Arc<dyn DocumentStore>,
        overlays: Box<dyn OverlayFactory>,
        runtime: Handle,
    ) -> Self {
        let tracker = Arc::new(LocationTracker::new(provider, config.location));
        let resolver = Arc::new(ContentResolver::new(store, config.content));
        let markers = MarkerTrackingCoordinator::new(
            Arc::clone(&resolver),
            overlays,
            config.tracking,
            runtime,
        );
        let steering = NavigationSteering::new(Arc::clone(&tracker), config.steering);

        Self {
            tracker,
            resolver,
            modes: AppModeCoordinator::new(markers, steering),
        }
    }

    /// Start GPS and compass.  Failure leaves the engine usable: marker
    /// tracking keeps working and navigation reports sensors unavailable.
    pub async fn start_location(&self) -> Result<(), WaymarkError> {
        self.tracker.start().await
    }

    pub fn handle_tracking_batch(&mut self, batch: TrackingBatch) {
        self.modes.markers_mut().handle_batch(batch);
    }

    /// Advance one frame: ingest sensors, apply finished resolutions, steer.
    pub fn tick(&mut self, dt: f64, camera: Pose) -> FrameReport {
        self.tracker.poll();
        let applied_resolutions = self.modes.markers_mut().apply_completions();
        let steering = self.modes.navigation_mut().tick(dt, camera);
        FrameReport {
            mode: self.modes.mode(),
            steering,
            applied_resolutions,
        }
    }

    /// Wait until every started marker resolution has been applied or
    /// dropped.  Returns how many were applied.
    pub async fn settle_resolutions(&mut self) -> usize {
        let markers = self.modes.markers_mut();
        let mut applied = 0;
        while markers.pending_resolutions() > 0 {
            if markers.apply_next_completion().await {
                applied += 1;
            }
        }
        applied
    }

    /// Resolve `doc_id` and navigate to it.
    ///
    /// # Errors
    ///
    /// [`WaymarkError::InvalidInvocation`] when `doc_id` is empty or the
    /// resolved record has no coordinates (including every fallback record).
    #[instrument(skip(self))]
    pub async fn navigate_to(&mut self, doc_id: &str) -> Result<Destination, WaymarkError> {
        if doc_id.is_empty() {
            return Err(WaymarkError::InvalidInvocation(
                "navigate_to needs a document id".into(),
            ));
        }
        let record = self.resolver.resolve(doc_id).await;
        if !record.has_coordinates() {
            warn!(doc_id, title = %record.title, "destination has no coordinates");
            return Err(WaymarkError::InvalidInvocation(format!(
                "'{}' ({doc_id}) has no coordinates",
                record.title
            )));
        }
        let destination = Destination::from(&record);
        self.modes.start_navigation(Some(destination.clone()));
        Ok(destination)
    }

    pub fn start_navigation(&mut self, destination: Option<Destination>) -> bool {
        self.modes.start_navigation(destination)
    }

    pub fn cancel_navigation(&mut self) {
        self.modes.cancel_navigation();
    }

    pub fn toggle_mode(&mut self) -> AppMode {
        self.modes.toggle_mode()
    }

    pub fn mode(&self) -> AppMode {
        self.modes.mode()
    }

    pub async fn destinations(&self) -> Vec<CatalogEntry> {
        self.resolver.list_destinations().await
    }

    pub async fn resolve(&self, id: &str) -> ContentRecord {
        self.resolver.resolve(id).await
    }

    pub fn clear_cache(&self) {
        self.resolver.clear_cache();
    }

    pub fn sessions(&self) -> Vec<SessionView> {
        self.modes.markers().sessions()
    }

    pub fn tracker(&self) -> &Arc<LocationTracker> {
        &self.tracker
    }

    pub fn status(&self) -> SystemStatus {
        let markers = self.modes.markers();
        let steering = self.modes.navigation();
        SystemStatus {
            mode: self.modes.mode(),
            location_state: self.tracker.state(),
            fix: self.tracker.fix(),
            sensor_error: steering
                .last_sensor_error()
                .map(str::to_string)
                .or_else(|| self.tracker.last_error()),
            spawning_enabled: markers.is_spawning_enabled(),
            session_count: markers.session_count(),
            pending_resolutions: markers.pending_resolutions(),
            cached_records: self.resolver.cached_count(),
            destination: steering.destination().cloned(),
        }
    }

    /// Return to marker tracking, drop every overlay and stop the sensors.
    pub fn shutdown(&mut self) {
        self.modes.markers_mut().clear();
        self.modes.cancel_navigation();
        self.tracker.teardown();
        info!("engine shut down");
    }
}
