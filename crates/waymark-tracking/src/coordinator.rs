//! [`MarkerTrackingCoordinator`] – tracked-marker sessions and their overlays.
//!
//! Each [`TrackingBatch`] from the camera subsystem is processed in the order
//! `added`, `updated`, `removed`.
//!
//! A newly added marker gets a session with a fresh *generation*.  When
//! spawning is enabled an overlay is created in its loading state and the
//! marker identifier is resolved on the Tokio runtime.  The result comes back
//! over a channel and is applied by [`MarkerTrackingCoordinator::apply_completions`]
//! (non-blocking, once per frame) or
//! [`MarkerTrackingCoordinator::apply_next_completion`] (async).  A completion
//! is applied only if the session still exists with the generation it was
//! started for, so a marker removed (or re-added) while its fetch was running
//! is never touched by the stale result.
//!
//! With `use_content_store` off the coordinator works from a fixed table
//! instead: only identifiers listed in `mappings` get an overlay, placed with
//! the mapped transform and never resolved.  Other markers are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use waymark_content::ContentResolver;
use waymark_types::{ContentRecord, Pose, TrackableId, TrackingState};

use crate::overlay::{Overlay, OverlayFactory, OverlayPlacement};

// ─────────────────────────────────────────────────────────────────────────────
// Input events
// ─────────────────────────────────────────────────────────────────────────────

/// One marker as reported by the camera subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedImage {
    pub trackable_id: TrackableId,
    /// Registered name of the physical marker; doubles as the document id.
    pub identifier: String,
    pub tracking_state: TrackingState,
    pub pose: Pose,
}

impl TrackedImage {
    pub fn new(
        trackable_id: TrackableId,
        identifier: impl Into<String>,
        tracking_state: TrackingState,
    ) -> Self {
        Self {
            trackable_id,
            identifier: identifier.into(),
            tracking_state,
            pose: Pose::default(),
        }
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }
}

/// Changes reported by the camera subsystem for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingBatch {
    pub added: Vec<TrackedImage>,
    pub updated: Vec<TrackedImage>,
    pub removed: Vec<TrackableId>,
}

impl TrackingBatch {
    pub fn added(image: TrackedImage) -> Self {
        Self {
            added: vec![image],
            ..Self::default()
        }
    }

    pub fn updated(image: TrackedImage) -> Self {
        Self {
            updated: vec![image],
            ..Self::default()
        }
    }

    pub fn removed(id: TrackableId) -> Self {
        Self {
            removed: vec![id],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Show overlays whatever the tracking quality (markers shown on screens
    /// rarely reach full tracking).  When `false` only `Tracking` markers are
    /// shown.
    pub show_with_limited_tracking: bool,
    /// Resolve every marker through the content store.  When `false`, only
    /// markers listed in `mappings` are shown.
    pub use_content_store: bool,
    /// Marker identifier → placement, used when `use_content_store` is off.
    pub mappings: HashMap<String, OverlayPlacement>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            show_with_limited_tracking: true,
            use_content_store: true,
            mappings: HashMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Placement for `identifier`, or `None` when the marker should be
    /// ignored.
    fn placement_for(&self, identifier: &str) -> Option<OverlayPlacement> {
        if self.use_content_store {
            Some(OverlayPlacement::IDENTITY)
        } else {
            self.mappings.get(identifier).copied()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only snapshot of one tracked marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub trackable_id: TrackableId,
    pub identifier: String,
    pub tracking_state: TrackingState,
    pub has_overlay: bool,
    pub loading: bool,
    pub record: Option<ContentRecord>,
    pub visible: bool,
}

struct MarkerSession {
    identifier: String,
    tracking_state: TrackingState,
    pose: Pose,
    overlay: Option<Box<dyn Overlay>>,
    generation: u64,
    loading: bool,
    record: Option<ContentRecord>,
}

impl MarkerSession {
    fn view(&self, trackable_id: TrackableId) -> SessionView {
        SessionView {
            trackable_id,
            identifier: self.identifier.clone(),
            tracking_state: self.tracking_state,
            has_overlay: self.overlay.is_some(),
            loading: self.loading,
            record: self.record.clone(),
            visible: self.overlay.as_ref().is_some_and(|o| o.is_active()),
        }
    }

    fn destroy_overlay(&mut self) {
        if let Some(mut overlay) = self.overlay.take() {
            overlay.destroy();
        }
    }
}

struct Completion {
    trackable_id: TrackableId,
    generation: u64,
    record: ContentRecord,
}

fn should_show(config: &CoordinatorConfig, state: TrackingState) -> bool {
    config.show_with_limited_tracking || state == TrackingState::Tracking
}

// ─────────────────────────────────────────────────────────────────────────────
// MarkerTrackingCoordinator
// ─────────────────────────────────────────────────────────────────────────────

pub struct MarkerTrackingCoordinator {
    resolver: Arc<ContentResolver>,
    factory: Box<dyn OverlayFactory>,
    config: CoordinatorConfig,
    runtime: Handle,
    sessions: HashMap<TrackableId, MarkerSession>,
    next_generation: u64,
    spawning_enabled: bool,
    pending: usize,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl MarkerTrackingCoordinator {
    /// Resolutions are spawned onto `runtime`.
    pub fn new(
        resolver: Arc<ContentResolver>,
        factory: Box<dyn OverlayFactory>,
        config: CoordinatorConfig,
        runtime: Handle,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            resolver,
            factory,
            config,
            runtime,
            sessions: HashMap::new(),
            next_generation: 0,
            spawning_enabled: true,
            pending: 0,
            completion_tx,
            completion_rx,
        }
    }

    // -----------------------------------------------------------------------
    // Tracking events
    // -----------------------------------------------------------------------

    /// Process one frame's worth of tracking changes.
    pub fn handle_batch(&mut self, batch: TrackingBatch) {
        if batch.is_empty() {
            return;
        }
        debug!(
            added = batch.added.len(),
            updated = batch.updated.len(),
            removed = batch.removed.len(),
            "tracking batch"
        );
        for image in batch.added {
            self.handle_added(image);
        }
        for image in &batch.updated {
            self.handle_updated(image);
        }
        for id in batch.removed {
            self.handle_removed(id);
        }
    }

    fn handle_added(&mut self, image: TrackedImage) {
        let id = image.trackable_id;
        if let Some(mut previous) = self.sessions.remove(&id) {
            debug!(trackable = %id, marker = %previous.identifier, "replacing live session");
            previous.destroy_overlay();
        }
        if self.config.placement_for(&image.identifier).is_none() {
            warn!(trackable = %id, marker = %image.identifier, "no mapping for marker; ignored");
            return;
        }

        self.next_generation += 1;
        info!(
            trackable = %id,
            marker = %image.identifier,
            state = %image.tracking_state,
            "marker detected"
        );
        self.sessions.insert(
            id,
            MarkerSession {
                identifier: image.identifier,
                tracking_state: image.tracking_state,
                pose: image.pose,
                overlay: None,
                generation: self.next_generation,
                loading: false,
                record: None,
            },
        );

        if self.spawning_enabled {
            self.spawn_overlay(id);
        } else {
            debug!(trackable = %id, "overlay spawning deferred");
        }
    }

    fn handle_updated(&mut self, image: &TrackedImage) {
        let Some(session) = self.sessions.get_mut(&image.trackable_id) else {
            debug!(trackable = %image.trackable_id, "update for unknown marker ignored");
            return;
        };
        session.tracking_state = image.tracking_state;
        session.pose = image.pose;

        let visible = self.spawning_enabled && should_show(&self.config, image.tracking_state);
        if let Some(overlay) = session.overlay.as_mut() {
            overlay.follow(&image.pose);
            if overlay.is_active() != visible {
                overlay.set_active(visible);
                info!(
                    marker = %session.identifier,
                    state = %image.tracking_state,
                    visible,
                    "marker visibility changed"
                );
            }
        }
    }

    fn handle_removed(&mut self, id: TrackableId) {
        match self.sessions.remove(&id) {
            Some(mut session) => {
                session.destroy_overlay();
                info!(trackable = %id, marker = %session.identifier, "marker removed");
            }
            None => debug!(trackable = %id, "removal for unknown marker ignored"),
        }
    }

    fn spawn_overlay(&mut self, id: TrackableId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let image = TrackedImage {
            trackable_id: id,
            identifier: session.identifier.clone(),
            tracking_state: session.tracking_state,
            pose: session.pose,
        };

        let Some(placement) = self.config.placement_for(&image.identifier) else {
            return;
        };

        let mut overlay = self.factory.spawn(&image, &placement);
        if self.config.use_content_store {
            overlay.show_loading();
        }
        overlay.follow(&session.pose);
        let visible = self.spawning_enabled && should_show(&self.config, session.tracking_state);
        overlay.set_active(visible);
        session.overlay = Some(overlay);
        session.loading = self.config.use_content_store;
        debug!(trackable = %id, visible, "overlay spawned");

        if self.config.use_content_store {
            let generation = session.generation;
            self.start_resolve(id, generation, image.identifier);
        }
    }

    fn start_resolve(&mut self, trackable_id: TrackableId, generation: u64, identifier: String) {
        let resolver = Arc::clone(&self.resolver);
        let tx = self.completion_tx.clone();
        self.pending += 1;
        self.runtime.spawn(async move {
            let record = resolver.resolve(&identifier).await;
            // The receiver lives as long as the coordinator.
            let _ = tx.send(Completion {
                trackable_id,
                generation,
                record,
            });
        });
    }

    // -----------------------------------------------------------------------
    // Completions
    // -----------------------------------------------------------------------

    /// Apply every resolution that has finished so far.  Returns how many
    /// were applied to a live session (stale ones are dropped).
    pub fn apply_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            if self.apply(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next resolution and apply it.  Returns `false` when the
    /// result was stale.
    ///
    /// Only await this while [`pending_resolutions`][Self::pending_resolutions]
    /// is non-zero; otherwise it waits forever.
    pub async fn apply_next_completion(&mut self) -> bool {
        match self.completion_rx.recv().await {
            Some(completion) => self.apply(completion),
            None => false,
        }
    }

    fn apply(&mut self, completion: Completion) -> bool {
        self.pending = self.pending.saturating_sub(1);
        let Some(session) = self.sessions.get_mut(&completion.trackable_id) else {
            debug!(trackable = %completion.trackable_id, "resolution for removed marker dropped");
            return false;
        };
        if session.generation != completion.generation {
            debug!(
                trackable = %completion.trackable_id,
                stale = completion.generation,
                current = session.generation,
                "stale resolution dropped"
            );
            return false;
        }

        if let Some(overlay) = session.overlay.as_mut() {
            overlay.set_content(&completion.record);
        }
        session.loading = false;
        info!(
            marker = %session.identifier,
            title = %completion.record.title,
            "marker content applied"
        );
        session.record = Some(completion.record);
        true
    }

    /// Resolutions started but not yet applied or dropped.
    pub fn pending_resolutions(&self) -> usize {
        self.pending
    }

    // -----------------------------------------------------------------------
    // Mode gate
    // -----------------------------------------------------------------------

    /// Enable or disable overlay spawning.
    ///
    /// Disabling hides every overlay; markers detected meanwhile are recorded
    /// without an overlay.  Enabling spawns the deferred overlays and
    /// restores visibility.
    pub fn set_spawning_enabled(&mut self, enabled: bool) {
        if self.spawning_enabled == enabled {
            return;
        }
        self.spawning_enabled = enabled;
        info!(enabled, "marker overlay spawning");

        if !enabled {
            for session in self.sessions.values_mut() {
                if let Some(overlay) = session.overlay.as_mut() {
                    if overlay.is_active() {
                        overlay.set_active(false);
                    }
                }
            }
            return;
        }

        let deferred: Vec<TrackableId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.overlay.is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in deferred {
            self.spawn_overlay(id);
        }
        for session in self.sessions.values_mut() {
            let visible = should_show(&self.config, session.tracking_state);
            if let Some(overlay) = session.overlay.as_mut() {
                if overlay.is_active() != visible {
                    overlay.set_active(visible);
                }
            }
        }
    }

    pub fn is_spawning_enabled(&self) -> bool {
        self.spawning_enabled
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn session(&self, id: TrackableId) -> Option<SessionView> {
        self.sessions.get(&id).map(|s| s.view(id))
    }

    /// All sessions ordered by trackable id.
    pub fn sessions(&self) -> Vec<SessionView> {
        let mut views: Vec<_> = self.sessions.iter().map(|(id, s)| s.view(*id)).collect();
        views.sort_by_key(|v| v.trackable_id);
        views
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Destroy every overlay and forget every session.
    pub fn clear(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.destroy_overlay();
        }
        info!("all marker sessions cleared");
    }
}
