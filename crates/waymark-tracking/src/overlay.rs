//! Rendering seam for marker overlays.
//!
//! The coordinator owns one [`Overlay`] per spawned marker and drives it
//! through loading → content → visibility changes → destroy.  Hosts with a
//! scene graph implement the traits over their panel objects; headless hosts
//! (the CLI, tests) use [`HeadlessOverlayFactory`], which only logs.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use waymark_types::{ContentRecord, Pose, Vec3};

use crate::coordinator::TrackedImage;

/// One informational panel attached to a tracked marker.
pub trait Overlay: Send {
    /// Show a placeholder while content is being fetched.
    fn show_loading(&mut self);

    /// Replace the placeholder with resolved content.
    fn set_content(&mut self, record: &ContentRecord);

    fn set_active(&mut self, active: bool);

    fn is_active(&self) -> bool;

    /// Move the panel with its marker.
    fn follow(&mut self, pose: &Pose);

    /// Release the panel.  The overlay is dropped right after.
    fn destroy(&mut self);
}

/// Local transform of an overlay relative to its marker.
///
/// Content-store overlays use the identity placement; fixed mappings carry
/// their own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayPlacement {
    /// Offset from the marker centre, in marker space (metres).
    pub offset: Vec3,
    /// Rotation as Euler angles in degrees.
    pub euler_deg: Vec3,
    /// A zero scale means "unset" and is treated as `(1, 1, 1)`.
    pub scale: Vec3,
}

impl OverlayPlacement {
    pub const IDENTITY: OverlayPlacement = OverlayPlacement {
        offset: Vec3::zero(),
        euler_deg: Vec3::zero(),
        scale: Vec3::new(1.0, 1.0, 1.0),
    };

    pub fn effective_scale(&self) -> Vec3 {
        if self.scale == Vec3::zero() {
            Self::IDENTITY.scale
        } else {
            self.scale
        }
    }
}

impl Default for OverlayPlacement {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Creates overlays for newly tracked markers.
pub trait OverlayFactory: Send {
    fn spawn(&mut self, marker: &TrackedImage, placement: &OverlayPlacement) -> Box<dyn Overlay>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Headless implementation
// ─────────────────────────────────────────────────────────────────────────────

/// An overlay without a scene: it tracks its own state and logs changes.
#[derive(Debug, Clone)]
pub struct HeadlessOverlay {
    identifier: String,
    active: bool,
    loading: bool,
    title: Option<String>,
    pose: Pose,
    placement: OverlayPlacement,
}

impl HeadlessOverlay {
    pub fn new(identifier: impl Into<String>, pose: Pose) -> Self {
        Self {
            identifier: identifier.into(),
            active: false,
            loading: false,
            title: None,
            pose,
            placement: OverlayPlacement::IDENTITY,
        }
    }

    pub fn with_placement(mut self, placement: OverlayPlacement) -> Self {
        self.placement = placement;
        self
    }

    pub fn placement(&self) -> &OverlayPlacement {
        &self.placement
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }
}

impl Overlay for HeadlessOverlay {
    fn show_loading(&mut self) {
        self.loading = true;
        debug!(marker = %self.identifier, "overlay loading");
    }

    fn set_content(&mut self, record: &ContentRecord) {
        self.loading = false;
        self.title = Some(record.title.clone());
        info!(
            marker = %self.identifier,
            title = %record.title,
            coordinates = %record.formatted_coordinates(),
            "overlay content set"
        );
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
        debug!(marker = %self.identifier, active, "overlay visibility");
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn follow(&mut self, pose: &Pose) {
        self.pose = *pose;
    }

    fn destroy(&mut self) {
        self.active = false;
        debug!(marker = %self.identifier, "overlay destroyed");
    }
}

/// Spawns a [`HeadlessOverlay`] for every marker.
#[derive(Debug, Default)]
pub struct HeadlessOverlayFactory {
    spawned: usize,
}

impl HeadlessOverlayFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlays spawned over the factory's lifetime.
    pub fn spawned(&self) -> usize {
        self.spawned
    }
}

impl OverlayFactory for HeadlessOverlayFactory {
    fn spawn(&mut self, marker: &TrackedImage, placement: &OverlayPlacement) -> Box<dyn Overlay> {
        self.spawned += 1;
        debug!(
            marker = %marker.identifier,
            trackable = %marker.trackable_id,
            ?placement,
            "spawning headless overlay"
        );
        let placement = OverlayPlacement {
            scale: placement.effective_scale(),
            ..*placement
        };
        Box::new(HeadlessOverlay::new(marker.identifier.clone(), marker.pose).with_placement(placement))
    }
}
