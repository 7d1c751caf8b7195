//! # waymark-tracking
//!
//! Binds camera-tracked markers to informational overlays.
//!
//! # Modules
//!
//! - [`overlay`] – the [`Overlay`] / [`OverlayFactory`] rendering seam and a
//!   logging [`HeadlessOverlayFactory`].
//! - [`coordinator`] – [`MarkerTrackingCoordinator`]: per-marker sessions,
//!   asynchronous content resolution and visibility rules.

pub mod coordinator;
pub mod overlay;

pub use coordinator::{
    CoordinatorConfig, MarkerTrackingCoordinator, SessionView, TrackedImage, TrackingBatch,
};
pub use overlay::{
    HeadlessOverlay, HeadlessOverlayFactory, Overlay, OverlayFactory, OverlayPlacement,
};
