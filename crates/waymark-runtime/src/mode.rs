//! [`AppModeCoordinator`] – marker tracking ⇄ navigation.
//!
//! ```text
//!                  set_mode(NAVIGATION)
//!   MARKER_TRACKING ───────────────────▶ NAVIGATION
//!         ▲  spawning on                   spawning off, steering on
//!         └──────────────────────────────────┘
//!                  set_mode(MARKER_TRACKING): steering stopped + off
//! ```
//!
//! The camera subsystem keeps running in both modes; only overlay spawning is
//! gated so that marker panels do not clutter the navigation view.

use tracing::{info, warn};
use waymark_navigation::NavigationSteering;
use waymark_tracking::MarkerTrackingCoordinator;
use waymark_types::{AppMode, Destination};

// ─────────────────────────────────────────────────────────────────────────────
// Layer seams
// ─────────────────────────────────────────────────────────────────────────────

/// The marker-overlay side of the application.
pub trait MarkerLayer {
    fn set_spawning_enabled(&mut self, enabled: bool);
}

/// The navigation side of the application.
pub trait NavigationLayer {
    fn set_enabled(&mut self, enabled: bool);
    fn set_destination(&mut self, destination: Destination);
    fn stop(&mut self);
}

impl MarkerLayer for MarkerTrackingCoordinator {
    fn set_spawning_enabled(&mut self, enabled: bool) {
        MarkerTrackingCoordinator::set_spawning_enabled(self, enabled);
    }
}

impl NavigationLayer for NavigationSteering {
    fn set_enabled(&mut self, enabled: bool) {
        NavigationSteering::set_enabled(self, enabled);
    }

    fn set_destination(&mut self, destination: Destination) {
        NavigationSteering::set_destination(self, destination);
    }

    fn stop(&mut self) {
        NavigationSteering::stop(self);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AppModeCoordinator
// ─────────────────────────────────────────────────────────────────────────────

pub struct AppModeCoordinator<M, N> {
    mode: AppMode,
    markers: M,
    navigation: N,
    transitions: u64,
}

impl<M: MarkerLayer, N: NavigationLayer> AppModeCoordinator<M, N> {
    /// Take ownership of both layers and put them in the initial
    /// `MARKER_TRACKING` configuration.
    pub fn new(mut markers: M, mut navigation: N) -> Self {
        navigation.set_enabled(false);
        markers.set_spawning_enabled(true);
        info!(mode = %AppMode::MarkerTracking, "application mode initialised");
        Self {
            mode: AppMode::MarkerTracking,
            markers,
            navigation,
            transitions: 0,
        }
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    /// Number of mode changes since construction.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Switch to `mode`.  Returns `false` (and touches nothing) when already
    /// in `mode`.
    pub fn set_mode(&mut self, mode: AppMode) -> bool {
        if self.mode == mode {
            return false;
        }
        let previous = self.mode;
        self.mode = mode;
        self.transitions += 1;

        match mode {
            AppMode::Navigation => {
                self.markers.set_spawning_enabled(false);
                self.navigation.set_enabled(true);
            }
            AppMode::MarkerTracking => {
                self.navigation.stop();
                self.navigation.set_enabled(false);
                self.markers.set_spawning_enabled(true);
            }
        }
        info!(from = %previous, to = %mode, "application mode changed");
        true
    }

    /// Enter navigation toward `destination`.  `None` is logged and ignored.
    pub fn start_navigation(&mut self, destination: Option<Destination>) -> bool {
        let Some(destination) = destination else {
            warn!("start_navigation called without a destination");
            return false;
        };
        self.set_mode(AppMode::Navigation);
        self.navigation.set_destination(destination);
        true
    }

    pub fn cancel_navigation(&mut self) {
        self.set_mode(AppMode::MarkerTracking);
    }

    /// Flip to the other mode and return it.
    pub fn toggle_mode(&mut self) -> AppMode {
        let next = match self.mode {
            AppMode::MarkerTracking => AppMode::Navigation,
            AppMode::Navigation => AppMode::MarkerTracking,
        };
        self.set_mode(next);
        next
    }

    pub fn markers(&self) -> &M {
        &self.markers
    }

    pub fn markers_mut(&mut self) -> &mut M {
        &mut self.markers
    }

    pub fn navigation(&self) -> &N {
        &self.navigation
    }

    pub fn navigation_mut(&mut self) -> &mut N {
        &mut self.navigation
    }
}
