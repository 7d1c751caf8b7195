//! `waymark-sensors` – GPS and compass ingestion.
//!
//! Owns the device's location/compass subscription and turns raw platform
//! samples into a [`DeviceFix`][waymark_types::DeviceFix] plus push-style
//! change notifications.
//!
//! # Modules
//!
//! - [`provider`] – [`LocationProvider`][provider::LocationProvider]: the
//!   thin platform seam (start/stop/status/last sample), and
//!   [`SimulatedProvider`][provider::SimulatedProvider] for desktop sessions
//!   and tests.
//! - [`tracker`] – [`LocationTracker`][tracker::LocationTracker]: the
//!   `Uninitialized → Starting → Ready → Failed` state machine with startup
//!   timeout, change-filtered location events, unfiltered heading events and
//!   derived bearing/distance/relative-angle queries.

pub mod provider;
pub mod tracker;

pub use provider::{LocationProvider, LocationSample, ProviderStatus, SimulatedProvider};
pub use tracker::{LocationConfig, LocationEvent, LocationTracker, TrackerState};
