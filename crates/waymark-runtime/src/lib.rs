//! `waymark-runtime` – top-level orchestration.
//!
//! Arbitrates between marker tracking and GPS navigation and wires every
//! component into a single per-frame engine.
//!
//! # Modules
//!
//! - [`mode`] – [`AppModeCoordinator`][mode::AppModeCoordinator]: the
//!   application-mode state machine.  It is the only component allowed to
//!   switch overlay spawning and navigation steering on and off, through the
//!   [`MarkerLayer`][mode::MarkerLayer] and
//!   [`NavigationLayer`][mode::NavigationLayer] seams.
//! - [`engine`] – [`Engine`][engine::Engine]: builds the location tracker,
//!   content resolver, marker coordinator and steering from an
//!   [`EngineConfig`][engine::EngineConfig] and drives them frame by frame.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP span export.

pub mod engine;
pub mod mode;
pub mod telemetry;

pub use engine::{Engine, EngineConfig, FrameReport, SystemStatus};
pub use mode::{AppModeCoordinator, MarkerLayer, NavigationLayer};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
