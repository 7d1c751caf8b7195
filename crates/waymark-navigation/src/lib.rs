//! # waymark-navigation
//!
//! Steers a 3-D direction indicator toward a GPS destination.
//!
//! # Modules
//!
//! - [`feedback`] – [`Rgba`] colours and the distance/pulse feedback curves.
//! - [`steering`] – [`NavigationSteering`]: per-frame indicator pose,
//!   distance and bearing readouts.

pub mod feedback;
pub mod steering;

pub use feedback::Rgba;
pub use steering::{
    Indicator, NavigationSteering, SteeringConfig, SteeringOutput, SteeringReading,
};
