//! MAVLink Bridge Module
//!
//! Provides integration with ArduPilot flight controllers via MAVLink and a
//! mission runner built on top of it.

mod commands;
mod connection;
mod runner;

pub use connection::{FcConfig, FcConnectionType, FlightController};
pub use runner::MavlinkMissionRunner;
