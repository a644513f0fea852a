//! # uav-poscontrol
//!
//! Position, velocity and acceleration control cascade for multicopters.
//!
//! The cascade takes a partially specified motion setpoint (any mix of
//! position, velocity, acceleration or raw thrust per axis) and resolves it
//! into a local position setpoint and a body attitude and thrust command for
//! a downstream attitude-rate controller.
//!
//! ## Modules
//!
//! - [`setpoint`]: input/output setpoint types and the additive merge rule
//! - [`control`]: the [`PositionControl`] cascade
//! - [`attitude`]: thrust vector to attitude mapping with tilt limiting
//! - [`config`]: gains and limits
//! - [`error`]: error type reported by a control cycle
//! - [`dynamics`]: point-mass plant for closed-loop simulation
//!
//! All vectors are in the local NED frame (z down).

pub mod attitude;
pub mod config;
pub mod control;
pub mod dynamics;
pub mod error;
pub mod setpoint;

pub use config::{ControlConfig, ControlGains, ControlLimits, VelocityGains};
pub use control::{PositionControl, VehicleState};
pub use error::ControlError;
pub use setpoint::{
    AttitudeSetpoint, AxisSetpoint, Constraints, InputSetpoint, LocalPositionSetpoint,
};

/// Standard gravity [m/s²]
pub const GRAVITY: f64 = 9.81;
