//! Controller configuration
//!
//! Gains and limits of the cascade. These are set once by the parameter layer
//! and stay fixed during a cycle; [`crate::PositionControl`] also exposes
//! individual setters for changing them between cycles.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::attitude::MAX_TILT;
use crate::error::ControlError;

/// Velocity loop PID gains, one scalar per axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityGains {
    /// Proportional gain [(m/s²)/(m/s)]
    pub p: Vector3<f64>,
    /// Integral gain [(m/s²)/m]
    pub i: Vector3<f64>,
    /// Derivative gain on measured acceleration [s]
    pub d: Vector3<f64>,
}

impl Default for VelocityGains {
    fn default() -> Self {
        Self {
            p: Vector3::new(1.8, 1.8, 4.0),
            i: Vector3::new(0.4, 0.4, 2.0),
            d: Vector3::new(0.2, 0.2, 0.0),
        }
    }
}

/// All gains of the cascade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlGains {
    /// Position proportional gain [(m/s)/m]
    pub position_p: Vector3<f64>,
    pub velocity: VelocityGains,
}

impl Default for ControlGains {
    fn default() -> Self {
        Self {
            position_p: Vector3::new(0.95, 0.95, 1.0),
            velocity: VelocityGains::default(),
        }
    }
}

/// Saturation limits of the cascade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlLimits {
    /// Maximum horizontal speed [m/s]
    pub velocity_horizontal: f64,
    /// Maximum climb rate [m/s]
    pub velocity_up: f64,
    /// Maximum descent rate [m/s]
    pub velocity_down: f64,
    /// Minimum collective thrust, normalized
    pub thrust_min: f64,
    /// Maximum collective thrust, normalized
    pub thrust_max: f64,
    /// Maximum tilt of the thrust axis from vertical [rad]
    pub tilt: f64,
    /// Normalized thrust that balances gravity
    pub hover_thrust: f64,
}

impl Default for ControlLimits {
    fn default() -> Self {
        Self {
            velocity_horizontal: 12.0,
            velocity_up: 3.0,
            velocity_down: 1.0,
            thrust_min: 0.12,
            thrust_max: 0.9,
            tilt: std::f64::consts::FRAC_PI_4,
            hover_thrust: 0.5,
        }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    pub gains: ControlGains,
    pub limits: ControlLimits,
    /// Cutoff of the low-pass filter on the velocity derivative [Hz]
    pub derivative_cutoff_hz: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            gains: ControlGains::default(),
            limits: ControlLimits::default(),
            derivative_cutoff_hz: 5.0,
        }
    }
}

impl ControlConfig {
    /// Check that every gain and limit is usable by the cascade.
    pub fn validate(&self) -> Result<(), ControlError> {
        let gains = [
            ("position_p", self.gains.position_p),
            ("velocity.p", self.gains.velocity.p),
            ("velocity.i", self.gains.velocity.i),
            ("velocity.d", self.gains.velocity.d),
        ];
        for (name, gain) in gains {
            if let Some(&value) = gain.iter().find(|g| !g.is_finite() || **g < 0.0) {
                return Err(ControlError::InvalidParameter { name, value });
            }
        }

        let l = &self.limits;
        positive("velocity_horizontal", l.velocity_horizontal)?;
        positive("velocity_up", l.velocity_up)?;
        positive("velocity_down", l.velocity_down)?;
        positive("thrust_min", l.thrust_min)?;
        positive("derivative_cutoff_hz", self.derivative_cutoff_hz)?;

        if !(l.thrust_max > l.thrust_min && l.thrust_max <= 1.0) {
            return Err(ControlError::InvalidParameter {
                name: "thrust_max",
                value: l.thrust_max,
            });
        }
        if !(l.tilt > 0.0 && l.tilt <= MAX_TILT) {
            return Err(ControlError::InvalidParameter {
                name: "tilt",
                value: l.tilt,
            });
        }
        if !(l.hover_thrust > 0.0 && l.hover_thrust < 1.0) {
            return Err(ControlError::InvalidParameter {
                name: "hover_thrust",
                value: l.hover_thrust,
            });
        }

        Ok(())
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ControlError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ControlError::InvalidParameter { name, value })
    }
}
