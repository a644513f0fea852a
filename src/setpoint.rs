//! Setpoint types
//!
//! Every scalar of an input setpoint is an `Option<f64>`: `None` means
//! "derive this value from the next level of the cascade", `Some` means the
//! value is authoritative for that axis and is added on top of whatever the
//! higher level computed (see [`add_if_specified`]).

use nalgebra::{UnitQuaternion, Vector3};

/// Per-axis values with an optional specification
pub type OptVector3 = [Option<f64>; 3];

/// Add `add` to `v` following the cascade's merge rule.
///
/// - `add` unspecified: `v` is unchanged
/// - `v` unspecified: `v` takes `add`
/// - both specified: `v` becomes the sum
///
/// This lets an explicit velocity, acceleration or thrust act as a
/// feedforward on top of the value computed by the loop above it.
pub fn add_if_specified(v: &mut Option<f64>, add: Option<f64>) {
    if let Some(add) = add {
        *v = Some(v.map_or(add, |v| v + add));
    }
}

/// Element-wise [`add_if_specified`]
pub fn add_if_specified3(v: &mut OptVector3, add: &OptVector3) {
    for (v, add) in v.iter_mut().zip(add) {
        add_if_specified(v, *add);
    }
}

/// Resolve unspecified axes to zero.
pub fn zero_if_unspecified(v: &OptVector3) -> Vector3<f64> {
    Vector3::new(
        v[0].unwrap_or(0.0),
        v[1].unwrap_or(0.0),
        v[2].unwrap_or(0.0),
    )
}

/// Control modes requested for one axis.
///
/// Any combination may be specified at once; the specified values are summed
/// through the cascade rather than one replacing another.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisSetpoint {
    /// Position [m]
    pub position: Option<f64>,
    /// Velocity [m/s]
    pub velocity: Option<f64>,
    /// Acceleration [m/s²]
    pub acceleration: Option<f64>,
    /// Normalized thrust
    pub thrust: Option<f64>,
}

/// Motion command for one control cycle.
///
/// The default value leaves every field unspecified.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputSetpoint {
    pub x: AxisSetpoint,
    pub y: AxisSetpoint,
    pub z: AxisSetpoint,
    /// Heading [rad]
    pub yaw: Option<f64>,
    /// Heading rate [rad/s]
    pub yawspeed: Option<f64>,
}

impl InputSetpoint {
    pub fn position(&self) -> OptVector3 {
        [self.x.position, self.y.position, self.z.position]
    }

    pub fn velocity(&self) -> OptVector3 {
        [self.x.velocity, self.y.velocity, self.z.velocity]
    }

    pub fn acceleration(&self) -> OptVector3 {
        [self.x.acceleration, self.y.acceleration, self.z.acceleration]
    }

    pub fn thrust(&self) -> OptVector3 {
        [self.x.thrust, self.y.thrust, self.z.thrust]
    }

    /// Command a position on all three axes.
    pub fn with_position(mut self, position: Vector3<f64>) -> Self {
        self.x.position = Some(position.x);
        self.y.position = Some(position.y);
        self.z.position = Some(position.z);
        self
    }

    /// Command a velocity on all three axes.
    pub fn with_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.x.velocity = Some(velocity.x);
        self.y.velocity = Some(velocity.y);
        self.z.velocity = Some(velocity.z);
        self
    }

    /// Command an acceleration on all three axes.
    pub fn with_acceleration(mut self, acceleration: Vector3<f64>) -> Self {
        self.x.acceleration = Some(acceleration.x);
        self.y.acceleration = Some(acceleration.y);
        self.z.acceleration = Some(acceleration.z);
        self
    }

    pub(crate) fn axes_mut(&mut self) -> [&mut AxisSetpoint; 3] {
        [&mut self.x, &mut self.y, &mut self.z]
    }
}

/// Per-cycle override of the configured limits
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Constraints {
    /// Tilt limit for this cycle [rad]; only ever tightens the configured one
    pub tilt: Option<f64>,
}

/// Setpoints actually acted upon in the last cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPositionSetpoint {
    /// Position [m]; `None` on axes not under position control
    pub position: OptVector3,
    /// Velocity after limiting [m/s]
    pub velocity: OptVector3,
    /// Acceleration [m/s²]
    pub acceleration: OptVector3,
    /// Normalized thrust in the local frame after all limits
    pub thrust: Vector3<f64>,
    pub yaw: f64,
    pub yawspeed: f64,
}

impl Default for LocalPositionSetpoint {
    fn default() -> Self {
        Self {
            position: [Some(0.0); 3],
            velocity: [Some(0.0); 3],
            acceleration: [Some(0.0); 3],
            thrust: Vector3::zeros(),
            yaw: 0.0,
            yawspeed: 0.0,
        }
    }
}

/// Command for the attitude-rate controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeSetpoint {
    /// Euler angles of `q_d` [rad], informational only
    pub roll_body: f64,
    pub pitch_body: f64,
    pub yaw_body: f64,
    /// Desired orientation, body to local frame
    pub q_d: UnitQuaternion<f64>,
    /// Normalized thrust in the body frame; x and y are always zero
    pub thrust_body: Vector3<f64>,
    /// Feedforward yaw rate [rad/s]
    pub yaw_sp_move_rate: f64,
    pub roll_reset_integral: bool,
    pub pitch_reset_integral: bool,
    pub yaw_reset_integral: bool,
}

impl Default for AttitudeSetpoint {
    fn default() -> Self {
        Self {
            roll_body: 0.0,
            pitch_body: 0.0,
            yaw_body: 0.0,
            q_d: UnitQuaternion::identity(),
            thrust_body: Vector3::zeros(),
            yaw_sp_move_rate: 0.0,
            roll_reset_integral: false,
            pitch_reset_integral: false,
            yaw_reset_integral: false,
        }
    }
}
