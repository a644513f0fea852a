//! Thrust vector to attitude mapping
//!
//! The cascade expresses all horizontal control through tilt: the desired
//! thrust vector fixes the body z-axis, the desired heading fixes the rotation
//! about it, and the body frame thrust is purely axial.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use crate::setpoint::AttitudeSetpoint;

/// Largest tilt the cascade will ever command (89 deg) [rad]
pub const MAX_TILT: f64 = 1.553_343_034_274_953;

/// Result of mapping a thrust vector to an attitude
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrustAttitude {
    pub setpoint: AttitudeSetpoint,
    /// Thrust vector in the local frame after tilt limiting
    pub thrust: Vector3<f64>,
    /// The requested direction was outside the tilt cone
    pub tilt_limited: bool,
}

/// Rotate a unit body z-axis back onto the cone of half-angle `max_angle`
/// around world down, keeping its horizontal bearing.
///
/// Returns the limited axis and whether limiting was applied. An axis exactly
/// anti-parallel to world down has no bearing and is tilted towards +x.
pub fn limit_tilt(body_z: &Vector3<f64>, max_angle: f64) -> (Vector3<f64>, bool) {
    let world_z = Vector3::z();
    let dot = body_z.dot(&world_z).clamp(-1.0, 1.0);

    if dot.acos() <= max_angle {
        return (*body_z, false);
    }

    let mut rejection = body_z - dot * world_z;
    if rejection.norm_squared() < f64::EPSILON {
        rejection = Vector3::x();
    }

    let limited = max_angle.cos() * world_z + max_angle.sin() * rejection.normalize();
    (limited, true)
}

/// Orientation whose body z-axis is `body_z` (unit, local frame) and whose
/// nose points along `yaw` as closely as the tilt allows.
pub fn body_z_to_attitude(body_z: &Vector3<f64>, yaw: f64) -> UnitQuaternion<f64> {
    // desired heading rotated by 90 deg in the horizontal plane
    let y_c = Vector3::new(-yaw.sin(), yaw.cos(), 0.0);
    let mut body_x = y_c.cross(body_z);

    // keep the nose forward while inverted
    if body_z.z < 0.0 {
        body_x = -body_x;
    }

    // thrust in the horizontal plane: heading is undefined
    if body_z.z.abs() < 1e-6 {
        body_x = Vector3::z();
    }

    let body_x = body_x.normalize();
    let body_y = body_z.cross(&body_x);

    let rotation =
        Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[body_x, body_y, *body_z]));
    UnitQuaternion::from_rotation_matrix(&rotation)
}

/// Build the attitude setpoint for a local frame thrust vector.
///
/// A zero thrust vector carries no direction and yields the level identity
/// attitude with zero thrust.
pub fn thrust_to_attitude(thrust: &Vector3<f64>, yaw: f64, max_tilt: f64) -> ThrustAttitude {
    let magnitude = thrust.norm();

    if magnitude < f64::EPSILON {
        return ThrustAttitude {
            setpoint: AttitudeSetpoint::default(),
            thrust: Vector3::zeros(),
            tilt_limited: false,
        };
    }

    let (body_z, tilt_limited) = limit_tilt(&(-thrust / magnitude), max_tilt);
    let q_d = body_z_to_attitude(&body_z, yaw);
    let (roll_body, pitch_body, yaw_body) = q_d.euler_angles();

    ThrustAttitude {
        setpoint: AttitudeSetpoint {
            roll_body,
            pitch_body,
            yaw_body,
            q_d,
            thrust_body: Vector3::new(0.0, 0.0, -magnitude),
            ..AttitudeSetpoint::default()
        },
        thrust: -body_z * magnitude,
        tilt_limited,
    }
}

/// Angle between the body z-axis of `q` and world down [rad]
pub fn tilt_angle(q: &UnitQuaternion<f64>) -> f64 {
    let body_z = q * Vector3::z();
    body_z.z.clamp(-1.0, 1.0).acos()
}
