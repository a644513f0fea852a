use nalgebra::Vector3;

use crate::control::VehicleState;
use crate::GRAVITY;

/// Translational state of a multicopter in the local NED frame.
///
/// The attitude is not part of the state: the plant assumes the attitude-rate
/// controller tracks the commanded attitude perfectly, so the commanded thrust
/// vector acts on the vehicle directly.
///
/// # Fields
///
/// * `position` - Position in the local frame (m, z down)
/// * `velocity` - Velocity in the local frame (m/s, z down)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointMassState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl PointMassState {
    /// Converts the state to the array layout used by the integrator:
    /// [pos_x, pos_y, pos_z, vel_x, vel_y, vel_z]
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.velocity.x,
            self.velocity.y,
            self.velocity.z,
        ]
    }

    /// Creates a state from the layout of [`to_array`](Self::to_array).
    pub fn from_array(arr: &[f64; 6]) -> Self {
        PointMassState {
            position: Vector3::new(arr[0], arr[1], arr[2]),
            velocity: Vector3::new(arr[3], arr[4], arr[5]),
        }
    }

    /// State estimate handed to the controller, with a perfect estimator.
    pub fn to_vehicle_state(&self, yaw: f64) -> VehicleState {
        VehicleState {
            position: self.position,
            velocity: self.velocity,
            yaw,
        }
    }
}

/// Point-mass dynamics driven by normalized thrust.
///
/// The vehicle's true hover thrust may differ from the one the controller is
/// configured with, which models an unknown payload or battery sag.
///
/// # Fields
///
/// * `hover_thrust` - Normalized thrust that balances gravity on this vehicle
/// * `thrust` - Applied normalized thrust in the local frame
/// * `disturbance` - Additional acceleration acting on the vehicle (m/s²)
pub struct PointMassOde {
    pub hover_thrust: f64,
    pub thrust: Vector3<f64>,
    pub disturbance: Vector3<f64>,
}

impl fast_ode::DifferentialEquation<6> for PointMassOde {
    /// Computes the time derivatives of the state vector.
    ///
    /// ṗ = v
    /// v̇ = thrust · g / hover_thrust + (0, 0, g) + disturbance
    fn ode_dot_y(&self, _t: f64, y: &fast_ode::Coord<6>) -> (fast_ode::Coord<6>, bool) {
        let state = y.0;

        let acceleration = self.thrust * (GRAVITY / self.hover_thrust)
            + Vector3::new(0.0, 0.0, GRAVITY)
            + self.disturbance;

        let dot_y = [
            state[3],
            state[4],
            state[5],
            acceleration.x,
            acceleration.y,
            acceleration.z,
        ];

        (fast_ode::Coord(dot_y), true)
    }
}

/// Integrates the point-mass dynamics over a time interval with constant
/// thrust.
///
/// # Arguments
///
/// * `initial_state` - State at the start of the interval
/// * `hover_thrust` - True hover thrust of the simulated vehicle
/// * `thrust` - Normalized thrust in the local frame, held over the interval
/// * `disturbance` - External acceleration (m/s²)
/// * `time_span` - (start, end) time in seconds
/// * `tolerance` - Relative tolerance of the integrator
///
/// # Returns
///
/// The state at the end of the interval, or an error if integration failed
pub fn simulate_point_mass(
    initial_state: PointMassState,
    hover_thrust: f64,
    thrust: Vector3<f64>,
    disturbance: Vector3<f64>,
    time_span: (f64, f64),
    tolerance: f64,
) -> Result<PointMassState, &'static str> {
    let ode = PointMassOde {
        hover_thrust,
        thrust,
        disturbance,
    };

    let initial_coord = fast_ode::Coord(initial_state.to_array());

    let result = fast_ode::solve_ivp(
        &ode,
        time_span,
        initial_coord,
        |_, _| true,
        tolerance,
        tolerance * 10.0,
    );

    match result {
        fast_ode::IvpResult::FinalTimeReached(final_coord) => {
            Ok(PointMassState::from_array(&final_coord.0))
        }
        _ => Err("Integration failed"),
    }
}
