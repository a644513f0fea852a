use nalgebra::Vector3;
use uav_poscontrol::dynamics::{simulate_point_mass, PointMassState};
use uav_poscontrol::{InputSetpoint, PositionControl};

// Horizontal estimate lost mid-flight: the vehicle levels out and descends
fn main() {
    let mut state = PointMassState {
        position: Vector3::new(0.0, 0.0, -15.0),
        velocity: Vector3::zeros(),
    };

    let hover_thrust = 0.5;
    let dt = 1. / 50.;
    let mut current_time = 0.0;

    let mut controller = PositionControl::new();

    let cruise = InputSetpoint::default().with_velocity(Vector3::new(2.0, 0.0, 0.0));
    let mut descent = InputSetpoint::default();
    descent.z.velocity = Some(0.7);

    while state.position.z < -0.5 && current_time < 60.0 {
        let setpoint = if current_time < 5.0 { cruise } else { descent };
        controller.set_input_setpoint(setpoint);
        controller.set_state(state.to_vehicle_state(0.0));
        controller.update(dt);

        let thrust = controller.local_position_setpoint().thrust;

        if (current_time / dt).round() as usize % 25 == 0 {
            println!(
                "t={:5.2} failsafe={} pos=({:6.3}, {:6.3}, {:6.3}) vel=({:6.3}, {:6.3}, {:6.3}) thrust=({:.3}, {:.3}, {:.3})",
                current_time,
                controller.is_failsafe_active(),
                state.position.x,
                state.position.y,
                state.position.z,
                state.velocity.x,
                state.velocity.y,
                state.velocity.z,
                thrust.x,
                thrust.y,
                thrust.z,
            );
        }

        state = match simulate_point_mass(
            state,
            hover_thrust,
            thrust,
            Vector3::zeros(),
            (current_time, current_time + dt),
            1e-6,
        ) {
            Ok(state) => state,
            Err(e) => {
                println!("Simulation failed: {}", e);
                return;
            }
        };

        current_time += dt;
    }

    println!("Touched down after {:.2} s at {:?}", current_time, state.position);
}
