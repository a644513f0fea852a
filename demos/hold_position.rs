use nalgebra::Vector3;
use uav_poscontrol::dynamics::{simulate_point_mass, PointMassState};
use uav_poscontrol::{ControlConfig, InputSetpoint, PositionControl};

// Take off and hold a position on a vehicle heavier than the controller assumes
fn main() {
    let mut state = PointMassState::default();

    // true hover thrust of the simulated vehicle
    let hover_thrust = 0.58;
    let wind = Vector3::new(0.3, -0.2, 0.0);

    let simulation_span = 30.0;
    let dt = 1. / 100.;
    let mut current_time = 0.0;

    let mut controller = match PositionControl::from_config(&ControlConfig::default()) {
        Ok(controller) => controller,
        Err(e) => {
            println!("Invalid configuration: {}", e);
            return;
        }
    };

    let target = Vector3::new(4.0, -3.0, -8.0);
    let mut setpoint = InputSetpoint::default().with_position(target);
    setpoint.yaw = Some(0.5);
    controller.set_input_setpoint(setpoint);

    let mut yaw = 0.0;
    let mut step = 0;
    while current_time < simulation_span {
        controller.set_state(state.to_vehicle_state(yaw));
        controller.update(dt);

        let thrust = controller.local_position_setpoint().thrust;
        let attitude = controller.attitude_setpoint();
        yaw = attitude.yaw_body;

        if step % 100 == 0 {
            println!(
                "t={:5.2} pos=({:6.3}, {:6.3}, {:6.3}) vel=({:6.3}, {:6.3}, {:6.3}) thrust={:.3} rpy=({:.3}, {:.3}, {:.3})",
                current_time,
                state.position.x,
                state.position.y,
                state.position.z,
                state.velocity.x,
                state.velocity.y,
                state.velocity.z,
                -attitude.thrust_body.z,
                attitude.roll_body,
                attitude.pitch_body,
                attitude.yaw_body,
            );
        }

        state = match simulate_point_mass(
            state,
            hover_thrust,
            thrust,
            wind,
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
        step += 1;
    }

    println!("Final position error: {:.4}", (state.position - target).norm());
    println!("Velocity integral: {:?}", controller.velocity_integral());
}
