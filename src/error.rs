use thiserror::Error;

/// Errors reported by a control cycle or by configuration validation.
///
/// None of these abort a cycle: the cascade falls back to a deterministic
/// value and still produces a well-formed output. The error only tells the
/// caller that the cycle was degraded.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ControlError {
    #[error("Invalid timestep: {0} s")]
    InvalidTimestep(f64),
    #[error("Non-finite setpoint value in {field}")]
    NonFiniteSetpoint { field: &'static str },
    #[error("Horizontal {field} setpoint must specify x and y together")]
    UnpairedHorizontalSetpoint { field: &'static str },
    #[error("Non-finite {field} state on a controlled axis")]
    NonFiniteState { field: &'static str },
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}
