use thiserror::Error;

#[derive(Debug, Error)]
pub enum HpwhError {
    #[error("Invalid timestep of {minutes} minutes: {reason}")]
    InvalidTimestep { minutes: f64, reason: String },
    #[error("Draw of {requested_litres} L is not possible from a tank of {capacity_litres} L")]
    Volume {
        requested_litres: f64,
        capacity_litres: f64,
    },
    #[error("Standard test is invalid: {0}")]
    TestInvalid(String),
    #[error("Calibration did not converge: {0}")]
    Convergence(String),
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("Requested position is outside the tank: {0}")]
    OutOfBounds(String),
    #[error("Error identified during simulation: {0}")]
    FailureInSimulation(#[from] anyhow::Error),
}

impl HpwhError {
    pub(crate) fn invalid_timestep(minutes: f64, reason: &str) -> Self {
        Self::InvalidTimestep {
            minutes,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel(message.into())
    }

    pub(crate) fn test_invalid(message: impl Into<String>) -> Self {
        Self::TestInvalid(message.into())
    }
}
