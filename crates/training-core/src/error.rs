use thiserror::Error;

/// Failure taxonomy for the training core. Each kind carries a fixed
/// propagation policy (see the worker loop):
///
/// - `InsufficientData` fails the job fast, no retry.
/// - `InvalidRequest` is rejected at submission and never enqueued.
/// - `TrialError` is swallowed for the one trial and recorded invalid.
/// - `SystemError` fails the job (or the orphan sweep catches it).
#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Trial failed: {0}")]
    TrialError(String),

    #[error("System error: {0}")]
    SystemError(String),
}

impl TrainError {
    /// Wrap any displayable error as a system failure.
    pub fn system<E: std::fmt::Display>(err: E) -> Self {
        TrainError::SystemError(err.to_string())
    }
}
