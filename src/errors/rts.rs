use thiserror::Error;

/// Failures from the RS-485 direction-control hook (§4.2.1).
#[derive(Error, Debug)]
pub enum RtsError {
    #[error("failed to set line direction: {0}")]
    SignalError(String),

    #[error("line direction control system error: {0}")]
    SystemError(#[from] std::io::Error),
}

impl RtsError {
    pub fn signal(details: impl Into<String>) -> Self {
        RtsError::SignalError(details.into())
    }
}
