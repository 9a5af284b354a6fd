use thiserror::Error;

use super::{ClientErrorKind, ConfigValidationError, FrameError, ProtocolErrorKind, TransportError};

/// Top-level error type for both the server and master roles.
#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    /// A unicast request could not be served; carries the exception code
    /// the server would send back (or did send, on the master side after
    /// decoding an exception response).
    #[error("modbus exception: {0}")]
    Exception(ProtocolErrorKind),

    #[error("client error: {kind} - {details}")]
    Client {
        kind: ClientErrorKind,
        details: String,
    },
}

impl ModbusError {
    pub fn client(kind: ClientErrorKind, details: impl Into<String>) -> Self {
        ModbusError::Client {
            kind,
            details: details.into(),
        }
    }
}
