use thiserror::Error;

use super::{FrameError, IoOperation, RtsError, SerialErrorKind};

/// Wire-level failures raised by a `Transport` implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("serial port error: {kind} on {port} - {details}")]
    Serial {
        kind: SerialErrorKind,
        port: String,
        details: String,
        #[source]
        source: Option<serialport::Error>,
    },

    #[error("I/O error during {operation}: {details}")]
    Io {
        operation: IoOperation,
        details: String,
        #[source]
        source: std::io::Error,
    },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("receive timed out after {elapsed:?}")]
    Timeout { elapsed: std::time::Duration },

    #[error("transport is not connected")]
    NotConnected,

    #[error("line direction control error: {0}")]
    Rts(#[from] RtsError),
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::NoDevice => TransportError::Serial {
                kind: SerialErrorKind::OpenFailed,
                port: err.to_string(),
                details: "device not found".into(),
                source: Some(err),
            },
            serialport::ErrorKind::InvalidInput => TransportError::Serial {
                kind: SerialErrorKind::ConfigurationFailed,
                port: err.to_string(),
                details: "invalid configuration".into(),
                source: Some(err),
            },
            _ => TransportError::Serial {
                kind: SerialErrorKind::OpenFailed,
                port: err.to_string(),
                details: err.to_string(),
                source: Some(err),
            },
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            operation: match err.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => IoOperation::Read,
                std::io::ErrorKind::WriteZero => IoOperation::Write,
                _ => IoOperation::Control,
            },
            details: err.to_string(),
            source: err,
        }
    }
}
