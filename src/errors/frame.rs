use thiserror::Error;

use super::{FrameFormatKind, FrameSizeKind};

/// A frame that was received but could not be trusted: wrong length, bad
/// checksum, or malformed framing. The server clears its input buffer and
/// moves on; the master raises this to its caller.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame size error: {kind} - {details}")]
    Size {
        kind: FrameSizeKind,
        details: String,
        frame_data: Option<Vec<u8>>,
    },

    #[error("frame format error: {kind} - {details}")]
    Format {
        kind: FrameFormatKind,
        details: String,
        frame_data: Option<Vec<u8>>,
    },

    #[error("CRC error: calculated={calculated:04X}, received={received:04X}, frame={frame_hex}")]
    Crc {
        calculated: u16,
        received: u16,
        frame_hex: String,
    },

    #[error("LRC error: calculated={calculated:02X}, received={received:02X}, frame={frame_hex}")]
    Lrc {
        calculated: u8,
        received: u8,
        frame_hex: String,
    },
}

impl FrameError {
    pub fn too_short(details: impl Into<String>, frame_data: impl Into<Option<Vec<u8>>>) -> Self {
        FrameError::Size {
            kind: FrameSizeKind::TooShort,
            details: details.into(),
            frame_data: frame_data.into(),
        }
    }

    pub fn too_long(details: impl Into<String>) -> Self {
        FrameError::Size {
            kind: FrameSizeKind::TooLong,
            details: details.into(),
            frame_data: None,
        }
    }

    pub fn invalid_format(details: impl Into<String>) -> Self {
        FrameError::Format {
            kind: FrameFormatKind::InvalidFormat,
            details: details.into(),
            frame_data: None,
        }
    }

    pub fn unexpected_response(details: impl Into<String>) -> Self {
        FrameError::Format {
            kind: FrameFormatKind::UnexpectedResponse,
            details: details.into(),
            frame_data: None,
        }
    }
}
