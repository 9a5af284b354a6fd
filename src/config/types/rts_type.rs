use serde::{Deserialize, Serialize};

/// RS-485 direction-control polarity for the RTU framer's DE/RE pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtsType {
    /// RTS disabled; the framer never touches the line (full-duplex media).
    None,
    /// RTS = High during transmission.
    Up,
    /// RTS = Low during transmission.
    Down,
}

impl RtsType {
    /// The signal level to drive RTS to while `is_transmitting`.
    pub fn to_signal_level(&self, is_transmitting: bool) -> bool {
        match self {
            RtsType::None => false,
            RtsType::Up => is_transmitting,
            RtsType::Down => !is_transmitting,
        }
    }
}

impl Default for RtsType {
    fn default() -> Self {
        Self::Down
    }
}

impl std::fmt::Display for RtsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtsType::None => write!(f, "none"),
            RtsType::Up => write!(f, "up"),
            RtsType::Down => write!(f, "down"),
        }
    }
}
