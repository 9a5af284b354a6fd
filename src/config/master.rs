use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts for the client-side correlator (component G).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Bound on `send_receive` for ordinary function codes.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Bound on a single device-identification page read; longer because a
    /// "more follows" exchange needs several round trips.
    #[serde(with = "humantime_serde")]
    pub device_id_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(2),
            device_id_timeout: Duration::from_secs(4),
        }
    }
}
