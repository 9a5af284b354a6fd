use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bind address and socket tuning for the TCP framer's listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,

    /// TCP keepalive interval applied via `socket2` to each accepted stream.
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,

    /// MBAP unit id treated as "accept regardless of unit id" (§4.2.3).
    pub any_unit_id: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 502,
            keep_alive: Duration::from_secs(60),
            any_unit_id: 248,
        }
    }
}
