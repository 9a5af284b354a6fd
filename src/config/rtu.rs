use serde::{Deserialize, Serialize};

use crate::config::types::{DataBits, Parity, RtsType, StopBits};

/// Serial line and framing parameters for the RTU transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,

    /// RS-485 direction-control polarity; `RtsType::None` for full-duplex media.
    pub rts_type: RtsType,
    /// Delay after asserting/deasserting RTS, before/after the write.
    pub rts_delay_us: u64,

    /// Whether to flush the serial port after writing.
    pub flush_after_write: bool,

    /// Largest ADU this transport will build or accept.
    pub max_frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 19200,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            rts_type: RtsType::default(),
            rts_delay_us: 3500,
            flush_after_write: true,
            max_frame_size: 256,
        }
    }
}

impl Config {
    pub fn serial_port_info(&self) -> String {
        format!(
            "{} ({} baud, {} data bits, {} parity, {} stop bits)",
            self.device, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }

    /// Seconds-per-character at this line's baud/framing, used to derive the
    /// 3.5-character inter-frame gap (§4.2.1).
    pub fn char_time_secs(&self) -> f64 {
        let parity_bit = if self.parity == Parity::None { 0 } else { 1 };
        let stop_bits = match self.stop_bits {
            crate::config::types::StopBits::One => 1,
            crate::config::types::StopBits::Two => 2,
        };
        let bits_per_char = 1 + self.data_bits.get() as u32 + parity_bit + stop_bits;
        bits_per_char as f64 / self.baud_rate as f64
    }
}
