use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};

use crate::codec::crc16;
use crate::config::RtuConfig;
use crate::errors::{FrameError, IoOperation, SerialErrorKind, TransportError};
use crate::frame::{BuiltFrame, FrameContext, ParsedFrame};

use super::{LineDirection, NoDirectionControl, Transport};

/// Binary RTU framer: `addr | fc | data | crc_lo | crc_hi`, with a 3.5
/// character idle gap enforced between frames on the same line.
pub struct RtuTransport {
    port: Box<dyn SerialPort>,
    direction: Box<dyn LineDirection>,
    max_frame_size: usize,
    inter_frame_gap: Duration,
    rts_delay: Duration,
    flush_after_write: bool,
    next_send_at: Instant,
    device: String,
}

impl RtuTransport {
    pub fn open(config: &RtuConfig) -> Result<Self, TransportError> {
        Self::with_direction(config, Box::new(NoDirectionControl))
    }

    pub fn with_direction(
        config: &RtuConfig,
        direction: Box<dyn LineDirection>,
    ) -> Result<Self, TransportError> {
        let poll_interval = Duration::from_millis(10);
        let port = serialport::new(&config.device, config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(poll_interval)
            .open()
            .map_err(|e| TransportError::Serial {
                kind: SerialErrorKind::OpenFailed,
                port: config.device.clone(),
                details: e.to_string(),
                source: Some(e),
            })?;

        let char_time = Duration::from_secs_f64(config.char_time_secs());
        let inter_frame_gap = if config.baud_rate > 19_200 {
            Duration::from_micros(1750)
        } else {
            char_time.mul_f64(3.5)
        };

        Ok(Self {
            port,
            direction,
            max_frame_size: config.max_frame_size,
            inter_frame_gap,
            rts_delay: Duration::from_micros(config.rts_delay_us),
            flush_after_write: config.flush_after_write,
            next_send_at: Instant::now(),
            device: config.device.clone(),
        })
    }

    fn io_err(&self, operation: IoOperation, err: io::Error) -> TransportError {
        TransportError::Io {
            operation,
            details: format!("{}: {}", self.device, err),
            source: err,
        }
    }
}

impl Transport for RtuTransport {
    fn max_adu_len(&self) -> usize {
        self.max_frame_size
    }

    fn prepare_read(&mut self) -> Result<(), TransportError> {
        self.direction.set_write(false)
    }

    fn prepare_write(&mut self) -> Result<(), TransportError> {
        let now = Instant::now();
        if now < self.next_send_at {
            std::thread::sleep(self.next_send_at - now);
        }
        Ok(())
    }

    fn data_available(&self) -> bool {
        self.port.bytes_to_read().unwrap_or(0) > 0
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
        _desired_pdu_data_len: Option<u16>,
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut len = 0usize;
        let mut last_byte_at: Option<Instant> = None;

        loop {
            if Instant::now() >= deadline {
                return if len > 0 {
                    Ok(len)
                } else {
                    Err(TransportError::Timeout { elapsed: timeout })
                };
            }
            match self.port.read(&mut buf[len..]) {
                Ok(0) => {}
                Ok(n) => {
                    len += n;
                    last_byte_at = Some(Instant::now());
                    if len >= buf.len() {
                        return Ok(len);
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(self.io_err(IoOperation::Read, e)),
            }

            if let Some(t) = last_byte_at {
                if t.elapsed() >= self.inter_frame_gap {
                    return Ok(len);
                }
            }
        }
    }

    fn parse(
        &mut self,
        buf: &mut [u8],
        len: usize,
        _is_response: bool,
        _ctx: &mut FrameContext,
    ) -> Result<ParsedFrame, TransportError> {
        verify_frame(&buf[..len])
    }

    fn build(
        &mut self,
        addr: u8,
        fc: u8,
        _data_len: usize,
        buf: &mut [u8],
        _is_response: bool,
        _ctx: &mut FrameContext,
    ) -> Result<BuiltFrame, TransportError> {
        buf[0] = addr;
        buf[1] = fc;
        Ok(BuiltFrame { data_pos: 2 })
    }

    fn send(&mut self, buf: &mut [u8], frame_len: usize) -> Result<(), TransportError> {
        let crc = crc16(&buf[..frame_len]);
        buf[frame_len] = (crc & 0xFF) as u8;
        buf[frame_len + 1] = (crc >> 8) as u8;
        let total = frame_len + 2;

        self.direction.set_write(true)?;
        if !self.rts_delay.is_zero() {
            std::thread::sleep(self.rts_delay);
        }

        let result = (|| -> Result<(), TransportError> {
            self.port
                .write_all(&buf[..total])
                .map_err(|e| self.io_err(IoOperation::Write, e))?;
            if self.flush_after_write {
                self.port
                    .flush()
                    .map_err(|e| self.io_err(IoOperation::Flush, e))?;
            }
            Ok(())
        })();

        if !self.rts_delay.is_zero() {
            std::thread::sleep(self.rts_delay);
        }
        self.direction.set_write(false)?;

        self.next_send_at = Instant::now() + self.inter_frame_gap;
        result
    }

    fn clear_input(&mut self) {
        let _ = self.port.clear(ClearBuffer::Input);
    }

    fn is_connected(&self) -> bool {
        self.port.bytes_to_read().is_ok()
    }
}

/// Checksum-verifies a raw RTU frame and slices out its address/function
/// code/data. Pulled out of `Transport::parse` so it's testable without a
/// live serial port.
fn verify_frame(frame: &[u8]) -> Result<ParsedFrame, TransportError> {
    if frame.len() < 4 {
        return Err(FrameError::too_short("RTU frame shorter than addr+fc+crc", frame.to_vec()).into());
    }
    let len = frame.len();
    // CRC is transmitted low byte first, unlike every other field.
    let received = u16::from_le_bytes([frame[len - 2], frame[len - 1]]);
    let calculated = crc16(&frame[..len - 2]);
    if received != calculated {
        return Err(FrameError::Crc {
            calculated,
            received,
            frame_hex: hex::encode(frame),
        }
        .into());
    }
    Ok(ParsedFrame {
        addr: frame[0],
        fc: frame[1],
        data_pos: 2,
        data_len: len - 4,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(addr: u8, fc: u8, data: &[u8]) -> Vec<u8> {
        let mut frame = vec![addr, fc];
        frame.extend_from_slice(data);
        let crc = crc16(&frame);
        frame.push((crc & 0xFF) as u8);
        frame.push((crc >> 8) as u8);
        frame
    }

    #[test]
    fn round_trips_a_well_formed_frame() {
        let frame = framed(0x11, 0x03, &[0x00, 0x6B, 0x00, 0x03]);
        let parsed = verify_frame(&frame).unwrap();
        assert_eq!(parsed.addr, 0x11);
        assert_eq!(parsed.fc, 0x03);
        assert_eq!(&frame[parsed.data_pos..parsed.data_pos + parsed.data_len], &[0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn rejects_single_bit_flip_in_payload() {
        let mut frame = framed(0x11, 0x03, &[0x00, 0x6B, 0x00, 0x03]);
        frame[2] ^= 0x01;
        let err = verify_frame(&frame).unwrap_err();
        assert!(matches!(err, TransportError::Frame(FrameError::Crc { .. })));
    }

    #[test]
    fn rejects_frame_shorter_than_addr_fc_crc() {
        let err = verify_frame(&[0x11, 0x03, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::Size { kind: crate::errors::FrameSizeKind::TooShort, .. })
        ));
    }
}
