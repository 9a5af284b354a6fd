use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};

use crate::codec::{byte_to_hex, hex_to_byte, lrc};
use crate::config::AsciiConfig;
use crate::errors::{FrameError, IoOperation, SerialErrorKind, TransportError};
use crate::frame::{BuiltFrame, FrameContext, ParsedFrame};

use super::Transport;

const START: u8 = b':';
const CR: u8 = 0x0D;
const LF: u8 = 0x0A;

/// Hex-encoded ASCII framer: `':' hex(addr) hex(fc) hex(data) hex(lrc) CR LF`.
///
/// The inter-character idle timeout is fixed at 1 second regardless of baud
/// rate; the source's multiplier becomes unreasonable at high baud rates
/// (see the open question recorded in DESIGN.md).
pub struct AsciiTransport {
    port: Box<dyn SerialPort>,
    max_frame_size: usize,
    device: String,
}

const IDLE_TIMEOUT: Duration = Duration::from_secs(1);

impl AsciiTransport {
    pub fn open(config: &AsciiConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&config.device, config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| TransportError::Serial {
                kind: SerialErrorKind::OpenFailed,
                port: config.device.clone(),
                details: e.to_string(),
                source: Some(e),
            })?;

        Ok(Self {
            port,
            // ':' + 2 hex chars per raw byte + CR LF, for a 256-byte raw ADU.
            max_frame_size: 1 + 256 * 2 + 2,
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

impl Transport for AsciiTransport {
    fn max_adu_len(&self) -> usize {
        self.max_frame_size
    }

    fn prepare_read(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn prepare_write(&mut self) -> Result<(), TransportError> {
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
                return Err(TransportError::Timeout { elapsed: timeout });
            }
            match self.port.read(&mut buf[len..len + 1]) {
                Ok(0) => {}
                Ok(_) => {
                    len += 1;
                    last_byte_at = Some(Instant::now());
                    if len >= 3 && buf[0] == START && buf[len - 2] == CR && buf[len - 1] == LF {
                        return Ok(len);
                    }
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
                if t.elapsed() >= IDLE_TIMEOUT {
                    return Err(FrameError::too_short(
                        "ASCII frame incomplete at idle timeout",
                        buf[..len].to_vec(),
                    )
                    .into());
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
        decode_in_place(buf, len)
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
        let checksum = lrc(&buf[..frame_len]);
        let mut raw = buf[..frame_len].to_vec();
        raw.push(checksum);

        let mut wire = Vec::with_capacity(1 + raw.len() * 2 + 2);
        wire.push(START);
        for &byte in &raw {
            let [hi, lo] = byte_to_hex(byte);
            wire.push(hi);
            wire.push(lo);
        }
        wire.push(CR);
        wire.push(LF);

        self.port
            .write_all(&wire)
            .map_err(|e| self.io_err(IoOperation::Write, e))?;
        self.port
            .flush()
            .map_err(|e| self.io_err(IoOperation::Flush, e))
    }

    fn clear_input(&mut self) {
        let _ = self.port.clear(ClearBuffer::Input);
    }

    fn is_connected(&self) -> bool {
        self.port.bytes_to_read().is_ok()
    }
}

/// Decodes a raw `':' hex... CR LF` frame's hex body into the front of
/// `buf` itself and checksum-verifies it. Pulled out of `Transport::parse`
/// so it's testable without a live serial port.
///
/// Safe to decode in place because the write cursor (`decoded_len`) always
/// trails the read cursor (`i`): each hex pair consumes two input bytes to
/// produce one output byte.
fn decode_in_place(buf: &mut [u8], len: usize) -> Result<ParsedFrame, TransportError> {
    if len < 1 + 2 + 2 + 2 + 2 || buf[0] != START || buf[len - 2] != CR || buf[len - 1] != LF {
        return Err(FrameError::invalid_format("missing ':' or CR LF framing").into());
    }

    let mut decoded_len = 0usize;
    let mut i = 1usize;
    while i + 1 <= len - 3 {
        let byte = hex_to_byte(buf[i], buf[i + 1])
            .ok_or_else(|| FrameError::invalid_format("non-hex character in ASCII frame"))?;
        buf[decoded_len] = byte;
        decoded_len += 1;
        i += 2;
    }

    if decoded_len < 3 {
        return Err(FrameError::too_short(
            "ASCII frame shorter than addr+fc+lrc",
            buf[..len].to_vec(),
        )
        .into());
    }

    let received_lrc = buf[decoded_len - 1];
    let calculated_lrc = lrc(&buf[..decoded_len - 1]);
    if received_lrc != calculated_lrc {
        return Err(FrameError::Lrc {
            calculated: calculated_lrc,
            received: received_lrc,
            frame_hex: hex::encode(&buf[..len]),
        }
        .into());
    }

    Ok(ParsedFrame {
        addr: buf[0],
        fc: buf[1],
        data_pos: 2,
        data_len: decoded_len - 3,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_frame(addr: u8, fc: u8, data: &[u8]) -> Vec<u8> {
        let mut raw = vec![addr, fc];
        raw.extend_from_slice(data);
        raw.push(lrc(&raw));

        let mut wire = Vec::with_capacity(1 + raw.len() * 2 + 2);
        wire.push(START);
        for byte in raw {
            let [hi, lo] = byte_to_hex(byte);
            wire.push(hi);
            wire.push(lo);
        }
        wire.push(CR);
        wire.push(LF);
        wire
    }

    #[test]
    fn round_trips_a_well_formed_frame() {
        let mut wire = wire_frame(0x01, 0x03, &[0x00, 0x00, 0x00, 0x0A]);
        let len = wire.len();
        let parsed = decode_in_place(&mut wire, len).unwrap();
        assert_eq!(parsed.addr, 0x01);
        assert_eq!(parsed.fc, 0x03);
        assert_eq!(&wire[parsed.data_pos..parsed.data_pos + parsed.data_len], &[0x00, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn rejects_bad_lrc() {
        let mut wire = wire_frame(0x01, 0x03, &[0x00, 0x00, 0x00, 0x0A]);
        // Flip a hex digit inside the payload, upstream of the LRC byte.
        wire[5] = b'F';
        let len = wire.len();
        let err = decode_in_place(&mut wire, len).unwrap_err();
        assert!(matches!(err, TransportError::Frame(FrameError::Lrc { .. })));
    }

    #[test]
    fn lowercase_hex_decodes_same_as_uppercase() {
        let mut upper = wire_frame(0x0A, 0x03, &[0xAB]);
        let mut lower = upper.clone();
        for b in lower.iter_mut() {
            if b.is_ascii_uppercase() {
                *b = b.to_ascii_lowercase();
            }
        }
        let len = upper.len();
        let a = decode_in_place(&mut upper, len).unwrap();
        let b = decode_in_place(&mut lower, len).unwrap();
        assert_eq!(a.addr, b.addr);
        assert_eq!(a.fc, b.fc);
    }

    #[test]
    fn rejects_frame_missing_sentinels() {
        let mut bad = b"01030000000AF4".to_vec();
        let len = bad.len();
        let err = decode_in_place(&mut bad, len).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::Format { kind: crate::errors::FrameFormatKind::InvalidFormat, .. })
        ));
    }
}
