use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use socket2::{SockRef, TcpKeepalive};

use crate::codec::{read_u16_be, write_u16_be};
use crate::config::TcpConfig;
use crate::errors::{FrameError, IoOperation, TransportError};
use crate::frame::{BuiltFrame, FrameContext, ParsedFrame};

use super::Transport;

const HEADER_LEN: usize = 7;

/// MBAP-framed TCP transport. One instance per accepted connection; the
/// listener itself lives in the server's acceptor task (component F),
/// which registers each accepted stream as a transport.
pub struct TcpTransport {
    stream: TcpStream,
    max_frame_size: usize,
    peer: String,
}

impl TcpTransport {
    pub fn from_stream(stream: TcpStream, config: &TcpConfig) -> Result<Self, TransportError> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        stream.set_nodelay(true)?;
        if !config.keep_alive.is_zero() {
            let sock = SockRef::from(&stream);
            let keepalive = TcpKeepalive::new().with_time(config.keep_alive);
            let _ = sock.set_tcp_keepalive(&keepalive);
        }
        stream.set_read_timeout(Some(Duration::from_millis(50)))?;
        Ok(Self {
            stream,
            // MBAP header (7) + unit/fc (2) + max PDU data.
            max_frame_size: HEADER_LEN + 2 + 252,
            peer,
        })
    }

    fn io_err(&self, operation: IoOperation, err: io::Error) -> TransportError {
        TransportError::Io {
            operation,
            details: format!("{}: {}", self.peer, err),
            source: err,
        }
    }
}

impl Transport for TcpTransport {
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
        // TCP has no cheap peek; the dispatcher relies on `receive`'s own
        // short per-poll timeout instead of skipping transports up front.
        true
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
        _desired_pdu_data_len: Option<u16>,
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut len = 0usize;
        let mut expected: Option<usize> = None;

        loop {
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout { elapsed: timeout });
            }
            match self.stream.read(&mut buf[len..]) {
                Ok(0) => return Err(TransportError::NotConnected),
                Ok(n) => {
                    len += n;
                    if expected.is_none() && len >= HEADER_LEN {
                        let length_field = read_u16_be(buf, 4) as usize;
                        expected = Some(HEADER_LEN - 1 + length_field);
                    }
                    if let Some(total) = expected {
                        if len >= total {
                            return Ok(total);
                        }
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(self.io_err(IoOperation::Read, e)),
            }
        }
    }

    fn parse(
        &mut self,
        buf: &mut [u8],
        len: usize,
        is_response: bool,
        ctx: &mut FrameContext,
    ) -> Result<ParsedFrame, TransportError> {
        parse_mbap(buf, len, is_response, ctx)
    }

    fn build(
        &mut self,
        addr: u8,
        fc: u8,
        _data_len: usize,
        buf: &mut [u8],
        _is_response: bool,
        ctx: &mut FrameContext,
    ) -> Result<BuiltFrame, TransportError> {
        build_mbap(addr, fc, buf, ctx)
    }

    fn send(&mut self, buf: &mut [u8], frame_len: usize) -> Result<(), TransportError> {
        let length_field = (frame_len - HEADER_LEN + 1) as u16;
        write_u16_be(buf, 4, length_field);
        self.stream
            .write_all(&buf[..frame_len])
            .map_err(|e| self.io_err(IoOperation::Write, e))
    }

    fn clear_input(&mut self) {
        let mut scratch = [0u8; 256];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(n) if n < scratch.len() => break,
                Ok(_) => continue,
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.peer_addr().is_ok()
    }
}

/// Parses an MBAP header and slices out the trailing unit id/fc/data.
/// Pulled out of `Transport::parse` so it's testable without a live socket.
///
/// On a response (`is_response`), the received `txn_id` is checked against
/// the outstanding one already in `ctx` (set by `build_mbap` for the
/// request that is awaiting a reply) rather than overwriting it: a late or
/// stray response carrying some other transaction's id must be rejected,
/// not accepted as if it answered the current request (§4.2.3). On a
/// request (server side), there is no outstanding id to check against, so
/// `ctx` is populated from the incoming frame for `build_mbap` to echo back.
fn parse_mbap(buf: &[u8], len: usize, is_response: bool, ctx: &mut FrameContext) -> Result<ParsedFrame, TransportError> {
    if len < HEADER_LEN + 1 {
        return Err(FrameError::too_short("MBAP frame shorter than header+fc", buf[..len].to_vec()).into());
    }
    let txn_id = read_u16_be(buf, 0);
    let proto_id = read_u16_be(buf, 2);
    if proto_id != 0 {
        return Err(FrameError::invalid_format("non-zero MBAP protocol id").into());
    }

    if is_response {
        if let Some(expected) = ctx.tcp_txn_id() {
            if txn_id != expected {
                return Err(FrameError::unexpected_response(format!(
                    "MBAP txn id mismatch: expected {expected:#06x}, got {txn_id:#06x}"
                ))
                .into());
            }
        }
    } else {
        *ctx = FrameContext::Tcp { txn_id };
    }

    Ok(ParsedFrame {
        addr: buf[6],
        fc: buf[7],
        data_pos: 8,
        data_len: len - 8,
    })
}

/// Writes the MBAP header up to (not including) the length field's final
/// value, which `send` patches once the frame length is known.
fn build_mbap(addr: u8, fc: u8, buf: &mut [u8], ctx: &mut FrameContext) -> Result<BuiltFrame, TransportError> {
    let txn_id = ctx.tcp_txn_id().unwrap_or(0);
    write_u16_be(buf, 0, txn_id);
    write_u16_be(buf, 2, 0); // protocol id
    write_u16_be(buf, 4, 0); // length, patched in send
    buf[6] = addr;
    buf[7] = fc;
    Ok(BuiltFrame { data_pos: 8 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_round_trips_txn_id_and_addr_fc() {
        let mut buf = [0u8; 32];
        let mut ctx = FrameContext::Tcp { txn_id: 0x1234 };
        let built = build_mbap(0x11, 0x03, &mut buf, &mut ctx).unwrap();
        assert_eq!(built.data_pos, 8);
        buf[8..12].copy_from_slice(&[0x00, 0x6B, 0x00, 0x03]);
        write_u16_be(&mut buf, 4, 6); // unit+fc+data length

        // Server-side request parse: no outstanding txn id yet, so ctx is
        // populated from the frame.
        let mut request_ctx = FrameContext::None;
        let parsed = parse_mbap(&buf, 12, false, &mut request_ctx).unwrap();
        assert_eq!(parsed.addr, 0x11);
        assert_eq!(parsed.fc, 0x03);
        assert_eq!(request_ctx.tcp_txn_id(), Some(0x1234));
        assert_eq!(&buf[parsed.data_pos..parsed.data_pos + parsed.data_len], &[0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn response_with_matching_txn_id_is_accepted() {
        let mut buf = [0u8; 32];
        let mut ctx = FrameContext::Tcp { txn_id: 0x1234 };
        build_mbap(0x11, 0x03, &mut buf, &mut ctx).unwrap();
        write_u16_be(&mut buf, 4, 3); // unit+fc+byte_count, no register bytes

        let parsed = parse_mbap(&buf, 9, true, &mut ctx).unwrap();
        assert_eq!(parsed.addr, 0x11);
        assert_eq!(ctx.tcp_txn_id(), Some(0x1234));
    }

    #[test]
    fn response_with_mismatched_txn_id_is_rejected() {
        let mut buf = [0u8; 32];
        let mut outstanding = FrameContext::Tcp { txn_id: 0x0001 };
        // A stray response carrying some other transaction's id but the
        // same unit id and function code.
        write_u16_be(&mut buf, 0, 0x00FF);
        buf[6] = 0x11;
        buf[7] = 0x03;
        write_u16_be(&mut buf, 4, 3);

        let err = parse_mbap(&buf, 9, true, &mut outstanding).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::Format { kind: crate::errors::FrameFormatKind::UnexpectedResponse, .. })
        ));
        // The outstanding id must still be the one we're waiting for.
        assert_eq!(outstanding.tcp_txn_id(), Some(0x0001));
    }

    #[test]
    fn rejects_non_zero_protocol_id() {
        let mut buf = [0u8; 16];
        write_u16_be(&mut buf, 2, 1);
        let mut ctx = FrameContext::None;
        let err = parse_mbap(&buf, 10, false, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::Format { kind: crate::errors::FrameFormatKind::InvalidFormat, .. })
        ));
    }

    #[test]
    fn rejects_frame_shorter_than_header_plus_fc() {
        let buf = [0u8; 4];
        let mut ctx = FrameContext::None;
        let err = parse_mbap(&buf, 4, false, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::Size { kind: crate::errors::FrameSizeKind::TooShort, .. })
        ));
    }
}
