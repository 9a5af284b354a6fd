//! The `Transport` trait (component B) and its three framer implementations.

mod ascii;
mod rtu;
mod tcp;

pub use ascii::AsciiTransport;
pub use rtu::RtuTransport;
pub use tcp::TcpTransport;

use std::time::Duration;

use crate::errors::TransportError;
use crate::frame::{BuiltFrame, FrameContext, ParsedFrame};

/// Direction-control hook for half-duplex media (RS-485 DE/RE pin).
/// The default no-op fits full-duplex links (ASCII, TCP).
pub trait LineDirection: Send {
    fn set_write(&mut self, on: bool) -> Result<(), TransportError>;
}

/// A no-op direction controller for transports with no half-duplex line.
pub struct NoDirectionControl;

impl LineDirection for NoDirectionControl {
    fn set_write(&mut self, _on: bool) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Abstract framing contract every RTU/ASCII/TCP implementation satisfies.
/// Deliberately synchronous: each call blocks up to the timeout it is given,
/// mirroring the wording of the wire protocol rather than hiding it behind
/// `async fn`. Object-safe so the dispatcher can hold a `Vec<Box<dyn Transport>>`.
pub trait Transport: Send {
    /// Largest ADU this transport will build or accept.
    fn max_adu_len(&self) -> usize;

    /// Switches the line to receive mode. No-op on full-duplex media.
    fn prepare_read(&mut self) -> Result<(), TransportError>;

    /// Switches the line to transmit mode. No-op on full-duplex media.
    fn prepare_write(&mut self) -> Result<(), TransportError>;

    /// True if bytes are buffered or waiting at the OS level.
    fn data_available(&self) -> bool;

    /// Blocks up to `timeout` for a complete frame, writing it into `buf`
    /// and returning its length. `desired_pdu_data_len`, when known (the
    /// master knows how many bytes a given response should carry), lets a
    /// framer stop as soon as enough bytes have arrived instead of waiting
    /// out the full idle gap.
    fn receive(
        &mut self,
        buf: &mut [u8],
        desired_pdu_data_len: Option<u16>,
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Validates checksum/framing and locates `(addr, fc, data)` within `buf`.
    /// Mutable because the ASCII framer decodes its hex body in place.
    fn parse(
        &mut self,
        buf: &mut [u8],
        len: usize,
        is_response: bool,
        ctx: &mut FrameContext,
    ) -> Result<ParsedFrame, TransportError>;

    /// Reserves the framing header in `buf` and reports where PDU data
    /// should be written before `send` is called.
    fn build(
        &mut self,
        addr: u8,
        fc: u8,
        data_len: usize,
        buf: &mut [u8],
        is_response: bool,
        ctx: &mut FrameContext,
    ) -> Result<BuiltFrame, TransportError>;

    /// Finalises checksum/length fields and writes `buf[..frame_len]` to the
    /// wire (RTU/ASCII append a trailer first; TCP patches its length field).
    fn send(&mut self, buf: &mut [u8], frame_len: usize) -> Result<(), TransportError>;

    /// Discards any buffered/partial input, used after a parse failure.
    fn clear_input(&mut self);

    /// False once the underlying channel has gone away (socket closed,
    /// device unplugged); the dispatcher drops such transports.
    fn is_connected(&self) -> bool;
}
