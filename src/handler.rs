//! User-facing extension points (component F's dispatch targets).
//!
//! `RequestHandler` models the original's per-function virtual-method
//! override: every method defaults to `IllegalFunction`, and an
//! implementation overrides only the functions its device actually serves.

use crate::errors::ProtocolErrorKind;

pub trait RequestHandler: Send + Sync {
    fn read_coils(&self, _start: u16, _count: u16) -> Result<Vec<bool>, ProtocolErrorKind> {
        Err(ProtocolErrorKind::IllegalFunction)
    }

    fn read_discrete_inputs(&self, _start: u16, _count: u16) -> Result<Vec<bool>, ProtocolErrorKind> {
        Err(ProtocolErrorKind::IllegalFunction)
    }

    fn read_holding_registers(&self, _start: u16, _count: u16) -> Result<Vec<u16>, ProtocolErrorKind> {
        Err(ProtocolErrorKind::IllegalFunction)
    }

    fn read_input_registers(&self, _start: u16, _count: u16) -> Result<Vec<u16>, ProtocolErrorKind> {
        Err(ProtocolErrorKind::IllegalFunction)
    }

    fn write_single_coil(&self, _addr: u16, _value: bool) -> Result<(), ProtocolErrorKind> {
        Err(ProtocolErrorKind::IllegalFunction)
    }

    fn write_single_register(&self, _addr: u16, _value: u16) -> Result<(), ProtocolErrorKind> {
        Err(ProtocolErrorKind::IllegalFunction)
    }

    fn write_multiple_coils(&self, _start: u16, _values: &[bool]) -> Result<(), ProtocolErrorKind> {
        Err(ProtocolErrorKind::IllegalFunction)
    }

    fn write_multiple_registers(&self, _start: u16, _values: &[u16]) -> Result<(), ProtocolErrorKind> {
        Err(ProtocolErrorKind::IllegalFunction)
    }

    /// Combined read-then-write for function 0x17; the write is applied
    /// before the read per the Application Protocol's ordering rule.
    fn read_write_multiple_registers(
        &self,
        _read_start: u16,
        _read_count: u16,
        _write_start: u16,
        _write_values: &[u16],
    ) -> Result<Vec<u16>, ProtocolErrorKind> {
        Err(ProtocolErrorKind::IllegalFunction)
    }

    /// Fallback for function codes with no typed method above (component F's
    /// `on_custom` hook). Returning `None` or `Some(false)` yields
    /// `IllegalFunction`; `Some(true)` means the implementation already
    /// wrote a response into `response` and the dispatcher should send it
    /// verbatim.
    fn on_custom(&self, _fc: u8, _data: &[u8], _response: &mut Vec<u8>) -> Option<bool> {
        None
    }
}

/// Static device metadata served over function 0x2B/0x0E (component H).
pub trait DeviceIdentityProvider: Send + Sync {
    fn vendor_name(&self) -> &str;
    fn product_code(&self) -> &str;
    fn major_minor_revision(&self) -> &str;

    /// Additional objects beyond the three "Basic" ones, in ascending
    /// object-id order. Empty by default.
    fn extended_objects(&self) -> &[(u8, &str)] {
        &[]
    }
}
