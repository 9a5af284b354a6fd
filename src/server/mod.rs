//! The server dispatcher (component F): a single poll loop that demultiplexes
//! framed requests across every registered transport.

mod device_id;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::errors::ProtocolErrorKind;
use crate::frame::FrameContext;
use crate::handler::{DeviceIdentityProvider, RequestHandler};
use crate::pdu::{
    decode_bits, decode_read_request, decode_read_write_header, decode_registers,
    decode_write_multiple_header, decode_write_single, encode_bits_response,
    encode_registers_response, exception_fc_for, read_write_value_offset, validate_count,
    FC_ENCAPSULATED_INTERFACE_TRANSPORT, FC_READ_COILS, FC_READ_DISCRETE_INPUTS,
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_READ_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, MAX_COILS, MAX_REGISTERS_READ, MAX_REGISTERS_WRITE, MAX_RW_READ,
    MAX_RW_WRITE, MEI_TYPE_READ_DEVICE_IDENTIFICATION,
};
use crate::transport::Transport;

/// Per-frame read ceiling and the between-sweep idle sleep (§4.3).
const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(1);
const LOOP_SLEEP: Duration = Duration::from_millis(50);

#[derive(Default)]
struct ServerStats {
    frames_processed: AtomicU64,
    exceptions_emitted: AtomicU64,
    broadcasts_handled: AtomicU64,
    handler_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatsSnapshot {
    pub frames_processed: u64,
    pub exceptions_emitted: u64,
    pub broadcasts_handled: u64,
    pub handler_errors: u64,
}

struct TransportSlot {
    id: u64,
    transport: Box<dyn Transport>,
}

/// Multi-transport Modbus device. `address` is this device's unit id;
/// setting it equal to `any_unit_id` makes the server answer every address
/// (the TCP "any" convention, §4.2.3).
pub struct ModbusServer {
    address: u8,
    any_unit_id: u8,
    handler: Arc<dyn RequestHandler>,
    identity: Option<Arc<dyn DeviceIdentityProvider>>,
    transports: Mutex<Vec<TransportSlot>>,
    next_id: AtomicU64,
    running: AtomicBool,
    stats: ServerStats,
    trace_frames: bool,
}

impl ModbusServer {
    /// Builds a standalone server. Wrap in `Arc::new` before calling `start`.
    pub fn new(address: u8, any_unit_id: u8, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            address,
            any_unit_id,
            handler,
            identity: None,
            transports: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            stats: ServerStats::default(),
            trace_frames: false,
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn DeviceIdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Enables raw hex logging of every received frame at `trace` level
    /// (`logging.trace_frames` in the config), independent of the log
    /// level filter set for the rest of the subscriber.
    pub fn with_trace_frames(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    pub fn add_transport(&self, transport: Box<dyn Transport>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.transports.lock().unwrap().push(TransportSlot { id, transport });
        id
    }

    pub fn remove_transport(&self, id: u64) {
        self.transports.lock().unwrap().retain(|slot| slot.id != id);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn stats(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            frames_processed: self.stats.frames_processed.load(Ordering::Relaxed),
            exceptions_emitted: self.stats.exceptions_emitted.load(Ordering::Relaxed),
            broadcasts_handled: self.stats.broadcasts_handled.load(Ordering::Relaxed),
            handler_errors: self.stats.handler_errors.load(Ordering::Relaxed),
        }
    }

    pub fn transport_count(&self) -> usize {
        self.transports.lock().unwrap().len()
    }

    /// Spawns the poll loop on a blocking thread of the `tokio` runtime: the
    /// loop body calls blocking serial/socket I/O, so it must never run on
    /// an async worker thread directly.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || self.run_loop())
    }

    fn run_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let mut transports = self.transports.lock().unwrap();
            let mut removed = Vec::new();

            for i in (0..transports.len()).rev() {
                let slot = &mut transports[i];
                if !slot.transport.data_available() {
                    continue;
                }

                let mut buf = vec![0u8; slot.transport.max_adu_len()];
                let len = match slot.transport.receive(&mut buf, None, FRAME_READ_TIMEOUT) {
                    Ok(len) => len,
                    Err(_) => continue,
                };

                if self.trace_frames {
                    trace!(transport = slot.id, frame = %hex::encode(&buf[..len]), "raw frame received");
                }

                let mut ctx = FrameContext::None;
                let parsed = match slot.transport.parse(&mut buf, len, false, &mut ctx) {
                    Ok(p) => p,
                    Err(e) => {
                        trace!(error = %e, "dropping unparseable frame");
                        slot.transport.clear_input();
                        continue;
                    }
                };

                if let Err(e) = slot.transport.prepare_write() {
                    warn!(error = %e, "prepare_write failed");
                    continue;
                }

                debug!(transport = slot.id, addr = parsed.addr, fc = parsed.fc, "frame received");
                self.stats.frames_processed.fetch_add(1, Ordering::Relaxed);

                let (is_broadcast, for_us) = routing_decision(self.address, self.any_unit_id, parsed.addr);

                if for_us {
                    if is_broadcast {
                        self.stats.broadcasts_handled.fetch_add(1, Ordering::Relaxed);
                    }
                    let data = buf[parsed.data_pos..parsed.data_pos + parsed.data_len].to_vec();
                    let outcome = self.dispatch(parsed.fc, &data, slot.transport.max_adu_len());

                    if !is_broadcast {
                        match outcome {
                            Ok(resp_data) => {
                                self.send_response(slot, parsed.addr, parsed.fc, &resp_data, &mut ctx);
                            }
                            Err(kind) => {
                                self.stats.exceptions_emitted.fetch_add(1, Ordering::Relaxed);
                                self.stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                                self.send_response(
                                    slot,
                                    parsed.addr,
                                    exception_fc_for(parsed.fc),
                                    &[kind.to_exception_code()],
                                    &mut ctx,
                                );
                            }
                        }
                    }
                }

                if let Err(e) = slot.transport.prepare_read() {
                    warn!(error = %e, "prepare_read failed");
                }

                if !slot.transport.is_connected() {
                    removed.push(slot.id);
                }
            }

            transports.retain(|slot| !removed.contains(&slot.id));
            drop(transports);

            std::thread::sleep(LOOP_SLEEP);
        }
    }

    fn send_response(
        &self,
        slot: &mut TransportSlot,
        addr: u8,
        fc: u8,
        data: &[u8],
        ctx: &mut FrameContext,
    ) {
        let mut buf = vec![0u8; slot.transport.max_adu_len()];
        let built = match slot.transport.build(addr, fc, data.len(), &mut buf, true, ctx) {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "failed to build response frame");
                return;
            }
        };
        buf[built.data_pos..built.data_pos + data.len()].copy_from_slice(data);
        let frame_len = built.data_pos + data.len();
        if self.trace_frames {
            trace!(transport = slot.id, frame = %hex::encode(&buf[..frame_len]), "raw frame sent");
        }
        if let Err(e) = slot.transport.send(&mut buf, frame_len) {
            error!(error = %e, "failed to send response frame");
        }
    }

    /// Routes one PDU to the handler and returns the response PDU data (not
    /// including the function code, which the caller already knows).
    fn dispatch(&self, fc: u8, data: &[u8], max_adu_len: usize) -> Result<Vec<u8>, ProtocolErrorKind> {
        let mut out = vec![0u8; max_adu_len];

        match fc {
            FC_READ_COILS => {
                let req = decode_read_request(data)?;
                validate_count(req.count, MAX_COILS)?;
                let bits = self.handler.read_coils(req.start, req.count)?;
                let len = encode_bits_response(&mut out, &bits);
                Ok(out[..len].to_vec())
            }
            FC_READ_DISCRETE_INPUTS => {
                let req = decode_read_request(data)?;
                validate_count(req.count, MAX_COILS)?;
                let bits = self.handler.read_discrete_inputs(req.start, req.count)?;
                let len = encode_bits_response(&mut out, &bits);
                Ok(out[..len].to_vec())
            }
            FC_READ_HOLDING_REGISTERS => {
                let req = decode_read_request(data)?;
                validate_count(req.count, MAX_REGISTERS_READ)?;
                let regs = self.handler.read_holding_registers(req.start, req.count)?;
                let len = encode_registers_response(&mut out, &regs);
                Ok(out[..len].to_vec())
            }
            FC_READ_INPUT_REGISTERS => {
                let req = decode_read_request(data)?;
                validate_count(req.count, MAX_REGISTERS_READ)?;
                let regs = self.handler.read_input_registers(req.start, req.count)?;
                let len = encode_registers_response(&mut out, &regs);
                Ok(out[..len].to_vec())
            }
            FC_WRITE_SINGLE_COIL => {
                let req = decode_write_single(data)?;
                let value = match req.value {
                    0x0000 => false,
                    0xFF00 => true,
                    _ => return Err(ProtocolErrorKind::IllegalDataValue),
                };
                self.handler.write_single_coil(req.addr, value)?;
                Ok(data[..4].to_vec())
            }
            FC_WRITE_SINGLE_REGISTER => {
                let req = decode_write_single(data)?;
                self.handler.write_single_register(req.addr, req.value)?;
                Ok(data[..4].to_vec())
            }
            FC_WRITE_MULTIPLE_COILS => {
                let header = decode_write_multiple_header(data)?;
                validate_count(header.count, MAX_COILS)?;
                let expected_bytes = (header.count as usize).div_ceil(8);
                if header.byte_count as usize != expected_bytes || data.len() < 5 + expected_bytes {
                    return Err(ProtocolErrorKind::IllegalDataValue);
                }
                let bits = decode_bits(&data[5..], header.count as usize);
                self.handler.write_multiple_coils(header.start, &bits)?;
                Ok(data[..4].to_vec())
            }
            FC_WRITE_MULTIPLE_REGISTERS => {
                let header = decode_write_multiple_header(data)?;
                validate_count(header.count, MAX_REGISTERS_WRITE)?;
                let expected_bytes = header.count as usize * 2;
                if header.byte_count as usize != expected_bytes || data.len() < 5 + expected_bytes {
                    return Err(ProtocolErrorKind::IllegalDataValue);
                }
                let regs = decode_registers(&data[5..], header.count as usize);
                self.handler.write_multiple_registers(header.start, &regs)?;
                Ok(data[..4].to_vec())
            }
            FC_READ_WRITE_MULTIPLE_REGISTERS => {
                let header = decode_read_write_header(data)?;
                validate_count(header.read_count, MAX_RW_READ)?;
                validate_count(header.write_count, MAX_RW_WRITE)?;
                let expected_bytes = header.write_count as usize * 2;
                if header.byte_count as usize != expected_bytes
                    || data.len() < read_write_value_offset(header.write_count as usize)
                {
                    return Err(ProtocolErrorKind::IllegalDataValue);
                }
                let write_values: Vec<u16> = (0..header.write_count as usize)
                    .map(|i| {
                        let pos = read_write_value_offset(i);
                        u16::from_be_bytes([data[pos], data[pos + 1]])
                    })
                    .collect();
                let regs = self.handler.read_write_multiple_registers(
                    header.read_start,
                    header.read_count,
                    header.write_start,
                    &write_values,
                )?;
                let len = encode_registers_response(&mut out, &regs);
                Ok(out[..len].to_vec())
            }
            FC_ENCAPSULATED_INTERFACE_TRANSPORT => {
                if data.len() < 3 || data[0] != MEI_TYPE_READ_DEVICE_IDENTIFICATION {
                    return Err(ProtocolErrorKind::IllegalDataValue);
                }
                let identity = self
                    .identity
                    .as_deref()
                    .ok_or(ProtocolErrorKind::IllegalFunction)?;
                device_id::build_response(data[1], data[2], identity, max_adu_len.saturating_sub(6))
            }
            _ => {
                let mut response = Vec::new();
                match self.handler.on_custom(fc, data, &mut response) {
                    Some(true) => Ok(response),
                    _ => Err(ProtocolErrorKind::IllegalFunction),
                }
            }
        }
    }
}

/// Whether a received frame's address should be served at all
/// (`for_us`), and whether it was a broadcast (which must never get a
/// reply even when `for_us` is true). Split out of `run_loop` so the
/// routing rules (§4.2.3) are testable without a live transport.
fn routing_decision(address: u8, any_unit_id: u8, target: u8) -> (bool, bool) {
    let is_broadcast = target == 0;
    let is_any = address == any_unit_id;
    let for_us = is_broadcast || is_any || target == address;
    (is_broadcast, for_us)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::InMemoryRegisters;

    fn server() -> ModbusServer {
        let regs = Arc::new(InMemoryRegisters::new(8, 8, 8, 8));
        regs.write_single_register(3, 0xBEEF).unwrap();
        ModbusServer::new(0x11, 248, regs)
    }

    #[test]
    fn dispatch_read_holding_registers() {
        let server = server();
        let mut req = [0u8; 4];
        req[0..2].copy_from_slice(&3u16.to_be_bytes());
        req[2..4].copy_from_slice(&1u16.to_be_bytes());
        let resp = server.dispatch(FC_READ_HOLDING_REGISTERS, &req, 256).unwrap();
        assert_eq!(resp, vec![0x02, 0xBE, 0xEF]);
    }

    #[test]
    fn dispatch_out_of_range_read_is_illegal_address() {
        let server = server();
        let mut req = [0u8; 4];
        req[0..2].copy_from_slice(&100u16.to_be_bytes());
        req[2..4].copy_from_slice(&1u16.to_be_bytes());
        let err = server.dispatch(FC_READ_HOLDING_REGISTERS, &req, 256).unwrap_err();
        assert_eq!(err, ProtocolErrorKind::IllegalDataAddress);
    }

    #[test]
    fn dispatch_unknown_function_code_is_illegal_function() {
        let server = server();
        let err = server.dispatch(0x99, &[], 256).unwrap_err();
        assert_eq!(err, ProtocolErrorKind::IllegalFunction);
    }

    #[test]
    fn dispatch_device_id_without_identity_is_illegal_function() {
        let server = server();
        let req = [MEI_TYPE_READ_DEVICE_IDENTIFICATION, 0x01, 0x00];
        let err = server
            .dispatch(FC_ENCAPSULATED_INTERFACE_TRANSPORT, &req, 256)
            .unwrap_err();
        assert_eq!(err, ProtocolErrorKind::IllegalFunction);
    }

    #[test]
    fn broadcast_is_for_everyone_but_never_replied_to() {
        let (is_broadcast, for_us) = routing_decision(0x11, 248, 0);
        assert!(is_broadcast);
        assert!(for_us);
    }

    #[test]
    fn unicast_to_a_different_address_is_ignored() {
        let (is_broadcast, for_us) = routing_decision(0x11, 248, 0x12);
        assert!(!is_broadcast);
        assert!(!for_us);
    }

    #[test]
    fn unicast_to_our_own_address_is_served() {
        let (is_broadcast, for_us) = routing_decision(0x11, 248, 0x11);
        assert!(!is_broadcast);
        assert!(for_us);
    }

    #[test]
    fn address_equal_to_any_unit_id_accepts_every_target() {
        let (is_broadcast, for_us) = routing_decision(248, 248, 0x55);
        assert!(!is_broadcast);
        assert!(for_us);
    }
}
