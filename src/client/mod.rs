//! The master correlator (component G): synchronous request/response with
//! timeout-bounded retry against stray frames.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::trace;

use crate::errors::{ClientErrorKind, ModbusError, ProtocolErrorKind, TransportError};
use crate::frame::{FrameContext, ParsedFrame, BuiltFrame};
use crate::pdu::{
    self, decode_bits, decode_registers, encode_bits_response, encode_registers_response,
    is_exception_fc, read_write_value_offset, request_fc_from, FC_READ_COILS,
    FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_READ_WRITE_MULTIPLE_REGISTERS, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER, MAX_COILS, MAX_REGISTERS_READ,
    MAX_REGISTERS_WRITE, MAX_RW_READ, MAX_RW_WRITE,
};
use crate::transport::Transport;

/// One method per function code over a single transport. Requests are
/// serialised through an internal mutex: the master is not pipelined,
/// matching the one-frame-at-a-time discipline of a shared bus.
pub struct ModbusClient<T: Transport> {
    transport: Mutex<T>,
    next_txn_id: std::sync::atomic::AtomicU16,
    trace_frames: bool,
}

impl<T: Transport> ModbusClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
            next_txn_id: std::sync::atomic::AtomicU16::new(rand::thread_rng().gen()),
            trace_frames: false,
        }
    }

    /// Enables raw hex logging of every sent/received frame at `trace` level
    /// (`logging.trace_frames` in the config).
    pub fn with_trace_frames(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    fn next_ctx(&self) -> FrameContext {
        let id = self
            .next_txn_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        FrameContext::Tcp { txn_id: id }
    }

    pub async fn read_coils(&self, addr: u8, start: u16, count: u16, timeout: Duration) -> Result<Vec<bool>, ModbusError> {
        pdu::validate_count(count, MAX_COILS).map_err(ModbusError::Exception)?;
        let mut req = [0u8; 4];
        req[0..2].copy_from_slice(&start.to_be_bytes());
        req[2..4].copy_from_slice(&count.to_be_bytes());
        let resp = self.send_receive(addr, FC_READ_COILS, &req, timeout).await?;
        if resp.is_empty() {
            return Ok(Vec::new());
        }
        Ok(decode_bits(&resp[1..], count as usize))
    }

    pub async fn read_discrete_inputs(&self, addr: u8, start: u16, count: u16, timeout: Duration) -> Result<Vec<bool>, ModbusError> {
        pdu::validate_count(count, MAX_COILS).map_err(ModbusError::Exception)?;
        let mut req = [0u8; 4];
        req[0..2].copy_from_slice(&start.to_be_bytes());
        req[2..4].copy_from_slice(&count.to_be_bytes());
        let resp = self.send_receive(addr, FC_READ_DISCRETE_INPUTS, &req, timeout).await?;
        if resp.is_empty() {
            return Ok(Vec::new());
        }
        Ok(decode_bits(&resp[1..], count as usize))
    }

    pub async fn read_holding_registers(&self, addr: u8, start: u16, count: u16, timeout: Duration) -> Result<Vec<u16>, ModbusError> {
        pdu::validate_count(count, MAX_REGISTERS_READ).map_err(ModbusError::Exception)?;
        let mut req = [0u8; 4];
        req[0..2].copy_from_slice(&start.to_be_bytes());
        req[2..4].copy_from_slice(&count.to_be_bytes());
        let resp = self.send_receive(addr, FC_READ_HOLDING_REGISTERS, &req, timeout).await?;
        if resp.is_empty() {
            return Ok(Vec::new());
        }
        Ok(decode_registers(&resp[1..], count as usize))
    }

    pub async fn read_input_registers(&self, addr: u8, start: u16, count: u16, timeout: Duration) -> Result<Vec<u16>, ModbusError> {
        pdu::validate_count(count, MAX_REGISTERS_READ).map_err(ModbusError::Exception)?;
        let mut req = [0u8; 4];
        req[0..2].copy_from_slice(&start.to_be_bytes());
        req[2..4].copy_from_slice(&count.to_be_bytes());
        let resp = self.send_receive(addr, FC_READ_INPUT_REGISTERS, &req, timeout).await?;
        if resp.is_empty() {
            return Ok(Vec::new());
        }
        Ok(decode_registers(&resp[1..], count as usize))
    }

    pub async fn write_single_coil(&self, addr: u8, coil_addr: u16, value: bool, timeout: Duration) -> Result<(), ModbusError> {
        let mut req = [0u8; 4];
        req[0..2].copy_from_slice(&coil_addr.to_be_bytes());
        req[2..4].copy_from_slice(&(if value { 0xFF00u16 } else { 0x0000u16 }).to_be_bytes());
        self.send_receive(addr, FC_WRITE_SINGLE_COIL, &req, timeout).await?;
        Ok(())
    }

    pub async fn write_single_register(&self, addr: u8, reg_addr: u16, value: u16, timeout: Duration) -> Result<(), ModbusError> {
        let mut req = [0u8; 4];
        req[0..2].copy_from_slice(&reg_addr.to_be_bytes());
        req[2..4].copy_from_slice(&value.to_be_bytes());
        self.send_receive(addr, FC_WRITE_SINGLE_REGISTER, &req, timeout).await?;
        Ok(())
    }

    pub async fn write_multiple_coils(&self, addr: u8, start: u16, values: &[bool], timeout: Duration) -> Result<(), ModbusError> {
        let count = values.len() as u16;
        pdu::validate_count(count, MAX_COILS).map_err(ModbusError::Exception)?;
        let mut body = vec![0u8; 16 + values.len().div_ceil(8)];
        let len = encode_bits_response(&mut body[4..], values);
        body[0..2].copy_from_slice(&start.to_be_bytes());
        body[2..4].copy_from_slice(&count.to_be_bytes());
        let req = &body[..4 + len];
        self.send_receive(addr, FC_WRITE_MULTIPLE_COILS, req, timeout).await?;
        Ok(())
    }

    pub async fn write_multiple_registers(&self, addr: u8, start: u16, values: &[u16], timeout: Duration) -> Result<(), ModbusError> {
        let count = values.len() as u16;
        pdu::validate_count(count, MAX_REGISTERS_WRITE).map_err(ModbusError::Exception)?;
        let mut body = vec![0u8; 5 + values.len() * 2];
        body[0..2].copy_from_slice(&start.to_be_bytes());
        body[2..4].copy_from_slice(&count.to_be_bytes());
        let len = encode_registers_response(&mut body[4..], values);
        let req = &body[..4 + len];
        self.send_receive(addr, FC_WRITE_MULTIPLE_REGISTERS, req, timeout).await?;
        Ok(())
    }

    pub async fn read_write_multiple_registers(
        &self,
        addr: u8,
        read_start: u16,
        read_count: u16,
        write_start: u16,
        write_values: &[u16],
        timeout: Duration,
    ) -> Result<Vec<u16>, ModbusError> {
        pdu::validate_count(read_count, MAX_RW_READ).map_err(ModbusError::Exception)?;
        pdu::validate_count(write_values.len() as u16, MAX_RW_WRITE).map_err(ModbusError::Exception)?;

        let mut req = vec![0u8; read_write_value_offset(write_values.len())];
        req[0..2].copy_from_slice(&read_start.to_be_bytes());
        req[2..4].copy_from_slice(&read_count.to_be_bytes());
        req[4..6].copy_from_slice(&write_start.to_be_bytes());
        req[6..8].copy_from_slice(&(write_values.len() as u16).to_be_bytes());
        req[8] = (write_values.len() * 2) as u8;
        for (i, &v) in write_values.iter().enumerate() {
            let pos = read_write_value_offset(i);
            req[pos..pos + 2].copy_from_slice(&v.to_be_bytes());
        }

        let resp = self
            .send_receive(addr, FC_READ_WRITE_MULTIPLE_REGISTERS, &req, timeout)
            .await?;
        Ok(decode_registers(&resp[1..], read_count as usize))
    }

    /// Core correlation algorithm (§4.5): send, then loop reading frames
    /// until one matches `(addr, request_fc)` or the timeout is spent,
    /// discarding stray frames (wrong address, wrong function, or one that
    /// fails its checksum) along the way.
    async fn send_receive(
        &self,
        addr: u8,
        fc: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, ModbusError> {
        let mut transport = self.transport.lock().await;
        let mut ctx = self.next_ctx();

        let max_adu = transport.max_adu_len();
        let mut buf = vec![0u8; max_adu];
        transport.prepare_write().map_err(ModbusError::Transport)?;
        let built = transport
            .build(addr, fc, data.len(), &mut buf, false, &mut ctx)
            .map_err(ModbusError::Transport)?;
        buf[built.data_pos..built.data_pos + data.len()].copy_from_slice(data);
        let frame_len = built.data_pos + data.len();
        if self.trace_frames {
            trace!(frame = %hex::encode(&buf[..frame_len]), "raw frame sent");
        }
        transport
            .send(&mut buf, frame_len)
            .map_err(ModbusError::Transport)?;
        transport.prepare_read().map_err(ModbusError::Transport)?;

        if addr == 0 {
            return Ok(Vec::new());
        }

        let mut remaining = timeout;
        loop {
            let start = Instant::now();
            let len = match transport.receive(&mut buf, None, remaining) {
                Ok(len) => len,
                Err(TransportError::Timeout { elapsed }) => {
                    return Err(ModbusError::client(ClientErrorKind::Timeout, format!("no response within {elapsed:?}")))
                }
                Err(e) => return Err(ModbusError::Transport(e)),
            };

            if self.trace_frames {
                trace!(frame = %hex::encode(&buf[..len]), "raw frame received");
            }

            let parsed = match transport.parse(&mut buf, len, true, &mut ctx) {
                Ok(p) => p,
                Err(e) => {
                    trace!(error = %e, "discarding unparseable response");
                    transport.clear_input();
                    remaining = remaining.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        return Err(ModbusError::client(ClientErrorKind::Timeout, "only malformed frames arrived"));
                    }
                    continue;
                }
            };

            if parsed.addr != addr || request_fc_from(parsed.fc) != fc {
                remaining = remaining.saturating_sub(start.elapsed());
                if remaining.is_zero() {
                    return Err(ModbusError::client(ClientErrorKind::Timeout, "only stray frames arrived"));
                }
                continue;
            }

            let resp_data = buf[parsed.data_pos..parsed.data_pos + parsed.data_len].to_vec();
            if is_exception_fc(parsed.fc) {
                let code = resp_data.first().copied().unwrap_or(0);
                let kind = ProtocolErrorKind::from_exception_code(code)
                    .unwrap_or(ProtocolErrorKind::ServerDeviceFailure);
                return Err(ModbusError::Exception(kind));
            }
            return Ok(resp_data);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// A transport with no real framing: `[addr, fc, data...]`, no checksum.
    /// `inbox` holds canned response frames consumed in order by `receive`.
    struct MockTransport {
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl MockTransport {
        fn new(inbox: Vec<Vec<u8>>) -> Self {
            Self { inbox: inbox.into(), sent: Vec::new() }
        }
    }

    impl Transport for MockTransport {
        fn max_adu_len(&self) -> usize {
            256
        }
        fn prepare_read(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn prepare_write(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn data_available(&self) -> bool {
            !self.inbox.is_empty()
        }
        fn receive(&mut self, buf: &mut [u8], _: Option<u16>, timeout: Duration) -> Result<usize, TransportError> {
            match self.inbox.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                None => Err(TransportError::Timeout { elapsed: timeout }),
            }
        }
        fn parse(
            &mut self,
            buf: &mut [u8],
            len: usize,
            _is_response: bool,
            _ctx: &mut FrameContext,
        ) -> Result<ParsedFrame, TransportError> {
            if len < 2 {
                return Err(crate::errors::FrameError::too_short("short", buf[..len].to_vec()).into());
            }
            Ok(ParsedFrame { addr: buf[0], fc: buf[1], data_pos: 2, data_len: len - 2 })
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
            self.sent.push(buf[..frame_len].to_vec());
            Ok(())
        }
        fn clear_input(&mut self) {
            self.inbox.clear();
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn reads_holding_registers_from_a_matching_response() {
        let response = vec![0x11, FC_READ_HOLDING_REGISTERS, 0x02, 0xBE, 0xEF];
        let client = ModbusClient::new(MockTransport::new(vec![response]));
        let values = client
            .read_holding_registers(0x11, 0, 1, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(values, vec![0xBEEF]);
    }

    #[tokio::test]
    async fn discards_stray_frames_before_the_matching_one() {
        let stray_wrong_addr = vec![0x22, FC_READ_HOLDING_REGISTERS, 0x02, 0x00, 0x01];
        let stray_wrong_fc = vec![0x11, FC_READ_INPUT_REGISTERS, 0x02, 0x00, 0x02];
        let matching = vec![0x11, FC_READ_HOLDING_REGISTERS, 0x02, 0x00, 0x2A];
        let client = ModbusClient::new(MockTransport::new(vec![stray_wrong_addr, stray_wrong_fc, matching]));
        let values = client
            .read_holding_registers(0x11, 0, 1, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(values, vec![0x2A]);
    }

    #[tokio::test]
    async fn decodes_an_exception_response() {
        let exception_fc = FC_READ_HOLDING_REGISTERS | 0x80;
        let response = vec![0x11, exception_fc, 0x02]; // IllegalDataAddress
        let client = ModbusClient::new(MockTransport::new(vec![response]));
        let err = client
            .read_holding_registers(0x11, 0, 1, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Exception(ProtocolErrorKind::IllegalDataAddress)));
    }

    #[tokio::test]
    async fn times_out_when_nothing_arrives() {
        let client = ModbusClient::new(MockTransport::new(vec![]));
        let err = client
            .read_holding_registers(0x11, 0, 1, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Client { kind: ClientErrorKind::Timeout, .. }));
    }

    #[tokio::test]
    async fn broadcast_write_returns_immediately_without_waiting_for_a_response() {
        let client = ModbusClient::new(MockTransport::new(vec![]));
        client
            .write_single_register(0, 10, 0x1234, Duration::from_millis(20))
            .await
            .unwrap();
    }
}
