//! Function code constants, register-count bounds, and PDU encode/decode
//! helpers shared by the server dispatcher and master correlator.

use crate::codec::{read_u16_be, write_u16_be};
use crate::errors::ProtocolErrorKind;

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_READ_EXCEPTION_STATUS: u8 = 0x07;
pub const FC_DIAGNOSTICS: u8 = 0x08;
pub const FC_GET_COMM_EVENT_COUNTER: u8 = 0x0B;
pub const FC_GET_COMM_EVENT_LOG: u8 = 0x0C;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const FC_READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;
pub const FC_ENCAPSULATED_INTERFACE_TRANSPORT: u8 = 0x2B;
pub const MEI_TYPE_READ_DEVICE_IDENTIFICATION: u8 = 0x0E;

pub const MAX_COILS: u16 = 2000;
pub const MAX_REGISTERS_READ: u16 = 125;
pub const MAX_REGISTERS_WRITE: u16 = 123;
pub const MAX_RW_READ: u16 = 121;
pub const MAX_RW_WRITE: u16 = 121;

pub const EXCEPTION_BIT: u8 = 0x80;

/// `fc | 0x80` marks a response as an exception; this is the inverse.
pub fn is_exception_fc(fc: u8) -> bool {
    fc & EXCEPTION_BIT != 0
}

pub fn request_fc_from(response_fc: u8) -> u8 {
    response_fc & !EXCEPTION_BIT
}

pub fn exception_fc_for(request_fc: u8) -> u8 {
    request_fc | EXCEPTION_BIT
}

/// Request payload of a read operation (coils/discretes/holding/input regs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub start: u16,
    pub count: u16,
}

pub fn decode_read_request(data: &[u8]) -> Result<ReadRequest, ProtocolErrorKind> {
    if data.len() < 4 {
        return Err(ProtocolErrorKind::IllegalDataValue);
    }
    Ok(ReadRequest {
        start: read_u16_be(data, 0),
        count: read_u16_be(data, 2),
    })
}

pub fn validate_count(count: u16, max: u16) -> Result<(), ProtocolErrorKind> {
    if count == 0 || count > max {
        return Err(ProtocolErrorKind::IllegalDataValue);
    }
    Ok(())
}

/// Builds a `byte_count | packed_bits` response body, LSB-first within each
/// byte, zero-padding unused high bits of the final byte.
pub fn encode_bits_response(buf: &mut [u8], bits: &[bool]) -> usize {
    let byte_count = bits.len().div_ceil(8);
    buf[0] = byte_count as u8;
    for b in &mut buf[1..1 + byte_count] {
        *b = 0;
    }
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            buf[1 + i / 8] |= 1 << (i % 8);
        }
    }
    1 + byte_count
}

/// Unpacks `count` LSB-first bits starting at `buf[0..]`.
pub fn decode_bits(buf: &[u8], count: usize) -> Vec<bool> {
    (0..count).map(|i| (buf[i / 8] >> (i % 8)) & 1 != 0).collect()
}

/// Builds a `byte_count | registers...` response body.
pub fn encode_registers_response(buf: &mut [u8], registers: &[u16]) -> usize {
    buf[0] = (registers.len() * 2) as u8;
    for (i, &reg) in registers.iter().enumerate() {
        write_u16_be(buf, 1 + i * 2, reg);
    }
    1 + registers.len() * 2
}

pub fn decode_registers(buf: &[u8], count: usize) -> Vec<u16> {
    (0..count).map(|i| read_u16_be(buf, i * 2)).collect()
}

/// Request payload of `WriteSingleCoil`/`WriteSingleRegister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRequest {
    pub addr: u16,
    pub value: u16,
}

pub fn decode_write_single(data: &[u8]) -> Result<WriteSingleRequest, ProtocolErrorKind> {
    if data.len() < 4 {
        return Err(ProtocolErrorKind::IllegalDataValue);
    }
    Ok(WriteSingleRequest {
        addr: read_u16_be(data, 0),
        value: read_u16_be(data, 2),
    })
}

/// Request header of `WriteMultipleCoils`/`WriteMultipleRegisters`:
/// `start | count | byte_count | values...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleHeader {
    pub start: u16,
    pub count: u16,
    pub byte_count: u8,
}

pub fn decode_write_multiple_header(data: &[u8]) -> Result<WriteMultipleHeader, ProtocolErrorKind> {
    if data.len() < 5 {
        return Err(ProtocolErrorKind::IllegalDataValue);
    }
    Ok(WriteMultipleHeader {
        start: read_u16_be(data, 0),
        count: read_u16_be(data, 2),
        byte_count: data[4],
    })
}

/// Request header of `ReadWriteMultipleRegisters`: `read_start | read_count |
/// write_start | write_count | byte_count | write_regs...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWriteHeader {
    pub read_start: u16,
    pub read_count: u16,
    pub write_start: u16,
    pub write_count: u16,
    pub byte_count: u8,
}

pub fn decode_read_write_header(data: &[u8]) -> Result<ReadWriteHeader, ProtocolErrorKind> {
    if data.len() < 9 {
        return Err(ProtocolErrorKind::IllegalDataValue);
    }
    Ok(ReadWriteHeader {
        read_start: read_u16_be(data, 0),
        read_count: read_u16_be(data, 2),
        write_start: read_u16_be(data, 4),
        write_count: read_u16_be(data, 6),
        byte_count: data[8],
    })
}

/// Byte offset of the first write register value within the request `data`
/// slice of a `ReadWriteMultipleRegisters` request: after the five header
/// fields (4 u16s + 1 u8 = 9 bytes), register `i` starts at `9 + 2*i`.
pub fn read_write_value_offset(i: usize) -> usize {
    9 + 2 * i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip_with_padding() {
        let bits = [true, false, true, true, false, false, false, false, true];
        let mut buf = [0u8; 16];
        let len = encode_bits_response(&mut buf, &bits);
        assert_eq!(buf[0], 2);
        assert_eq!(buf[1], 0b0000_1101);
        assert_eq!(buf[2], 0b0000_0001);
        let decoded = decode_bits(&buf[1..], bits.len());
        assert_eq!(decoded, bits);
        assert_eq!(len, 3);
    }

    #[test]
    fn registers_round_trip() {
        let regs = [0x1234u16, 0x5678, 0x9ABC];
        let mut buf = [0u8; 16];
        encode_registers_response(&mut buf, &regs);
        assert_eq!(buf[0], 6);
        assert_eq!(decode_registers(&buf[1..], 3), regs);
    }

    #[test]
    fn count_validation_rejects_zero_and_overmax() {
        assert!(validate_count(0, MAX_COILS).is_err());
        assert!(validate_count(MAX_COILS + 1, MAX_COILS).is_err());
        assert!(validate_count(MAX_COILS, MAX_COILS).is_ok());
    }

    #[test]
    fn exception_bit_round_trips() {
        assert_eq!(exception_fc_for(0x03), 0x83);
        assert!(is_exception_fc(0x83));
        assert_eq!(request_fc_from(0x83), 0x03);
    }

    #[test]
    fn read_write_offset_matches_written_spec() {
        assert_eq!(read_write_value_offset(0), 9);
        assert_eq!(read_write_value_offset(1), 11);
    }
}
