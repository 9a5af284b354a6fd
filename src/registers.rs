//! An in-memory register map for tests and the demo binary. Not a mandated
//! API — applications are expected to bring their own `RequestHandler`.

use std::sync::Mutex;

use crate::errors::ProtocolErrorKind;
use crate::handler::{DeviceIdentityProvider, RequestHandler};

pub struct InMemoryRegisters {
    coils: Mutex<Vec<bool>>,
    discrete_inputs: Mutex<Vec<bool>>,
    holding_registers: Mutex<Vec<u16>>,
    input_registers: Mutex<Vec<u16>>,
}

impl InMemoryRegisters {
    pub fn new(coil_count: usize, discrete_count: usize, holding_count: usize, input_count: usize) -> Self {
        Self {
            coils: Mutex::new(vec![false; coil_count]),
            discrete_inputs: Mutex::new(vec![false; discrete_count]),
            holding_registers: Mutex::new(vec![0; holding_count]),
            input_registers: Mutex::new(vec![0; input_count]),
        }
    }

    /// Seeds the input-register bank, since nothing else writes to it.
    pub fn set_input_registers(&self, start: u16, values: &[u16]) {
        let mut regs = self.input_registers.lock().unwrap();
        for (i, &v) in values.iter().enumerate() {
            regs[start as usize + i] = v;
        }
    }

    pub fn set_discrete_inputs(&self, start: u16, values: &[bool]) {
        let mut inputs = self.discrete_inputs.lock().unwrap();
        for (i, &v) in values.iter().enumerate() {
            inputs[start as usize + i] = v;
        }
    }

    fn slice<T: Copy>(bank: &[T], start: u16, count: u16) -> Result<Vec<T>, ProtocolErrorKind> {
        let start = start as usize;
        let end = start + count as usize;
        bank.get(start..end)
            .map(|s| s.to_vec())
            .ok_or(ProtocolErrorKind::IllegalDataAddress)
    }
}

impl RequestHandler for InMemoryRegisters {
    fn read_coils(&self, start: u16, count: u16) -> Result<Vec<bool>, ProtocolErrorKind> {
        Self::slice(&self.coils.lock().unwrap(), start, count)
    }

    fn read_discrete_inputs(&self, start: u16, count: u16) -> Result<Vec<bool>, ProtocolErrorKind> {
        Self::slice(&self.discrete_inputs.lock().unwrap(), start, count)
    }

    fn read_holding_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, ProtocolErrorKind> {
        Self::slice(&self.holding_registers.lock().unwrap(), start, count)
    }

    fn read_input_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, ProtocolErrorKind> {
        Self::slice(&self.input_registers.lock().unwrap(), start, count)
    }

    fn write_single_coil(&self, addr: u16, value: bool) -> Result<(), ProtocolErrorKind> {
        let mut coils = self.coils.lock().unwrap();
        let slot = coils.get_mut(addr as usize).ok_or(ProtocolErrorKind::IllegalDataAddress)?;
        *slot = value;
        Ok(())
    }

    fn write_single_register(&self, addr: u16, value: u16) -> Result<(), ProtocolErrorKind> {
        let mut regs = self.holding_registers.lock().unwrap();
        let slot = regs.get_mut(addr as usize).ok_or(ProtocolErrorKind::IllegalDataAddress)?;
        *slot = value;
        Ok(())
    }

    fn write_multiple_coils(&self, start: u16, values: &[bool]) -> Result<(), ProtocolErrorKind> {
        let mut coils = self.coils.lock().unwrap();
        let end = start as usize + values.len();
        if end > coils.len() {
            return Err(ProtocolErrorKind::IllegalDataAddress);
        }
        coils[start as usize..end].copy_from_slice(values);
        Ok(())
    }

    fn write_multiple_registers(&self, start: u16, values: &[u16]) -> Result<(), ProtocolErrorKind> {
        let mut regs = self.holding_registers.lock().unwrap();
        let end = start as usize + values.len();
        if end > regs.len() {
            return Err(ProtocolErrorKind::IllegalDataAddress);
        }
        regs[start as usize..end].copy_from_slice(values);
        Ok(())
    }

    fn read_write_multiple_registers(
        &self,
        read_start: u16,
        read_count: u16,
        write_start: u16,
        write_values: &[u16],
    ) -> Result<Vec<u16>, ProtocolErrorKind> {
        self.write_multiple_registers(write_start, write_values)?;
        self.read_holding_registers(read_start, read_count)
    }
}

/// Static identity strings surfaced over function 0x2B/0x0E, analogous to
/// the crate's own `Cargo.toml` metadata made visible on the wire.
pub struct StaticIdentity {
    pub vendor_name: &'static str,
    pub product_code: &'static str,
    pub revision: &'static str,
}

impl DeviceIdentityProvider for StaticIdentity {
    fn vendor_name(&self) -> &str {
        self.vendor_name
    }

    fn product_code(&self) -> &str {
        self.product_code
    }

    fn major_minor_revision(&self) -> &str {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_rejects_out_of_range_start() {
        let regs = InMemoryRegisters::new(1, 1, 4, 4);
        let err = regs.read_holding_registers(2, 4).unwrap_err();
        assert_eq!(err, ProtocolErrorKind::IllegalDataAddress);
    }

    #[test]
    fn write_single_coil_then_read_back() {
        let regs = InMemoryRegisters::new(4, 0, 0, 0);
        regs.write_single_coil(2, true).unwrap();
        let bits = regs.read_coils(0, 4).unwrap();
        assert_eq!(bits, vec![false, false, true, false]);
    }

    #[test]
    fn read_write_multiple_applies_write_before_read() {
        let regs = InMemoryRegisters::new(0, 0, 4, 0);
        let result = regs
            .read_write_multiple_registers(0, 4, 1, &[0xAAAA, 0xBBBB])
            .unwrap();
        assert_eq!(result, vec![0, 0xAAAA, 0xBBBB, 0]);
    }
}
