//! The host I/O contract.
//!
//! A hart never touches memory or the outside world directly; every
//! fetch, load, store, ECALL and EBREAK is routed through a `HartIo`
//! implementor supplied by the caller. This is the Rust-idiomatic form
//! of the execution-environment-interface boundary: a trait the host
//! implements, rather than a struct of function pointers, so that the
//! interpreter's hot path stays monomorphic.

use crate::error::{Exception, ReadError, WriteError};
use crate::registers::Registers;

pub trait HartIo {
    /// Fetch the 32-bit instruction word at `addr`. `addr` is guaranteed
    /// 4-byte aligned by the caller before this is invoked.
    fn mem_ifetch(&mut self, addr: u32) -> Result<u32, ReadError>;

    fn mem_read_b(&mut self, addr: u32) -> Result<u8, ReadError>;
    fn mem_read_s(&mut self, addr: u32) -> Result<u16, ReadError>;
    fn mem_read_w(&mut self, addr: u32) -> Result<u32, ReadError>;

    fn mem_write_b(&mut self, addr: u32, value: u8) -> Result<(), WriteError>;
    fn mem_write_s(&mut self, addr: u32, value: u16) -> Result<(), WriteError>;
    fn mem_write_w(&mut self, addr: u32, value: u32) -> Result<(), WriteError>;

    /// Called on ECALL. `x` is the integer register file at the time of
    /// the call, mutable so a syscall ABI can return a value in it; `pc`
    /// is the address of the ECALL instruction itself. Returning `Err`
    /// latches the given exception instead of the default
    /// `Exception::EnvironmentCall`.
    fn on_ecall(&mut self, x: &mut Registers, pc: u32) -> Result<(), Exception> {
        let _ = (x, pc);
        Err(Exception::EnvironmentCall)
    }

    /// Called on EBREAK. Default behaviour latches `Exception::Breakpoint`.
    fn on_ebreak(&mut self, x: &mut Registers, pc: u32) -> Result<(), Exception> {
        let _ = (x, pc);
        Err(Exception::Breakpoint)
    }
}

/// A flat, sparsely-backed byte-addressable memory, provided as a
/// ready-made `HartIo` implementor for tests and the demo binaries. Not
/// part of the public contract of the core hart — the core never
/// assumes this type exists.
///
/// A write of `0x3f8` (the same address the reference memory model
/// uses) is treated as a virtual UART: bytes written there are
/// appended to an internal buffer instead of being stored, and can be
/// drained with `flush_stdout`.
#[derive(Debug, Default)]
pub struct FlatMemory {
    data: std::collections::HashMap<u32, u8>,
    stdout: String,
}

const UART_TX: u32 = 0x3f8;

impl FlatMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush_stdout(&mut self) -> String {
        std::mem::take(&mut self.stdout)
    }

    fn read_byte(&self, addr: u32) -> u8 {
        *self.data.get(&addr).unwrap_or(&0)
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        if addr == UART_TX {
            self.stdout.push(value as char);
        } else if value == 0 {
            self.data.remove(&addr);
        } else {
            self.data.insert(addr, value);
        }
    }

    fn read_n(&self, addr: u32, n: u32) -> u32 {
        let mut value = 0u32;
        for i in 0..n {
            value |= (self.read_byte(addr.wrapping_add(i)) as u32) << (8 * i);
        }
        value
    }

    fn write_n(&mut self, addr: u32, value: u32, n: u32) {
        for i in 0..n {
            self.write_byte(addr.wrapping_add(i), (value >> (8 * i)) as u8);
        }
    }

    /// Direct poke, used by the ELF loader and tests to preload a program
    /// image without going through the `HartIo` contract.
    pub fn load_bytes(&mut self, base: u32, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.write_byte(base.wrapping_add(i as u32), *byte);
        }
    }
}

impl HartIo for FlatMemory {
    fn mem_ifetch(&mut self, addr: u32) -> Result<u32, ReadError> {
        Ok(self.read_n(addr, 4))
    }

    fn mem_read_b(&mut self, addr: u32) -> Result<u8, ReadError> {
        Ok(self.read_byte(addr))
    }

    fn mem_read_s(&mut self, addr: u32) -> Result<u16, ReadError> {
        Ok(self.read_n(addr, 2) as u16)
    }

    fn mem_read_w(&mut self, addr: u32) -> Result<u32, ReadError> {
        Ok(self.read_n(addr, 4))
    }

    fn mem_write_b(&mut self, addr: u32, value: u8) -> Result<(), WriteError> {
        self.write_byte(addr, value);
        Ok(())
    }

    fn mem_write_s(&mut self, addr: u32, value: u16) -> Result<(), WriteError> {
        self.write_n(addr, value as u32, 2);
        Ok(())
    }

    fn mem_write_w(&mut self, addr: u32, value: u32) -> Result<(), WriteError> {
        self.write_n(addr, value, 4);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_initialised() {
        let mut mem = FlatMemory::new();
        assert_eq!(mem.mem_read_w(0).unwrap(), 0);
    }

    #[test]
    fn byte_write_then_read_does_not_spill() {
        let mut mem = FlatMemory::new();
        mem.mem_write_b(4, 0xab).unwrap();
        assert_eq!(mem.mem_read_b(4).unwrap(), 0xab);
        assert_eq!(mem.mem_read_b(5).unwrap(), 0);
    }

    #[test]
    fn word_write_then_read() {
        let mut mem = FlatMemory::new();
        mem.mem_write_w(0, 0x1234_5678).unwrap();
        assert_eq!(mem.mem_read_w(0), Ok(0x1234_5678));
        assert_eq!(mem.mem_read_b(0), Ok(0x78));
        assert_eq!(mem.mem_read_b(3), Ok(0x12));
    }

    #[test]
    fn uart_writes_do_not_land_in_memory() {
        let mut mem = FlatMemory::new();
        mem.mem_write_b(UART_TX, b'h').unwrap();
        mem.mem_write_b(UART_TX, b'i').unwrap();
        assert_eq!(mem.flush_stdout(), "hi");
        assert_eq!(mem.mem_read_b(UART_TX).unwrap(), 0);
    }
}
