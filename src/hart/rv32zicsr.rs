//! SYSTEM opcode: ECALL, EBREAK, and the Zicsr instructions.
//!
//! CSRRW/CSRRS/CSRRC always read the old CSR value into `rd` (or skip
//! the read entirely when `rd` is x0, to avoid a spurious read of a
//! CSR with read side effects — none of the CSRs modelled here have
//! any, but the shape is kept for fidelity) before applying the write,
//! and only apply it when the CSR is in fact writable. The three
//! immediate forms (CSRRWI/CSRRSI/CSRRCI, funct3 5/6/7) are decoded but
//! have no effect, matching the unimplemented-immediate-variant
//! contract this hart follows throughout.

use crate::decode::decode_itype;
use crate::error::Exception;
use crate::hart::{HandlerResult, Hart};
use crate::io::HartIo;
use crate::opcodes::*;

pub fn execute_system<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_itype(instr);
    match fields.funct3 {
        FUNCT3_PRIV => match fields.imm {
            IMM_ECALL => {
                let pc = hart.pc;
                hart.io.on_ecall(&mut hart.x, pc)?;
                hart.increment_pc();
                Ok(true)
            }
            IMM_EBREAK => {
                let pc = hart.pc;
                hart.io.on_ebreak(&mut hart.x, pc)?;
                hart.increment_pc();
                Ok(true)
            }
            _ => Err(Exception::IllegalInstruction(instr)),
        },
        FUNCT3_CSRRW => {
            if !cfg!(feature = "zicsr") {
                return Err(Exception::IllegalInstruction(instr));
            }
            let csr = fields.imm as u16;
            let old = if fields.rd != 0 { hart.csr.read(csr) } else { 0 };
            let new_value = hart.x(fields.rs1);
            if crate::csr::Csr::is_writable(csr) {
                hart.csr.write(csr, new_value);
            }
            if fields.rd != 0 {
                hart.set_x(fields.rd, old);
            }
            hart.increment_pc();
            Ok(true)
        }
        FUNCT3_CSRRS => {
            if !cfg!(feature = "zicsr") {
                return Err(Exception::IllegalInstruction(instr));
            }
            let csr = fields.imm as u16;
            let old = hart.csr.read(csr);
            if fields.rs1 != 0 && crate::csr::Csr::is_writable(csr) {
                let mask = hart.x(fields.rs1);
                hart.csr.write(csr, old | mask);
            }
            hart.set_x(fields.rd, old);
            hart.increment_pc();
            Ok(true)
        }
        FUNCT3_CSRRC => {
            if !cfg!(feature = "zicsr") {
                return Err(Exception::IllegalInstruction(instr));
            }
            let csr = fields.imm as u16;
            let old = hart.csr.read(csr);
            if fields.rs1 != 0 && crate::csr::Csr::is_writable(csr) {
                let mask = hart.x(fields.rs1);
                hart.csr.write(csr, old & !mask);
            }
            hart.set_x(fields.rd, old);
            hart.increment_pc();
            Ok(true)
        }
        // The immediate CSR forms are accepted at decode time but have
        // no effect on hart state, matching section 4.4's contract.
        FUNCT3_CSRRWI | FUNCT3_CSRRSI | FUNCT3_CSRRCI => {
            if !cfg!(feature = "zicsr") {
                return Err(Exception::IllegalInstruction(instr));
            }
            hart.increment_pc();
            Ok(true)
        }
        _ => Err(Exception::IllegalInstruction(instr)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FlatMemory;

    type TestHart = Hart<FlatMemory>;

    fn encode_i(opcode: u32, rd: u8, funct3: u32, rs1: u8, imm: u32) -> u32 {
        ((imm & 0xfff) << 20) | ((rs1 as u32) << 15) | (funct3 << 12) | ((rd as u32) << 7) | opcode
    }

    #[test]
    fn ecall_raises_environment_call_exception() {
        let mut hart = TestHart::default();
        hart.io.load_bytes(0, &encode_i(OP_SYSTEM, 0, FUNCT3_PRIV, 0, IMM_ECALL).to_le_bytes());
        let result = hart.step();
        assert_eq!(result, Err(Exception::EnvironmentCall));
    }

    #[test]
    fn ebreak_raises_breakpoint_exception() {
        let mut hart = TestHart::default();
        hart.io.load_bytes(0, &encode_i(OP_SYSTEM, 0, FUNCT3_PRIV, 0, IMM_EBREAK).to_le_bytes());
        let result = hart.step();
        assert_eq!(result, Err(Exception::Breakpoint));
    }

    #[test]
    fn csrrs_can_read_without_writing_when_rs1_is_x0() {
        let mut hart = TestHart::default();
        hart.csr.mstatus = 0x7;
        let instr = encode_i(OP_SYSTEM, 5, FUNCT3_CSRRS, 0, 0x300);
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.x(5), 0x7);
        assert_eq!(hart.csr.mstatus, 0x7);
    }

    #[test]
    fn csrrwi_is_decoded_but_has_no_effect() {
        let mut hart = TestHart::default();
        hart.csr.mstatus = 0x1;
        let instr = encode_i(OP_SYSTEM, 5, FUNCT3_CSRRWI, 3, 0x300);
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.x(5), 0);
        assert_eq!(hart.csr.mstatus, 0x1);
        assert_eq!(hart.pc, 4);
    }
}
