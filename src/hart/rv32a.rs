//! RV32A: atomic memory operations.
//!
//! This is a single-hart model: there is no reservation set tracking
//! behind LR.W/SC.W. LR.W behaves as a plain word load; SC.W behaves as
//! a plain word store that always "succeeds" (`rd` is unconditionally
//! set to zero). This is an explicit, documented narrowing of the A
//! extension rather than an oversight — a real reservation would only
//! ever be observable with a second hart, which this simulator does
//! not have. `aq`/`rl` are decoded and otherwise ignored, for the same
//! reason.
//!
//! The address for every AMO op is `X[rs1]` with no offset.

use crate::decode::decode_rtype;
use crate::error::Exception;
use crate::hart::{HandlerResult, Hart};
use crate::io::HartIo;
use crate::opcodes::*;
use crate::utils::extract_field;

pub fn execute_amo<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_rtype(instr);
    let funct5 = extract_field(fields.funct7, 6, 2);
    let addr = hart.x(fields.rs1);
    let rs2_value = hart.x(fields.rs2);

    match funct5 {
        FUNCT5_LR_W => {
            let old = hart.io.mem_read_w(addr)?;
            hart.set_x(fields.rd, old);
        }
        FUNCT5_SC_W => {
            hart.io.mem_write_w(addr, rs2_value)?;
            hart.set_x(fields.rd, 0);
        }
        _ => {
            // rd receives the pre-operation value read from memory.
            let old = hart.io.mem_read_w(addr)?;
            let new_value = match funct5 {
                FUNCT5_AMOSWAP_W => rs2_value,
                FUNCT5_AMOADD_W => old.wrapping_add(rs2_value),
                FUNCT5_AMOXOR_W => old ^ rs2_value,
                FUNCT5_AMOAND_W => old & rs2_value,
                FUNCT5_AMOOR_W => old | rs2_value,
                FUNCT5_AMOMIN_W => ((old as i32).min(rs2_value as i32)) as u32,
                FUNCT5_AMOMAX_W => ((old as i32).max(rs2_value as i32)) as u32,
                FUNCT5_AMOMINU_W => old.min(rs2_value),
                FUNCT5_AMOMAXU_W => old.max(rs2_value),
                _ => return Err(Exception::IllegalInstruction(instr)),
            };
            hart.io.mem_write_w(addr, new_value)?;
            hart.set_x(fields.rd, old);
        }
    }
    hart.increment_pc();
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FlatMemory;

    type TestHart = Hart<FlatMemory>;

    fn encode_amo(funct5: u32, rd: u8, rs1: u8, rs2: u8) -> u32 {
        let funct7 = (funct5 << 2) & 0x7f;
        (funct7 << 25) | ((rs2 as u32) << 20) | ((rs1 as u32) << 15) | (0b010 << 12) | ((rd as u32) << 7) | OP_AMO
    }

    #[test]
    fn lr_w_is_a_plain_load() {
        let mut hart = TestHart::default();
        hart.io.load_bytes(0x100, &0x1234_5678u32.to_le_bytes());
        hart.set_x(1, 0x100);
        let instr = encode_amo(FUNCT5_LR_W, 2, 1, 0);
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.x(2), 0x1234_5678);
    }

    #[test]
    fn sc_w_always_succeeds_and_zeroes_rd() {
        let mut hart = TestHart::default();
        hart.set_x(1, 0x100);
        hart.set_x(2, 0xaaaa_aaaa);
        let instr = encode_amo(FUNCT5_SC_W, 3, 1, 2);
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.x(3), 0);
        assert_eq!(hart.io.mem_read_w(0x100).unwrap(), 0xaaaa_aaaa);
    }

    #[test]
    fn amoadd_w_returns_pre_op_value_and_stores_sum() {
        let mut hart = TestHart::default();
        hart.io.load_bytes(0x100, &10u32.to_le_bytes());
        hart.set_x(1, 0x100);
        hart.set_x(2, 5);
        let instr = encode_amo(FUNCT5_AMOADD_W, 3, 1, 2);
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.x(3), 10);
        assert_eq!(hart.io.mem_read_w(0x100).unwrap(), 15);
    }

    #[test]
    fn amoswap_w_exchanges_register_and_memory() {
        let mut hart = TestHart::default();
        hart.io.load_bytes(0x100, &1u32.to_le_bytes());
        hart.set_x(1, 0x100);
        hart.set_x(2, 99);
        let instr = encode_amo(FUNCT5_AMOSWAP_W, 3, 1, 2);
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.x(3), 1);
        assert_eq!(hart.io.mem_read_w(0x100).unwrap(), 99);
    }
}
