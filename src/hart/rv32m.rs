//! RV32M: integer multiply/divide.
//!
//! DIV/DIVU/REM/REMU implement the RISC-V-defined results for
//! divide-by-zero and for the INT32_MIN / -1 signed-overflow case
//! rather than panicking or relying on `wrapping_div`/`wrapping_rem`'s
//! native behaviour (which panics on divide-by-zero in Rust) — these
//! are the two edge cases the unprivileged specification pins down
//! exactly, and a hart that panics on `DIV x, x, zero` would fail the
//! most basic program that checks for division by zero.

use crate::decode::decode_rtype;
use crate::error::Exception;
use crate::hart::{HandlerResult, Hart};
use crate::io::HartIo;
use crate::opcodes::*;

fn reg_reg<IO: HartIo, U>(hart: &Hart<IO, U>, instr: u32) -> (i32, i32, u32, u32, u8, u32) {
    let fields = decode_rtype(instr);
    let src1 = hart.x(fields.rs1);
    let src2 = hart.x(fields.rs2);
    (src1 as i32, src2 as i32, src1, src2, fields.rd, fields.funct3)
}

pub fn execute_muldiv<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let (signed1, signed2, src1, src2, rd, funct3) = reg_reg(hart, instr);
    let value = match funct3 {
        FUNCT3_MUL => signed1.wrapping_mul(signed2) as u32,
        FUNCT3_MULH => {
            let product = (signed1 as i64).wrapping_mul(signed2 as i64);
            (product >> 32) as u32
        }
        FUNCT3_MULHSU => {
            let product = (signed1 as i64).wrapping_mul(src2 as i64);
            (product >> 32) as u32
        }
        FUNCT3_MULHU => {
            let product = (src1 as u64).wrapping_mul(src2 as u64);
            (product >> 32) as u32
        }
        FUNCT3_DIV => {
            if src2 == 0 {
                u32::MAX
            } else if signed2 == -1 && src1 == 0x8000_0000 {
                src1
            } else {
                (signed1.wrapping_div(signed2)) as u32
            }
        }
        FUNCT3_DIVU => {
            if src2 == 0 {
                u32::MAX
            } else {
                src1.wrapping_div(src2)
            }
        }
        FUNCT3_REM => {
            if src2 == 0 {
                src1
            } else if signed2 == -1 && src1 == 0x8000_0000 {
                0
            } else {
                (signed1.wrapping_rem(signed2)) as u32
            }
        }
        FUNCT3_REMU => {
            if src2 == 0 {
                src1
            } else {
                src1.wrapping_rem(src2)
            }
        }
        _ => return Err(Exception::IllegalInstruction(instr)),
    };
    hart.set_x(rd, value);
    hart.increment_pc();
    Ok(true)
}
