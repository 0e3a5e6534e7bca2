//! RV32I base integer instruction handlers, plus the FENCE/FENCE.I
//! Zifencei pair (decoded from the same MISC-MEM opcode).
//!
//! Every handler returns whether it already advanced the program
//! counter sequentially (`Ok(true)`) or set it itself (`Ok(false)`),
//! per the dispatch contract in `hart.rs`.

use crate::decode::{decode_btype, decode_itype, decode_jtype, decode_rtype, decode_stype, decode_utype, sign_extend};
use crate::error::Exception;
use crate::hart::{Hart, HandlerResult};
use crate::io::HartIo;
use crate::opcodes::*;

pub fn execute_lui<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_utype(instr);
    hart.set_x(fields.rd, fields.imm << 12);
    hart.increment_pc();
    Ok(true)
}

pub fn execute_auipc<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_utype(instr);
    let value = hart.pc.wrapping_add(fields.imm << 12);
    hart.set_x(fields.rd, value);
    hart.increment_pc();
    Ok(true)
}

/// JAL links and jumps even when the target turns out to be
/// misaligned: the return address is written and the PC is moved
/// before the alignment check can raise, matching the reference
/// interpreter's link-then-jump-then-check order.
pub fn execute_jal<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_jtype(instr);
    let return_address = hart.pc.wrapping_add(4);
    let offset = sign_extend(fields.imm, 20);
    let jumped = hart.jump_relative_to_pc(offset);
    hart.set_x(fields.rd, return_address);
    jumped?;
    Ok(false)
}

/// Same ordering as `execute_jal`: the link register and PC are
/// committed before a misaligned target raises.
pub fn execute_jalr<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_itype(instr);
    let return_address = hart.pc.wrapping_add(4);
    let offset = sign_extend(fields.imm, 11);
    let base = hart.x(fields.rs1);
    let target_pc = 0xffff_fffe & base.wrapping_add(offset);
    let jumped = hart.jump_to_address(target_pc);
    hart.set_x(fields.rd, return_address);
    jumped?;
    Ok(false)
}

fn branch_taken<IO: HartIo, U>(hart: &Hart<IO, U>, instr: u32) -> bool {
    let fields = decode_btype(instr);
    let src1 = hart.x(fields.rs1);
    let src2 = hart.x(fields.rs2);
    match fields.funct3 {
        FUNCT3_BEQ => src1 == src2,
        FUNCT3_BNE => src1 != src2,
        FUNCT3_BLT => (src1 as i32) < (src2 as i32),
        FUNCT3_BGE => (src1 as i32) >= (src2 as i32),
        FUNCT3_BLTU => src1 < src2,
        FUNCT3_BGEU => src1 >= src2,
        _ => unreachable!("decoded branch funct3 is always one of the six branch mnemonics"),
    }
}

/// All three control-transfer opcodes (branch, JAL, JALR) always return
/// `Ok(false)`: a branch not taken still advances the PC itself (to
/// keep the "who owns the PC" contract uniform), exactly as the
/// reference interpreter's `op_branch` always returns `false`.
pub fn execute_branch<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_btype(instr);
    if branch_taken(hart, instr) {
        let offset = sign_extend(fields.imm, 12);
        hart.jump_relative_to_pc(offset)?;
    } else {
        hart.increment_pc();
    }
    Ok(false)
}

fn load_address<IO: HartIo, U>(hart: &Hart<IO, U>, fields: &crate::decode::Itype) -> u32 {
    let base = hart.x(fields.rs1);
    base.wrapping_add(sign_extend(fields.imm, 11))
}

pub fn execute_load<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_itype(instr);
    let addr = load_address(hart, &fields);
    let value = match fields.funct3 {
        FUNCT3_LB => sign_extend(hart.io.mem_read_b(addr)? as u32, 7),
        FUNCT3_LBU => hart.io.mem_read_b(addr)? as u32,
        FUNCT3_LH => sign_extend(hart.io.mem_read_s(addr)? as u32, 15),
        FUNCT3_LHU => hart.io.mem_read_s(addr)? as u32,
        FUNCT3_LW => hart.io.mem_read_w(addr)?,
        _ => return Err(Exception::IllegalInstruction(instr)),
    };
    hart.set_x(fields.rd, value);
    hart.increment_pc();
    Ok(true)
}

pub fn execute_store<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_stype(instr);
    let base = hart.x(fields.rs1);
    let addr = base.wrapping_add(sign_extend(fields.imm, 11));
    let value = hart.x(fields.rs2);
    match fields.funct3 {
        FUNCT3_SB => hart.io.mem_write_b(addr, value as u8)?,
        FUNCT3_SH => hart.io.mem_write_s(addr, value as u16)?,
        FUNCT3_SW => hart.io.mem_write_w(addr, value)?,
        _ => return Err(Exception::IllegalInstruction(instr)),
    };
    hart.increment_pc();
    Ok(true)
}

pub fn execute_op_imm<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_itype(instr);
    let src = hart.x(fields.rs1);
    let imm = sign_extend(fields.imm, 11);
    let value = match fields.funct3 {
        FUNCT3_ADDI => src.wrapping_add(imm),
        FUNCT3_SLTI => ((src as i32) < (imm as i32)) as u32,
        FUNCT3_SLTIU => (src < imm) as u32,
        FUNCT3_XORI => src ^ imm,
        FUNCT3_ORI => src | imm,
        FUNCT3_ANDI => src & imm,
        FUNCT3_SLLI => src << (fields.imm & 0x1f),
        FUNCT3_SRLI_SRAI => {
            // The 12-bit immediate, not the canonical funct7 high bit,
            // selects SRAI: any bit outside the low 5 bits being set
            // means arithmetic (sign-propagating) shift, matching the
            // reference interpreter bit for bit.
            let shamt = fields.imm & 0x1f;
            if fields.imm & !0x1f != 0 {
                (((src as i32) >> shamt) as u32)
            } else {
                src >> shamt
            }
        }
        _ => return Err(Exception::IllegalInstruction(instr)),
    };
    hart.set_x(fields.rd, value);
    hart.increment_pc();
    Ok(true)
}

pub fn execute_op<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_rtype(instr);
    #[cfg(feature = "m")]
    if fields.funct7 == FUNCT7_MULDIV {
        return crate::hart::rv32m::execute_muldiv(hart, instr);
    }
    let src1 = hart.x(fields.rs1);
    let src2 = hart.x(fields.rs2);
    let value = match (fields.funct3, fields.funct7) {
        (FUNCT3_ADD_SUB, FUNCT7_NORMAL) => src1.wrapping_add(src2),
        (FUNCT3_ADD_SUB, FUNCT7_SUB_SRA) => src1.wrapping_sub(src2),
        (FUNCT3_SLT, _) => ((src1 as i32) < (src2 as i32)) as u32,
        (FUNCT3_SLTU, _) => (src1 < src2) as u32,
        (FUNCT3_XOR, _) => src1 ^ src2,
        (FUNCT3_OR, _) => src1 | src2,
        (FUNCT3_AND, _) => src1 & src2,
        (FUNCT3_SLL, _) => src1 << (src2 & 0x1f),
        (FUNCT3_SRL_SRA, FUNCT7_NORMAL) => src1 >> (src2 & 0x1f),
        (FUNCT3_SRL_SRA, FUNCT7_SUB_SRA) => (((src1 as i32) >> (src2 & 0x1f)) as u32),
        _ => return Err(Exception::IllegalInstruction(instr)),
    };
    hart.set_x(fields.rd, value);
    hart.increment_pc();
    Ok(true)
}

/// MISC-MEM: FENCE is a no-op in a single-hart in-order model; FENCE.I
/// (Zifencei) likewise, since there is no separate instruction cache to
/// flush — any JIT block cache is invalidated by `reset` only, as
/// documented on `Hart::reset`.
pub fn execute_misc_mem<IO: HartIo, U>(hart: &mut Hart<IO, U>, instr: u32) -> HandlerResult {
    let fields = decode_itype(instr);
    match fields.funct3 {
        FUNCT3_FENCE => {
            hart.increment_pc();
            Ok(true)
        }
        FUNCT3_FENCE_I => {
            if !cfg!(feature = "zifencei") {
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

    fn encode_j(opcode: u32, rd: u8, imm: i32) -> u32 {
        let imm = imm as u32;
        let imm20 = (imm >> 20) & 0x1;
        let imm19_12 = (imm >> 12) & 0xff;
        let imm11 = (imm >> 11) & 0x1;
        let imm10_1 = (imm >> 1) & 0x3ff;
        (imm20 << 31) | (imm10_1 << 21) | (imm11 << 20) | (imm19_12 << 12) | ((rd as u32) << 7) | opcode
    }

    #[test]
    fn srai_selected_by_any_bit_outside_low_five_of_immediate() {
        let mut hart = TestHart::default();
        hart.set_x(1, 0x8000_0000);
        // Non-canonical: bit 10 of the immediate set, not just bit 10 of
        // a would-be funct7. The reference selects SRAI whenever any bit
        // outside imm[4:0] is set, regardless of which bit.
        let instr = encode_i(OP_IMM, 2, FUNCT3_SRLI_SRAI, 1, 0x400);
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.x(2), 0xffff_ffff);
    }

    #[test]
    fn srli_when_no_bit_outside_low_five_is_set() {
        let mut hart = TestHart::default();
        hart.set_x(1, 0x8000_0000);
        let instr = encode_i(OP_IMM, 2, FUNCT3_SRLI_SRAI, 1, 1);
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.x(2), 0x4000_0000);
    }

    #[test]
    fn addi_sign_extends_negative_immediate() {
        let mut hart = TestHart::default();
        hart.set_x(1, 10);
        let instr = encode_i(OP_IMM, 2, FUNCT3_ADDI, 1, 0xfff);
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.x(2), 9);
    }

    #[test]
    fn fence_i_is_a_no_op_that_advances_pc() {
        let instr = encode_i(OP_MISC_MEM, 0, FUNCT3_FENCE_I, 0, 0);
        let mut hart = TestHart::default();
        hart.io.load_bytes(0, &instr.to_le_bytes());
        hart.step().unwrap();
        assert_eq!(hart.pc, 4);
    }

    /// A JAL to a misaligned target still links the return address and
    /// commits the PC to that target before the exception is raised.
    #[test]
    fn jal_to_misaligned_target_still_links_and_commits_pc() {
        let mut hart = TestHart::default();
        // jal x1, 2 -- target 0 + 2, misaligned
        hart.io.load_bytes(0, &encode_j(OP_JAL, 1, 2).to_le_bytes());
        let result = hart.step();
        assert_eq!(result, Err(Exception::InstructionAddressMisaligned));
        assert_eq!(hart.x(1), 4);
        assert_eq!(hart.pc, 2);
    }

    /// Same ordering for JALR: link and PC commit before the
    /// misalignment exception is raised.
    #[test]
    fn jalr_to_misaligned_target_still_links_and_commits_pc() {
        let mut hart = TestHart::default();
        // jalr x2, x0, 2 -- target (0 + 2) & ~1 = 2, misaligned
        hart.io.load_bytes(0, &encode_i(OP_JALR, 2, 0, 0, 2).to_le_bytes());
        let result = hart.step();
        assert_eq!(result, Err(Exception::InstructionAddressMisaligned));
        assert_eq!(hart.x(2), 4);
        assert_eq!(hart.pc, 2);
    }
}
