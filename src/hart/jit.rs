//! Safe threaded-code JIT backend.
//!
//! The reference implementation (`riscv_jit.h`) translates a basic
//! block into raw x86-64 machine code and calls through a raw function
//! pointer into an executable page. That is `unsafe` self-modifying
//! code generation with no equivalent under this crate's
//! `#![forbid(unsafe_code)]`. This backend keeps the block-cache
//! contract from section 4.9 — cache keyed by starting PC, straight-
//! line translation up to and including the first control-transfer
//! instruction, observational equivalence with the interpreter — but
//! the "native code" a block compiles to is a `Vec` of boxed closures,
//! one per instruction, each capturing its already-fetched instruction
//! word so that re-running a cached block skips the fetch and opcode
//! dispatch match on every subsequent visit and goes straight to the
//! handler.
//!
//! Cycle accounting and exception checking still happen once per
//! closure, exactly as the interpreter's `step` does one fetch-decode-
//! execute at a time, so a block can be interrupted mid-way by either
//! the cycle budget or a latched exception without producing a
//! different externally observable trace than stepping instruction by
//! instruction.

use std::collections::HashMap;

use crate::decode::opcode;
use crate::error::Exception;
use crate::hart::{HandlerResult, Hart};
use crate::io::HartIo;
use crate::opcodes::*;

type Op<IO, U> = Box<dyn Fn(&mut Hart<IO, U>) -> HandlerResult>;

/// One basic block: the translated closures plus nothing else — the
/// block carries no cached hart state, only code, so it stays valid
/// across however many times it is re-entered until `reset` clears the
/// whole cache.
pub struct Block<IO: HartIo, U> {
    ops: Vec<Op<IO, U>>,
}

pub struct BlockCache<IO: HartIo, U> {
    blocks: HashMap<u32, Block<IO, U>>,
}

impl<IO: HartIo, U> Default for BlockCache<IO, U> {
    fn default() -> Self {
        BlockCache {
            blocks: HashMap::new(),
        }
    }
}

impl<IO: HartIo, U> BlockCache<IO, U> {
    /// Invalidate every cached block. Self-modifying guest code is not
    /// supported; this is only ever called from `Hart::reset`.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

/// Straight-line code longer than this without a control-transfer
/// instruction is translated in chunks rather than one unbounded
/// block, so a pathological program can't make block translation scan
/// memory forever.
const MAX_BLOCK_LEN: usize = 64;

fn is_known_opcode(op: u32) -> bool {
    matches!(
        op,
        OP_LOAD
            | OP_LOAD_FP
            | OP_MISC_MEM
            | OP_IMM
            | OP_AUIPC
            | OP_STORE
            | OP_STORE_FP
            | OP_AMO
            | OP
            | OP_LUI
            | OP_MADD
            | OP_MSUB
            | OP_NMSUB
            | OP_NMADD
            | OP_FP
            | OP_BRANCH
            | OP_JALR
            | OP_JAL
            | OP_SYSTEM
    )
}

/// Branch, jump, JALR and SYSTEM (ECALL/EBREAK/CSR) are the
/// control-transfer family a basic block ends on, per the glossary's
/// definition. An opcode outside the known set also ends the block:
/// the interpreter would raise `IllegalInstruction` on it, so there is
/// nothing straight-line left to translate past it.
fn is_block_terminator(op: u32) -> bool {
    matches!(op, OP_BRANCH | OP_JALR | OP_JAL | OP_SYSTEM) || !is_known_opcode(op)
}

/// Decode forward from `start_pc`, probing memory without mutating
/// hart state, and build the closure list for one block. A probe
/// failure on the very first instruction is the same fault `fetch`
/// would raise; a probe failure further ahead just truncates the block
/// at the last instruction that probed successfully, since those later
/// instructions have not been retired and must not spuriously raise.
fn translate<IO: HartIo, U>(hart: &mut Hart<IO, U>, start_pc: u32) -> Result<Block<IO, U>, Exception> {
    let mut ops: Vec<Op<IO, U>> = Vec::new();
    let mut addr = start_pc;
    for i in 0..MAX_BLOCK_LEN {
        let instr = match hart.io.mem_ifetch(addr) {
            Ok(instr) => instr,
            Err(e) => {
                if i == 0 {
                    return Err(Exception::from(e));
                }
                break;
            }
        };
        let op_bits = opcode(instr);
        let terminates = is_block_terminator(op_bits);
        ops.push(Box::new(move |h: &mut Hart<IO, U>| h.dispatch(instr)));
        if terminates {
            break;
        }
        addr = addr.wrapping_add(4);
    }
    Ok(Block { ops })
}

impl<IO: HartIo, U> Hart<IO, U> {
    /// Run (translating first, on a cache miss) one basic block
    /// starting at the current PC. Stops early if the cycle budget is
    /// exhausted or an exception is latched partway through the block,
    /// so the observable cycle count and exception timing match the
    /// interpreter running the same program one instruction at a time.
    pub(crate) fn run_block(&mut self, target: u64) -> Result<(), Exception> {
        let start_pc = self.pc;
        let block = match self.jit_cache.blocks.remove(&start_pc) {
            Some(block) => block,
            None => translate(self, start_pc)?,
        };
        let mut outcome = Ok(());
        for op in &block.ops {
            if self.csr.cycle >= target || self.exception().is_some() {
                break;
            }
            let result = op(self);
            self.csr.cycle = self.csr.cycle.wrapping_add(1);
            if let Err(ex) = result {
                self.raise_exception(ex);
                outcome = Err(ex);
                break;
            }
        }
        self.jit_cache.blocks.insert(start_pc, block);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use crate::io::FlatMemory;

    type TestHart = Hart<FlatMemory>;
    use super::*;

    fn encode_i(opcode: u32, rd: u8, funct3: u32, rs1: u8, imm: u32) -> u32 {
        ((imm & 0xfff) << 20) | ((rs1 as u32) << 15) | (funct3 << 12) | ((rd as u32) << 7) | opcode
    }

    /// A JIT-driven run produces the same final register file, PC and
    /// cycle count as a plain interpreter `step` loop over the same
    /// program — the equivalence property section 4.9 requires.
    #[test]
    fn jit_run_matches_interpreter_step_loop() {
        use crate::opcodes::{FUNCT3_ADDI, OP_IMM};

        let mut jit_hart = TestHart::default();
        let mut stepped_hart = TestHart::default();
        for addr in (0..20).step_by(4) {
            let instr = encode_i(OP_IMM, 5, FUNCT3_ADDI, 5, 1);
            jit_hart.io.load_bytes(addr, &instr.to_le_bytes());
            stepped_hart.io.load_bytes(addr, &instr.to_le_bytes());
        }

        jit_hart.run(5).unwrap();
        for _ in 0..5 {
            stepped_hart.step().unwrap();
        }

        assert_eq!(jit_hart.x(5), stepped_hart.x(5));
        assert_eq!(jit_hart.pc, stepped_hart.pc);
        assert_eq!(jit_hart.cycle(), stepped_hart.cycle());
    }

    /// A block boundary at a taken branch is respected: re-entering at
    /// the branch target builds a fresh block rather than running past
    /// the control-transfer instruction.
    #[test]
    fn block_cache_rebuilds_after_branch_retargets_pc() {
        use crate::opcodes::{FUNCT3_ADDI, FUNCT3_BEQ, OP_BRANCH, OP_IMM};

        let mut hart = TestHart::default();
        // beq x0, x0, 8 -- always taken, skips the next instruction
        hart.io
            .load_bytes(0, &encode_b(OP_BRANCH, FUNCT3_BEQ, 0, 0, 8).to_le_bytes());
        hart.io
            .load_bytes(4, &encode_i(OP_IMM, 1, FUNCT3_ADDI, 1, 1).to_le_bytes());
        hart.io
            .load_bytes(8, &encode_i(OP_IMM, 1, FUNCT3_ADDI, 1, 100).to_le_bytes());
        hart.run(2).unwrap();
        assert_eq!(hart.x(1), 100);
        assert_eq!(hart.pc, 12);
    }

    fn encode_b(opcode: u32, funct3: u32, rs1: u8, rs2: u8, imm: i32) -> u32 {
        let imm = imm as u32;
        let imm12 = (imm >> 12) & 0x1;
        let imm11 = (imm >> 11) & 0x1;
        let imm10_5 = (imm >> 5) & 0x3f;
        let imm4_1 = (imm >> 1) & 0xf;
        (imm12 << 31)
            | (imm10_5 << 25)
            | ((rs2 as u32) << 20)
            | ((rs1 as u32) << 15)
            | (funct3 << 12)
            | (imm4_1 << 8)
            | (imm11 << 7)
            | opcode
    }
}
