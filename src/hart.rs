//! The hart: its state, its dispatch table, and its run loop.
//!
//! A `Hart<IO>` is a single 32-bit RISC-V hardware thread running at a
//! single privilege level with no notion of virtual memory: the
//! simplest execution environment the unprivileged specification
//! describes. All interaction with the outside world — instruction
//! fetch, every load and store, ECALL and EBREAK — goes through the
//! `IO: HartIo` the hart is parameterised over.

use crate::csr::Csr;
use crate::decode::opcode;
use crate::error::Exception;
use crate::io::HartIo;
use crate::registers::Registers;

pub mod rv32i;
pub mod rv32m;
pub mod rv32zicsr;

#[cfg(feature = "a")]
pub mod rv32a;
#[cfg(feature = "f")]
pub mod rv32f;
#[cfg(feature = "jit")]
pub mod jit;

/// Everything a dispatch handler may change: a `true` return means it
/// already advanced the program counter sequentially (pc += 4); `false`
/// means it set the program counter itself (a taken branch, a jump, or
/// any control-transfer instruction, taken or not — see the run loop).
pub type HandlerResult = Result<bool, Exception>;

/// A single 32-bit RISC-V hart.
///
/// `IO` is the host I/O contract; `U` is an opaque slot for
/// caller-defined userdata threaded through without the hart ever
/// inspecting it (a debugger's breakpoint table, a test harness's
/// instruction trace, ...).
pub struct Hart<IO: HartIo, U = ()> {
    pub x: Registers,
    #[cfg(feature = "f")]
    pub f: [f32; 32],
    pub pc: u32,
    pub csr: Csr,
    exception: Option<Exception>,
    pub io: IO,
    pub userdata: U,
    #[cfg(feature = "jit")]
    jit_cache: jit::BlockCache<IO, U>,
}

impl<IO: HartIo + Default, U: Default> Default for Hart<IO, U> {
    fn default() -> Self {
        Hart::new(IO::default(), U::default())
    }
}

const DEFAULT_STACK_ADDR: u32 = 0xffff_fff0;

impl<IO: HartIo, U> Hart<IO, U> {
    /// Equivalent to the reference's `rv_create` + `rv_reset`: build a
    /// fresh hart with PC at zero, the stack pointer preloaded with a
    /// default stack address, every other register and CSR zeroed.
    pub fn new(io: IO, userdata: U) -> Self {
        let mut hart = Hart {
            x: Registers::default(),
            #[cfg(feature = "f")]
            f: [0.0; 32],
            pc: 0,
            csr: Csr::default(),
            exception: None,
            io,
            userdata,
            #[cfg(feature = "jit")]
            jit_cache: jit::BlockCache::default(),
        };
        hart.reset(0);
        hart
    }

    /// Reset to a clean architectural state with the program counter
    /// set to `reset_pc`. Clears the exception latch, zeroes every
    /// register except `sp` (x2), which is preloaded with a default
    /// stack address, and zeroes every CSR. Also the only thing that
    /// invalidates the JIT block cache.
    pub fn reset(&mut self, reset_pc: u32) {
        self.x.reset();
        self.x.write(2, DEFAULT_STACK_ADDR).expect("x2 is a valid register index");
        #[cfg(feature = "f")]
        {
            self.f = [0.0; 32];
        }
        self.pc = reset_pc;
        self.csr.reset();
        self.exception = None;
        #[cfg(feature = "jit")]
        self.jit_cache.clear();
    }

    pub fn x(&self, which: u8) -> u32 {
        self.x.read(which).expect("decoded register indices are always in range 0..32")
    }

    pub fn set_x(&mut self, which: u8, value: u32) {
        self.x
            .write(which, value)
            .expect("decoded register indices are always in range 0..32");
    }

    pub fn increment_pc(&mut self) {
        self.pc = self.pc.wrapping_add(4);
    }

    pub fn exception(&self) -> Option<Exception> {
        self.exception
    }

    pub fn raise_exception(&mut self, ex: Exception) {
        self.exception = Some(ex);
    }

    pub fn cycle(&self) -> u64 {
        self.csr.cycle
    }

    fn check_address_aligned(address: u32) -> Result<(), Exception> {
        if address % 4 != 0 {
            Err(Exception::InstructionAddressMisaligned)
        } else {
            Ok(())
        }
    }

    /// Commit `target_pc` to the program counter and then check its
    /// alignment. The target is written unconditionally, even when it
    /// turns out to be misaligned: a taken branch or jump to a
    /// misaligned address still moves the PC there before the
    /// exception is raised, matching the reference interpreter (the PC
    /// is updated first, then tested for misalignment).
    pub fn jump_to_address(&mut self, target_pc: u32) -> Result<(), Exception> {
        self.pc = target_pc;
        Self::check_address_aligned(target_pc)
    }

    pub fn jump_relative_to_pc(&mut self, pc_relative: u32) -> Result<(), Exception> {
        self.jump_to_address(self.pc.wrapping_add(pc_relative))
    }

    /// Fetch and decode the instruction dispatch is about to run, without
    /// running it. Used by disassembling front ends and the JIT's
    /// block-boundary detector.
    pub fn fetch(&mut self) -> Result<u32, Exception> {
        Self::check_address_aligned(self.pc)?;
        self.io.mem_ifetch(self.pc).map_err(Exception::from)
    }

    /// Dispatch a single already-fetched instruction word, indexing the
    /// fixed 32-entry table by bits [6:2] of the opcode (bits [1:0] are
    /// always `0b11` for a 32-bit instruction and carry no information).
    fn dispatch(&mut self, instr: u32) -> HandlerResult {
        use crate::opcodes::*;
        let op = opcode(instr);
        match op {
            OP_LOAD => rv32i::execute_load(self, instr),
            OP_MISC_MEM => rv32i::execute_misc_mem(self, instr),
            OP_IMM => rv32i::execute_op_imm(self, instr),
            OP_AUIPC => rv32i::execute_auipc(self, instr),
            OP_STORE => rv32i::execute_store(self, instr),
            #[cfg(feature = "a")]
            OP_AMO => rv32a::execute_amo(self, instr),
            OP => rv32i::execute_op(self, instr),
            OP_LUI => rv32i::execute_lui(self, instr),
            #[cfg(feature = "f")]
            OP_MADD => rv32f::execute_fmadd(self, instr),
            #[cfg(feature = "f")]
            OP_MSUB => rv32f::execute_fmsub(self, instr),
            #[cfg(feature = "f")]
            OP_NMSUB => rv32f::execute_fnmsub(self, instr),
            #[cfg(feature = "f")]
            OP_NMADD => rv32f::execute_fnmadd(self, instr),
            #[cfg(feature = "f")]
            OP_FP => rv32f::execute_op_fp(self, instr),
            #[cfg(feature = "f")]
            OP_LOAD_FP => rv32f::execute_flw(self, instr),
            #[cfg(feature = "f")]
            OP_STORE_FP => rv32f::execute_fsw(self, instr),
            OP_BRANCH => rv32i::execute_branch(self, instr),
            OP_JALR => rv32i::execute_jalr(self, instr),
            OP_JAL => rv32i::execute_jal(self, instr),
            OP_SYSTEM => rv32zicsr::execute_system(self, instr),
            _ => Err(Exception::IllegalInstruction(instr)),
        }
    }

    /// Run exactly one instruction: fetch, dispatch, and (whether the
    /// handler ran to completion or raised an exception) retire one
    /// cycle. Returns once either this one instruction has retired or
    /// an exception has been latched onto the hart.
    pub fn step(&mut self) -> Result<(), Exception> {
        let result = self.fetch().and_then(|instr| self.dispatch(instr));
        self.csr.cycle = self.csr.cycle.wrapping_add(1);
        match result {
            Ok(_) => Ok(()),
            Err(ex) => {
                self.raise_exception(ex);
                Err(ex)
            }
        }
    }

    /// Run until either `cycle_budget` cycles have retired (measured
    /// from the current value of the cycle counter, not from zero) or
    /// an exception is raised, matching the reference's `rv_step`
    /// contract exactly: the retired-instruction count, not a
    /// wall-clock or other external signal, is the only budget.
    pub fn run(&mut self, cycle_budget: u64) -> Result<(), Exception> {
        let target = self.csr.cycle.wrapping_add(cycle_budget);
        while self.csr.cycle < target && self.exception.is_none() {
            #[cfg(feature = "jit")]
            self.run_block(target)?;
            #[cfg(not(feature = "jit"))]
            self.step()?;
        }
        Ok(())
    }
}
