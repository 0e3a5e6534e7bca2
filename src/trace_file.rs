//! A human-readable golden-trace file format for testing a hart.
//!
//! A trace file is plain text with `#` comments and two kinds of
//! section. A compulsory `.eeprom` section lists `addr instr` pairs (both
//! hex, whitespace-separated) to preload into memory. Any number of
//! `.trace.<cycle>` sections each list a handful of `key value`
//! properties (`pc`, `x<n>`, `uart`) that must hold once the hart has
//! advanced to that cycle count. This is the format `elf2trace` produces
//! from a compiled program and `emulate --trace` checks a run against.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, prelude::*, BufReader, LineWriter};

use itertools::{Itertools, PeekingNext};
use thiserror::Error;

use crate::decode::{decode_btype, decode_itype, decode_jtype, decode_rtype, decode_stype, decode_utype, opcode, sign_extend};
use crate::elf_utils::{load_elf, ElfError};
use crate::hart::Hart;
use crate::io::{FlatMemory, HartIo};
use crate::opcodes::*;

#[derive(Debug, Error)]
pub enum TraceFileError {
    #[error("missing section heading at start of file")]
    MissingSectionHeading,
    #[error("section {0} is not recognised/implemented")]
    UnrecognisedSection(String),
    #[error("error parsing entry {0} in .trace section")]
    ParseTraceSectionFailed(String),
    #[error("error processing ELF file: {0}")]
    ElfError(#[from] ElfError),
    #[error("trace file I/O error: {0}")]
    IoError(String),
}

impl From<io::Error> for TraceFileError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

/// If the line ends in a comment, remove it. If the result contains any
/// non-whitespace characters, return it as `Some`. Otherwise, return
/// `None` (covers empty lines and comment-only lines).
fn get_non_comment(line: String) -> Option<String> {
    let without_comment = &line[0..line.find('#').unwrap_or(line.len())];
    if without_comment.trim().is_empty() {
        None
    } else {
        Some(without_comment.to_string())
    }
}

/// Return true if the line begins with a dot (`.`).
fn is_section_header(line: &str) -> bool {
    line.starts_with('.')
}

fn get_addr_instr_tuple(non_comment_line: String) -> (u32, u32) {
    let terms: Vec<u32> = non_comment_line
        .split_whitespace()
        .map(|term| u32::from_str_radix(term, 16).expect("term should be hex"))
        .collect();
    if terms.len() != 2 {
        panic!("line length should be 2");
    }
    (terms[0], terms[1])
}

fn parse_dec_or_hex(value: &str) -> Result<u32, TraceFileError> {
    if value.len() > 2 && &value[0..2] == "0x" {
        u32::from_str_radix(&value[2..], 16)
    } else {
        value.parse()
    }
    .map_err(|_| TraceFileError::ParseTraceSectionFailed(value.to_string()))
}

fn get_trace_key_value_tuple(non_comment_line: String) -> Result<Property, TraceFileError> {
    let (key, value) = non_comment_line
        .split_once(char::is_whitespace)
        .ok_or_else(|| TraceFileError::ParseTraceSectionFailed(non_comment_line.to_string()))?;
    let value = value.trim();
    if key == "pc" {
        Ok(Property::Pc(parse_dec_or_hex(value)?))
    } else if let Some(reg_index_string) = key.strip_prefix('x') {
        let index: u8 = reg_index_string
            .parse()
            .map_err(|_| TraceFileError::ParseTraceSectionFailed(value.to_string()))?;
        let value = parse_dec_or_hex(value)?;
        Ok(Property::Reg { index, value })
    } else if key == "uart" {
        // Strip the surrounding quote marks; no validation performed.
        let value = value.replace("\\n", "\n");
        let mut chars = value.chars();
        chars.next();
        chars.next_back();
        Ok(Property::Uart(chars.collect()))
    } else {
        Err(TraceFileError::ParseTraceSectionFailed(value.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum TraceCheckFailed {
    #[error("cannot advance to cycle {required} from current value {current}")]
    CannotAdvanceToCycle { current: u64, required: u64 },
    #[error("expected property {expected:?}, found {found:?} at cycle {cycle}")]
    FailedCheck {
        cycle: u64,
        expected: Property,
        found: Property,
    },
    #[error("hart trapped with {0} before reaching cycle {1}")]
    Trapped(crate::error::Exception, u64),
}

/// Checks whether a property holds at a particular clock cycle.
pub trait TraceCheck {
    /// Advance to `trace_point.cycle` and then check that every
    /// property it lists is satisfied. Returns the first mismatch, if
    /// any; a hart that raises an exception before reaching the target
    /// cycle is also reported as a failure to check.
    fn check_trace_point(&mut self, trace_point: &TracePoint) -> Result<(), TraceCheckFailed>;
}

#[derive(Debug, PartialEq)]
pub enum Property {
    /// Value of the program counter.
    Pc(u32),
    /// The state of register `x{index}` should be `value`.
    Reg { index: u8, value: u32 },
    /// The UART buffer should have received this string since the last
    /// trace point (or since reset, for the first one).
    Uart(String),
}

/// A check that should hold at a particular clock cycle.
///
/// `cycle` corresponds to the `cycle` CSR: the number of retired
/// instructions since reset. The properties to be tested are stored in
/// `properties`.
#[derive(Debug)]
pub struct TracePoint {
    pub cycle: u64,
    pub properties: Vec<Property>,
}

#[derive(Debug)]
enum Section {
    Eeprom(BTreeMap<u32, u32>),
    Trace(TracePoint),
}

fn read_section<I>(lines: &mut I) -> Result<Section, TraceFileError>
where
    I: Iterator<Item = String> + PeekingNext,
{
    let first_line = lines.next().ok_or(TraceFileError::MissingSectionHeading)?;
    if first_line == ".eeprom" {
        let section_data = lines
            .peeking_take_while(|line| !is_section_header(line))
            .map(get_addr_instr_tuple)
            .collect();
        Ok(Section::Eeprom(section_data))
    } else if first_line.starts_with(".trace") {
        let cycle: u64 = first_line
            .strip_prefix(".trace.")
            .expect("prefix is present")
            .parse()
            .map_err(|_| TraceFileError::ParseTraceSectionFailed(first_line))?;
        let properties = lines
            .peeking_take_while(|line| !is_section_header(line))
            .map(get_trace_key_value_tuple)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Section::Trace(TracePoint { cycle, properties }))
    } else {
        Err(TraceFileError::UnrecognisedSection(first_line))
    }
}

/// Load a trace file, writing its `.eeprom` section into `memory` and
/// returning every `.trace.<cycle>` point found, sorted by cycle.
pub fn load_trace(memory: &mut FlatMemory, trace_file_path: &str) -> Result<Vec<TracePoint>, TraceFileError> {
    let file = File::open(trace_file_path)?;
    let reader = BufReader::new(file);

    let mut trace_points = Vec::new();
    let mut iter = reader
        .lines()
        .map_while(Result::ok)
        .filter_map(get_non_comment)
        .peekable();

    while iter.peek().is_some() {
        match read_section(&mut iter) {
            Ok(Section::Eeprom(section_data)) => {
                for (addr, instr) in section_data {
                    memory.load_bytes(addr, &instr.to_le_bytes());
                }
            }
            Ok(Section::Trace(trace_point)) => trace_points.push(trace_point),
            Err(TraceFileError::UnrecognisedSection(name)) => {
                println!("warning: unrecognised section {name}")
            }
            Err(e) => return Err(e),
        }
    }

    Ok(trace_points.into_iter().sorted_by_key(|point| point.cycle).collect())
}

impl<U> TraceCheck for Hart<FlatMemory, U> {
    fn check_trace_point(&mut self, trace_point: &TracePoint) -> Result<(), TraceCheckFailed> {
        if trace_point.cycle < self.cycle() {
            return Err(TraceCheckFailed::CannotAdvanceToCycle {
                current: self.cycle(),
                required: trace_point.cycle,
            });
        }
        let to_run = trace_point.cycle - self.cycle();
        if to_run > 0 {
            if let Err(e) = self.run(to_run) {
                return Err(TraceCheckFailed::Trapped(e, trace_point.cycle));
            }
        }
        for property in &trace_point.properties {
            let found = match property {
                Property::Pc(_) => Property::Pc(self.pc),
                Property::Reg { index, .. } => Property::Reg {
                    index: *index,
                    value: self.x(*index),
                },
                Property::Uart(_) => Property::Uart(self.io.flush_stdout()),
            };
            if &found != property {
                return Err(TraceCheckFailed::FailedCheck {
                    cycle: trace_point.cycle,
                    expected: property_clone(property),
                    found,
                });
            }
        }
        Ok(())
    }
}

fn property_clone(property: &Property) -> Property {
    match property {
        Property::Pc(v) => Property::Pc(*v),
        Property::Reg { index, value } => Property::Reg { index: *index, value: *value },
        Property::Uart(s) => Property::Uart(s.clone()),
    }
}

/// A short disassembly used only to annotate `.eeprom` entries in
/// generated trace files; not a general-purpose disassembler and not
/// exercised by the hart itself.
fn disassemble(instr: u32) -> String {
    match opcode(instr) {
        OP_LUI => {
            let f = decode_utype(instr);
            format!("lui x{}, 0x{:x}", f.rd, f.imm)
        }
        OP_AUIPC => {
            let f = decode_utype(instr);
            format!("auipc x{}, 0x{:x}", f.rd, f.imm)
        }
        OP_JAL => {
            let f = decode_jtype(instr);
            format!("jal x{}, {}", f.rd, sign_extend(f.imm, 20) as i32)
        }
        OP_JALR => {
            let f = decode_itype(instr);
            format!("jalr x{}, {}(x{})", f.rd, sign_extend(f.imm, 11) as i32, f.rs1)
        }
        OP_BRANCH => {
            let f = decode_btype(instr);
            let mnemonic = match f.funct3 {
                FUNCT3_BEQ => "beq",
                FUNCT3_BNE => "bne",
                FUNCT3_BLT => "blt",
                FUNCT3_BGE => "bge",
                FUNCT3_BLTU => "bltu",
                FUNCT3_BGEU => "bgeu",
                _ => "b?",
            };
            format!("{mnemonic} x{}, x{}, {}", f.rs1, f.rs2, sign_extend(f.imm, 12) as i32)
        }
        OP_LOAD => {
            let f = decode_itype(instr);
            let mnemonic = match f.funct3 {
                FUNCT3_LB => "lb",
                FUNCT3_LH => "lh",
                FUNCT3_LW => "lw",
                FUNCT3_LBU => "lbu",
                FUNCT3_LHU => "lhu",
                _ => "l?",
            };
            format!("{mnemonic} x{}, {}(x{})", f.rd, sign_extend(f.imm, 11) as i32, f.rs1)
        }
        OP_STORE => {
            let f = decode_stype(instr);
            let mnemonic = match f.funct3 {
                FUNCT3_SB => "sb",
                FUNCT3_SH => "sh",
                FUNCT3_SW => "sw",
                _ => "s?",
            };
            format!("{mnemonic} x{}, {}(x{})", f.rs2, sign_extend(f.imm, 11) as i32, f.rs1)
        }
        OP_IMM => {
            let f = decode_itype(instr);
            let mnemonic = match f.funct3 {
                FUNCT3_ADDI => "addi",
                FUNCT3_SLTI => "slti",
                FUNCT3_SLTIU => "sltiu",
                FUNCT3_XORI => "xori",
                FUNCT3_ORI => "ori",
                FUNCT3_ANDI => "andi",
                FUNCT3_SLLI => "slli",
                FUNCT3_SRLI_SRAI => "srli/srai",
                _ => "?i",
            };
            format!("{mnemonic} x{}, x{}, {}", f.rd, f.rs1, sign_extend(f.imm, 11) as i32)
        }
        OP => {
            let f = decode_rtype(instr);
            let mnemonic = match (f.funct3, f.funct7) {
                (FUNCT3_ADD_SUB, FUNCT7_NORMAL) => "add",
                (FUNCT3_ADD_SUB, FUNCT7_SUB_SRA) => "sub",
                (FUNCT3_SLT, _) => "slt",
                (FUNCT3_SLTU, _) => "sltu",
                (FUNCT3_XOR, _) => "xor",
                (FUNCT3_OR, _) => "or",
                (FUNCT3_AND, _) => "and",
                (FUNCT3_SLL, _) => "sll",
                (FUNCT3_SRL_SRA, FUNCT7_NORMAL) => "srl",
                (FUNCT3_SRL_SRA, FUNCT7_SUB_SRA) => "sra",
                (FUNCT3_MUL, FUNCT7_MULDIV) => "mul",
                (FUNCT3_MULH, FUNCT7_MULDIV) => "mulh",
                (FUNCT3_MULHSU, FUNCT7_MULDIV) => "mulhsu",
                (FUNCT3_MULHU, FUNCT7_MULDIV) => "mulhu",
                (FUNCT3_DIV, FUNCT7_MULDIV) => "div",
                (FUNCT3_DIVU, FUNCT7_MULDIV) => "divu",
                (FUNCT3_REM, FUNCT7_MULDIV) => "rem",
                (FUNCT3_REMU, FUNCT7_MULDIV) => "remu",
                _ => "?",
            };
            format!("{mnemonic} x{}, x{}, x{}", f.rd, f.rs1, f.rs2)
        }
        OP_MISC_MEM => "fence".to_string(),
        OP_SYSTEM => {
            let f = decode_itype(instr);
            match (f.funct3, f.imm) {
                (FUNCT3_PRIV, IMM_ECALL) => "ecall".to_string(),
                (FUNCT3_PRIV, IMM_EBREAK) => "ebreak".to_string(),
                (FUNCT3_CSRRW, _) => format!("csrrw x{}, 0x{:x}, x{}", f.rd, f.imm, f.rs1),
                (FUNCT3_CSRRS, _) => format!("csrrs x{}, 0x{:x}, x{}", f.rd, f.imm, f.rs1),
                (FUNCT3_CSRRC, _) => format!("csrrc x{}, 0x{:x}, x{}", f.rd, f.imm, f.rs1),
                _ => "system?".to_string(),
            }
        }
        _ => "unknown".to_string(),
    }
}

/// Convert an ELF file into a trace file's `.eeprom` section: every
/// nonzero word across the address range its allocatable sections
/// cover, annotated with a best-effort disassembly.
pub fn elf_to_trace_file(elf_path_in: &str, trace_path_out: &str) -> Result<(), TraceFileError> {
    let mut memory = FlatMemory::new();
    let loaded = load_elf(&mut memory, elf_path_in)?;

    let file = File::create(trace_path_out)?;
    let mut writer = LineWriter::new(file);
    writer.write_all(b".eeprom\n")?;

    let mut addr = loaded.low & !0x3;
    while addr < loaded.high {
        let word = memory.mem_read_w(addr).expect("FlatMemory reads never fail");
        if word != 0 {
            let asm = disassemble(word);
            writer.write_all(format!("{addr:08x}  {word:08x}  # {asm}\n").as_bytes())?;
        }
        addr = addr.wrapping_add(4);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_comment_strips_trailing_comment() {
        assert_eq!(get_non_comment("pc 0x100 # entry point".to_string()), Some("pc 0x100 ".to_string()));
    }

    #[test]
    fn non_comment_drops_comment_only_lines() {
        assert_eq!(get_non_comment("   # just a comment".to_string()), None);
    }

    #[test]
    fn parses_hex_and_decimal_values() {
        assert_eq!(parse_dec_or_hex("0x10").unwrap(), 16);
        assert_eq!(parse_dec_or_hex("16").unwrap(), 16);
    }

    #[test]
    fn parses_pc_and_register_properties() {
        match get_trace_key_value_tuple("pc 0x100".to_string()).unwrap() {
            Property::Pc(pc) => assert_eq!(pc, 0x100),
            other => panic!("expected Pc, got {other:?}"),
        }
        match get_trace_key_value_tuple("x5 42".to_string()).unwrap() {
            Property::Reg { index, value } => {
                assert_eq!(index, 5);
                assert_eq!(value, 42);
            }
            other => panic!("expected Reg, got {other:?}"),
        }
    }

    #[test]
    fn parses_uart_property_unescaping_newlines() {
        match get_trace_key_value_tuple("uart \"hi\\n\"".to_string()).unwrap() {
            Property::Uart(s) => assert_eq!(s, "hi\n"),
            other => panic!("expected Uart, got {other:?}"),
        }
    }

    #[test]
    fn load_trace_preloads_eeprom_and_returns_sorted_trace_points() {
        let path = std::env::temp_dir().join("riscvemu_trace_file_load_test.trace");
        std::fs::write(
            &path,
            "\
.eeprom
00000000 00000013
.trace.2
pc 0x4
x0 0
.trace.1
pc 0x0
",
        )
        .unwrap();
        let mut memory = FlatMemory::new();
        let points = load_trace(&mut memory, path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(memory.mem_read_w(0).unwrap(), 0x0000_0013);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].cycle, 1);
        assert_eq!(points[1].cycle, 2);
    }

    #[test]
    fn trace_check_passes_when_properties_match_after_advancing() {
        use crate::opcodes::{FUNCT3_ADDI, OP_IMM};

        let mut hart = Hart::<FlatMemory>::default();
        let instr = ((1u32 & 0xfff) << 20) | (5 << 15) | (FUNCT3_ADDI << 12) | (5 << 7) | OP_IMM;
        hart.io.load_bytes(0, &instr.to_le_bytes());

        let point = TracePoint {
            cycle: 1,
            properties: vec![Property::Pc(4), Property::Reg { index: 5, value: 1 }],
        };
        hart.check_trace_point(&point).unwrap();
    }

    #[test]
    fn trace_check_reports_mismatched_register() {
        let mut hart = Hart::<FlatMemory>::default();
        // addi x0, x0, 0 -- a no-op, so x1 stays at its reset value of 0.
        hart.io.load_bytes(0, &0x0000_0013u32.to_le_bytes());
        let point = TracePoint {
            cycle: 1,
            properties: vec![Property::Reg { index: 1, value: 99 }],
        };
        let result = hart.check_trace_point(&point);
        assert!(matches!(result, Err(TraceCheckFailed::FailedCheck { .. })));
    }
}
