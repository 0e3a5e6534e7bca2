//! Error and exception types.
//!
//! Two distinct channels are modelled, per the architectural-exception
//! vs. programming-error distinction: `Exception` is a recoverable,
//! architecturally-defined trap condition (bad alignment, a failed
//! memory access, an unrecognised instruction encoding) that is latched
//! onto the hart and inspectable afterwards. Anything else — an
//! out-of-range register index reaching code that should never produce
//! one, a dispatch-table slot with no handler — is a contract violation
//! and is not represented as a `Result` at all; it panics, the same way
//! the reference interpreter treats an unreachable opcode slot as fatal.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("read from address 0x{0:08x} is out of range")]
    InvalidAddress(u32),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    #[error("write to address 0x{0:08x} is out of range")]
    InvalidAddress(u32),
}

/// A recoverable, architecturally-defined trap condition.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    #[error("instruction address misaligned")]
    InstructionAddressMisaligned,
    #[error("instruction access fault")]
    InstructionAccessFault,
    #[error("illegal instruction 0x{0:08x}")]
    IllegalInstruction(u32),
    #[error("breakpoint")]
    Breakpoint,
    #[error("load address misaligned")]
    LoadAddressMisaligned,
    #[error("load access fault")]
    LoadAccessFault,
    #[error("store/amo address misaligned")]
    StoreAddressMisaligned,
    #[error("store/amo access fault")]
    StoreAccessFault,
    #[error("environment call")]
    EnvironmentCall,
}

impl From<ReadError> for Exception {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::InvalidAddress(_) => Exception::LoadAccessFault,
        }
    }
}

impl From<WriteError> for Exception {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::InvalidAddress(_) => Exception::StoreAccessFault,
        }
    }
}
