use std::io;

use crate::opcode::OpCode;

/// Errors surfaced while encoding or decoding bytecode files.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The file does not start with the expected magic number.
    #[error("bad magic in {kind} file: expected {expected:#018x}, found {found:#018x}")]
    BadMagic {
        /// Which file kind was being read.
        kind: &'static str,
        /// The magic number the reader expected.
        expected: u64,
        /// The value actually present.
        found: u64,
    },
    /// The opcode byte maps to no known operation.
    #[error("unknown opcode byte {0:#04x}")]
    UnknownOpcode(u8),
    /// The flag byte has bits outside the defined set.
    #[error("unknown flag bits {0:#04x}")]
    UnknownFlags(u8),
    /// A swap opcode appeared in a virtual program.
    #[error("{0} is not valid in a virtual program")]
    SwapInVirtualProgram(OpCode),
    /// An instruction that references memory has a zero width.
    #[error("{0} instruction with zero width")]
    ZeroWidth(OpCode),
    /// The file ends inside a structure the header promised.
    #[error("truncated {0}")]
    Truncated(&'static str),
    /// Underlying file-system failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}
