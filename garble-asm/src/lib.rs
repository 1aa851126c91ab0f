//! Instruction set and bytecode file formats of the garble planning
//! pipeline.
//!
//! A program exists in two forms. The *virtual* form refers to operands by
//! bit addresses in a large virtual address space; it is what the DSL
//! builder emits. The *physical* form refers to operands by bit addresses
//! inside a bounded resident wire region and interleaves explicit `SwapIn`
//! and `SwapOut` records; it is what the placer emits and the executor
//! consumes. Both use the same variable-length packed encoding whose size
//! is a pure function of the opcode.

#![warn(missing_docs)]

mod error;
mod instruction;
mod opcode;
mod program_file;

pub use error::CodecError;
pub use instruction::{InstrFlags, PageRange, PageRanges, PhysInstruction, VirtInstruction};
pub use opcode::{OpCode, OpInfo};
pub use program_file::{
    OutputRange, PhysProgramReader, PhysProgramWriter, ProgramHeader, ProgramImage,
    VirtProgramReader, VirtProgramWriter,
};
