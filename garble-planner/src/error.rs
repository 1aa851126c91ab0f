use std::io;

use garble_asm::CodecError;
use garble_types::MAX_INSTR_PAGES;

/// Errors raised while planning a program.
///
/// The pipeline does not recover: every variant terminates the run with a
/// diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The resident region cannot hold even one instruction's pages.
    #[error("capacity of {capacity} pages is below the {min}-page minimum", min = MAX_INSTR_PAGES)]
    CapacityTooSmall {
        /// The requested capacity in pages.
        capacity: u64,
    },
    /// The page shift does not describe a valid page size.
    #[error("page shift {0} is not valid for a {bits}-bit address space", bits = garble_types::VIRTUAL_ADDRESS_BITS)]
    BadPageShift(u8),
    /// An instruction touches more pages than an annotation record can
    /// describe; the page size is too small for the program's widths.
    #[error("instruction {instr} touches {pages} pages, more than a record can hold")]
    PageCountOverflow {
        /// The offending instruction.
        instr: u64,
        /// How many pages it touches.
        pages: u64,
    },
    /// A bytecode or annotation file is malformed.
    #[error(transparent)]
    Format(#[from] CodecError),
    /// An annotation record disagrees with its instruction's operands.
    #[error("annotation for instruction {instr} is misaligned: {reason}")]
    AnnotationMismatch {
        /// The instruction whose record is inconsistent.
        instr: u64,
        /// What was inconsistent about it.
        reason: &'static str,
    },
    /// Eviction found no victim: the instruction needs more simultaneously
    /// resident pages than the capacity provides.
    #[error("no evictable page with {capacity} slots; instruction footprint exceeds capacity")]
    Unschedulable {
        /// The configured capacity in pages.
        capacity: u64,
    },
    /// Underlying file-system failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}
