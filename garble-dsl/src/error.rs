use garble_asm::CodecError;
use garble_types::{BitWidth, VirtAddr};

/// Errors raised while building a program.
///
/// Everything here is a programming error in the DSL script or an I/O
/// failure on the bytecode file; the builder never recovers from either.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The bump allocator ran off the end of the virtual address space.
    #[error(
        "virtual address space exhausted: {requested} bits requested with \
         bump pointer at {next_free:#x}"
    )]
    AddressSpaceExhausted {
        /// Bump pointer at the time of the failed allocation.
        next_free: VirtAddr,
        /// Width of the failed allocation, in bits.
        requested: u64,
    },
    /// A value was given a zero width.
    #[error("values must be at least one bit wide")]
    ZeroWidth,
    /// Two operands of a binary operation have different widths.
    #[error("operand widths differ: {left} vs {right}")]
    WidthMismatch {
        /// Width of the left operand.
        left: BitWidth,
        /// Width of the right operand.
        right: BitWidth,
    },
    /// The result width of a widening operation does not fit in a width
    /// field.
    #[error("result of {op} on width {width} exceeds the representable width")]
    WidthOverflow {
        /// The widening operation.
        op: &'static str,
        /// The operand width.
        width: BitWidth,
    },
    /// An operation read a value that has no backing region.
    #[error("operation on an invalid value")]
    InvalidValue,
    /// A mutate targeted a sliced value that has no backing region.
    #[error("mutating an uninitialized sliced value")]
    MutateInvalidSlice,
    /// A select was given a selector wider than one bit.
    #[error("selector must be a single bit, got width {0}")]
    SelectorWidth(BitWidth),
    /// A sorting network was given a length it cannot be built for.
    #[error("sorting networks need a power-of-two length, got {0}")]
    NotPowerOfTwo(usize),
    /// A slice reached outside its parent value.
    #[error("slice [{start}, {start}+{len}) exceeds parent width {width}")]
    SliceOutOfRange {
        /// First bit of the slice.
        start: BitWidth,
        /// Length of the slice in bits.
        len: BitWidth,
        /// Width of the parent value.
        width: BitWidth,
    },
    /// Failure writing the bytecode file.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
