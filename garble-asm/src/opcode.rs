use core::fmt;

use garble_types::BitWidth;

use crate::error::CodecError;

/// Operation encoded in an instruction's first byte.
///
/// The set is closed: programs containing any other byte value are rejected
/// by the decoder. `SwapIn` and `SwapOut` are produced only by the placer
/// and are legal only in physical programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum OpCode {
    /// Read a value from one party's input stream.
    Input = 0x01,
    /// Load a public 32-bit constant.
    PublicConstant = 0x02,
    /// Copy a region to another region.
    Copy = 0x03,
    /// Integer addition with wraparound.
    IntAdd = 0x04,
    /// Integer addition of the constant one.
    IntIncrement = 0x05,
    /// Integer subtraction with wraparound.
    IntSub = 0x06,
    /// Integer subtraction of the constant one.
    IntDecrement = 0x07,
    /// Integer addition preserving the carry bit; the result is one bit
    /// wider than the operands.
    IntAddWithCarry = 0x08,
    /// Unsigned multiplication; the result is twice as wide as the operands.
    IntMultiply = 0x09,
    /// Unsigned less-than comparison producing a single bit.
    IntLess = 0x0a,
    /// Equality comparison producing a single bit.
    Equal = 0x0b,
    /// Produces 1 if the operand is zero.
    IsZero = 0x0c,
    /// Produces 1 if the operand is nonzero.
    NonZero = 0x0d,
    /// Bitwise negation.
    BitNot = 0x0e,
    /// Bitwise conjunction.
    BitAnd = 0x0f,
    /// Bitwise disjunction.
    BitOr = 0x10,
    /// Bitwise exclusive or.
    BitXor = 0x11,
    /// Multiplexer: selects the first or second operand according to the
    /// third (single-bit) operand.
    ValueSelect = 0x12,
    /// Reveal a region as a program output. Carries the region's address
    /// for the executor but moves no pages; output liveness is carried by
    /// the program file's output-range trailer.
    Output = 0x13,
    /// Enqueue a region to be sent to another worker.
    BufferSend = 0x14,
    /// Start receiving a region from another worker.
    PostReceive = 0x15,
    /// Block until all enqueued sends to a worker have drained.
    FinishSend = 0x16,
    /// Block until all posted receives from a worker have completed.
    FinishReceive = 0x17,
    /// Load a virtual page from storage into a resident slot.
    SwapIn = 0x18,
    /// Write a resident slot back to its virtual page's storage.
    SwapOut = 0x19,
}

/// Operand layout of an opcode, a pure function of the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    /// Number of input operands, at most three.
    pub num_inputs: usize,
    /// Whether the instruction carries an output operand word.
    pub has_output: bool,
    /// Whether the instruction carries a 32-bit public constant.
    pub has_constant: bool,
    /// Whether the instruction's operands participate in paging. An
    /// instruction without page traffic is ignored by the annotator and
    /// copied through by the placer.
    pub page_traffic: bool,
}

impl OpCode {
    /// Operand layout for this opcode.
    pub const fn info(self) -> OpInfo {
        match self {
            OpCode::Input => OpInfo {
                num_inputs: 0,
                has_output: true,
                has_constant: false,
                page_traffic: true,
            },
            OpCode::PublicConstant => OpInfo {
                num_inputs: 0,
                has_output: true,
                has_constant: true,
                page_traffic: true,
            },
            OpCode::Copy
            | OpCode::IntIncrement
            | OpCode::IntDecrement
            | OpCode::IsZero
            | OpCode::NonZero
            | OpCode::BitNot => OpInfo {
                num_inputs: 1,
                has_output: true,
                has_constant: false,
                page_traffic: true,
            },
            OpCode::IntAdd
            | OpCode::IntSub
            | OpCode::IntAddWithCarry
            | OpCode::IntMultiply
            | OpCode::IntLess
            | OpCode::Equal
            | OpCode::BitAnd
            | OpCode::BitOr
            | OpCode::BitXor => OpInfo {
                num_inputs: 2,
                has_output: true,
                has_constant: false,
                page_traffic: true,
            },
            OpCode::ValueSelect => OpInfo {
                num_inputs: 3,
                has_output: true,
                has_constant: false,
                page_traffic: true,
            },
            OpCode::Output => OpInfo {
                num_inputs: 0,
                has_output: true,
                has_constant: false,
                page_traffic: false,
            },
            OpCode::BufferSend => OpInfo {
                num_inputs: 1,
                has_output: false,
                has_constant: true,
                page_traffic: true,
            },
            OpCode::PostReceive => OpInfo {
                num_inputs: 0,
                has_output: true,
                has_constant: true,
                page_traffic: true,
            },
            OpCode::FinishSend | OpCode::FinishReceive => OpInfo {
                num_inputs: 0,
                has_output: false,
                has_constant: true,
                page_traffic: false,
            },
            OpCode::SwapIn | OpCode::SwapOut => OpInfo {
                num_inputs: 1,
                has_output: true,
                has_constant: false,
                page_traffic: false,
            },
        }
    }

    /// Width in bits of the region produced by this opcode given its
    /// operand width.
    ///
    /// Comparison and predicate opcodes produce a single bit regardless of
    /// operand width; add-with-carry widens by one bit; multiplication
    /// doubles the width.
    pub const fn output_width(self, width: BitWidth) -> BitWidth {
        match self {
            OpCode::IntLess | OpCode::Equal | OpCode::IsZero | OpCode::NonZero => 1,
            OpCode::IntAddWithCarry => width.saturating_add(1),
            OpCode::IntMultiply => width.saturating_mul(2),
            _ => width,
        }
    }

    /// Width in bits of the given input operand. The selector of a
    /// `ValueSelect` is a single bit; every other input has the
    /// instruction's operand width.
    pub const fn input_width(self, index: usize, width: BitWidth) -> BitWidth {
        match self {
            OpCode::ValueSelect if index == 2 => 1,
            _ => width,
        }
    }

    /// Size in bytes of the packed on-disk encoding, a pure function of
    /// the opcode. Used identically by the writer and the reader.
    pub const fn encoded_size(self) -> usize {
        let info = self.info();
        4 + 8 * (info.num_inputs + info.has_output as usize)
            + 4 * (info.has_constant as usize)
    }

    /// Whether this opcode is a paging instruction emitted by the placer.
    pub const fn is_swap(self) -> bool {
        matches!(self, OpCode::SwapIn | OpCode::SwapOut)
    }

    /// Disassembler mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            OpCode::Input => "input",
            OpCode::PublicConstant => "const",
            OpCode::Copy => "copy",
            OpCode::IntAdd => "add",
            OpCode::IntIncrement => "incr",
            OpCode::IntSub => "sub",
            OpCode::IntDecrement => "decr",
            OpCode::IntAddWithCarry => "addc",
            OpCode::IntMultiply => "mul",
            OpCode::IntLess => "less",
            OpCode::Equal => "eq",
            OpCode::IsZero => "iszero",
            OpCode::NonZero => "nonzero",
            OpCode::BitNot => "not",
            OpCode::BitAnd => "and",
            OpCode::BitOr => "or",
            OpCode::BitXor => "xor",
            OpCode::ValueSelect => "select",
            OpCode::Output => "output",
            OpCode::BufferSend => "bsend",
            OpCode::PostReceive => "precv",
            OpCode::FinishSend => "fsend",
            OpCode::FinishReceive => "frecv",
            OpCode::SwapIn => "swapin",
            OpCode::SwapOut => "swapout",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl TryFrom<u8> for OpCode {
    type Error = CodecError;

    fn try_from(b: u8) -> Result<Self, CodecError> {
        use OpCode::*;
        Ok(match b {
            0x01 => Input,
            0x02 => PublicConstant,
            0x03 => Copy,
            0x04 => IntAdd,
            0x05 => IntIncrement,
            0x06 => IntSub,
            0x07 => IntDecrement,
            0x08 => IntAddWithCarry,
            0x09 => IntMultiply,
            0x0a => IntLess,
            0x0b => Equal,
            0x0c => IsZero,
            0x0d => NonZero,
            0x0e => BitNot,
            0x0f => BitAnd,
            0x10 => BitOr,
            0x11 => BitXor,
            0x12 => ValueSelect,
            0x13 => Output,
            0x14 => BufferSend,
            0x15 => PostReceive,
            0x16 => FinishSend,
            0x17 => FinishReceive,
            0x18 => SwapIn,
            0x19 => SwapOut,
            _ => return Err(CodecError::UnknownOpcode(b)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn opcode_byte_round_trip() {
        for op in OpCode::iter() {
            let b = op as u8;
            assert_eq!(OpCode::try_from(b).unwrap(), op);
        }
        assert!(OpCode::try_from(0x00).is_err());
        assert!(OpCode::try_from(0x1a).is_err());
        assert!(OpCode::try_from(0xff).is_err());
    }

    #[test]
    fn encoded_sizes_follow_layout() {
        // header + output
        assert_eq!(OpCode::Input.encoded_size(), 12);
        // header + output + constant
        assert_eq!(OpCode::PublicConstant.encoded_size(), 16);
        // header + output + two inputs
        assert_eq!(OpCode::IntAdd.encoded_size(), 28);
        // header + output + three inputs
        assert_eq!(OpCode::ValueSelect.encoded_size(), 36);
        // header + one input + constant
        assert_eq!(OpCode::BufferSend.encoded_size(), 16);
        // header + constant
        assert_eq!(OpCode::FinishSend.encoded_size(), 8);
        // header + slot + page
        assert_eq!(OpCode::SwapIn.encoded_size(), 20);
    }

    #[test]
    fn output_widths() {
        assert_eq!(OpCode::IntAdd.output_width(32), 32);
        assert_eq!(OpCode::IntAddWithCarry.output_width(32), 33);
        assert_eq!(OpCode::IntMultiply.output_width(32), 64);
        assert_eq!(OpCode::IntLess.output_width(32), 1);
        assert_eq!(OpCode::IsZero.output_width(64), 1);
    }

    #[test]
    fn select_selector_is_one_bit() {
        assert_eq!(OpCode::ValueSelect.input_width(0, 32), 32);
        assert_eq!(OpCode::ValueSelect.input_width(1, 32), 32);
        assert_eq!(OpCode::ValueSelect.input_width(2, 32), 1);
        assert_eq!(OpCode::IntAdd.input_width(1, 32), 32);
    }
}
