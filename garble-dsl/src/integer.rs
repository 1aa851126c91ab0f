use garble_asm::{InstrFlags, OpCode, VirtInstruction};
use garble_types::{BitWidth, Party, VirtAddr, WorkerId, INVALID_VADDR};

use crate::error::BuildError;
use crate::program::Program;

/// A fixed-width integer value living in the program's virtual address
/// space.
///
/// An `Integer` is a small handle: an address, a width, and an ownership
/// flag. Operations on it emit instructions immediately and return new
/// handles for their results. A handle either *owns* its region (it was
/// allocated for this value and may be recycled through it) or is a
/// *slice*, a non-owning view into another value's region.
///
/// Handles are move-only. The only way to duplicate a value is
/// [`Integer::mutate_from`], which emits an explicit copy instruction;
/// this keeps every copy visible in the script.
///
/// Dropping a handle does not recycle its region; call
/// [`Integer::recycle`] to return the region to the allocator. A dropped
/// region is never reused, which wastes address space but is otherwise
/// harmless.
#[derive(Debug)]
pub struct Integer {
    addr: VirtAddr,
    width: BitWidth,
    owned: bool,
}

/// A single-bit [`Integer`], as produced by the comparison operations.
pub type Bit = Integer;

impl Integer {
    /// An invalid value of the given width, with no backing region.
    /// Becomes valid through [`Integer::mutate_from`],
    /// [`Integer::mutate_to_constant`], or [`Integer::post_receive`].
    pub fn invalid(width: BitWidth) -> Self {
        Integer {
            addr: INVALID_VADDR,
            width,
            owned: true,
        }
    }

    /// Read a width-`width` value from `party`'s input stream.
    pub fn input(width: BitWidth, party: Party, p: &mut Program) -> Result<Self, BuildError> {
        check_width(width)?;
        let mut instr = VirtInstruction::new(OpCode::Input, width);
        if party == Party::Evaluator {
            instr.flags |= InstrFlags::EVALUATOR_INPUT;
        }
        let addr = p.emit_new(instr)?;
        Ok(Integer {
            addr,
            width,
            owned: true,
        })
    }

    /// A fresh value initialized to the public constant `value`.
    pub fn constant(width: BitWidth, value: u32, p: &mut Program) -> Result<Self, BuildError> {
        check_width(width)?;
        let mut instr = VirtInstruction::new(OpCode::PublicConstant, width);
        instr.constant = value;
        let addr = p.emit_new(instr)?;
        Ok(Integer {
            addr,
            width,
            owned: true,
        })
    }

    /// Overwrite this value with data read from `party`'s input stream,
    /// recycling any previous region and allocating a fresh one. Slices
    /// cannot be retargeted.
    pub fn mark_input(&mut self, party: Party, p: &mut Program) -> Result<(), BuildError> {
        if !self.owned {
            return Err(BuildError::MutateInvalidSlice);
        }
        check_width(self.width)?;
        if self.valid() {
            p.recycle(self.addr, self.width);
            self.addr = INVALID_VADDR;
        }
        let mut instr = VirtInstruction::new(OpCode::Input, self.width);
        if party == Party::Evaluator {
            instr.flags |= InstrFlags::EVALUATOR_INPUT;
        }
        self.addr = p.emit_new(instr)?;
        Ok(())
    }

    /// Whether this value has a backing region.
    pub fn valid(&self) -> bool {
        self.addr != INVALID_VADDR
    }

    /// Width of this value in bits.
    pub fn width(&self) -> BitWidth {
        self.width
    }

    /// Base address of the backing region.
    pub fn address(&self) -> VirtAddr {
        self.addr
    }

    /// Whether this handle owns its region (false for slices).
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Reveal this value as a program output.
    pub fn mark_output(&self, p: &mut Program) -> Result<(), BuildError> {
        self.ensure_valid()?;
        p.mark_output(self.addr, self.width)
    }

    /// Overwrite this value with the public constant `value`, writing to
    /// the existing region so slices observe the change. Allocates a
    /// region first if the value is invalid and owning.
    pub fn mutate_to_constant(&mut self, value: u32, p: &mut Program) -> Result<(), BuildError> {
        let mut instr = VirtInstruction::new(OpCode::PublicConstant, self.width);
        instr.constant = value;
        if self.valid() {
            instr.output = self.addr;
            p.emit_in_place(instr)
        } else if self.owned {
            check_width(self.width)?;
            self.addr = p.emit_new(instr)?;
            Ok(())
        } else {
            Err(BuildError::MutateInvalidSlice)
        }
    }

    /// Copy `other`'s value into this one, emitting an explicit copy
    /// instruction. `other` may be narrower; the remaining high bits are
    /// zeroed. Aliases of this value observe the new contents.
    pub fn mutate_from(&mut self, other: &Integer, p: &mut Program) -> Result<(), BuildError> {
        other.ensure_valid()?;
        if other.width > self.width {
            return Err(BuildError::WidthMismatch {
                left: self.width,
                right: other.width,
            });
        }
        if !self.valid() {
            if !self.owned {
                return Err(BuildError::MutateInvalidSlice);
            }
            check_width(self.width)?;
            self.addr = p.allocate(self.width)?;
        }
        let mut instr = VirtInstruction::new(OpCode::Copy, other.width);
        instr.inputs[0] = other.addr;
        instr.output = self.addr;
        p.emit_in_place(instr)?;

        if other.width < self.width {
            let mut zero =
                VirtInstruction::new(OpCode::PublicConstant, self.width - other.width);
            zero.output = self.addr + other.width as u64;
            p.emit_in_place(zero)?;
        }
        Ok(())
    }

    /// Enqueue this value to be sent to worker `to`. The send completes
    /// only after a later [`Program::finish_send`].
    pub fn buffer_send(&self, to: WorkerId, p: &mut Program) -> Result<(), BuildError> {
        self.ensure_valid()?;
        let mut instr = VirtInstruction::new(OpCode::BufferSend, self.width);
        instr.inputs[0] = self.addr;
        instr.constant = to;
        p.emit_in_place(instr)
    }

    /// Start receiving this value from worker `from`, into a fresh region.
    /// The data is usable only after a later [`Program::finish_receive`].
    pub fn post_receive(&mut self, from: WorkerId, p: &mut Program) -> Result<(), BuildError> {
        if !self.owned {
            return Err(BuildError::MutateInvalidSlice);
        }
        check_width(self.width)?;
        if self.valid() {
            p.recycle(self.addr, self.width);
            self.addr = INVALID_VADDR;
        }
        let mut instr = VirtInstruction::new(OpCode::PostReceive, self.width);
        instr.constant = from;
        self.addr = p.emit_new(instr)?;
        Ok(())
    }

    /// Sum of the two values, with wraparound.
    pub fn add(&self, other: &Integer, p: &mut Program) -> Result<Integer, BuildError> {
        self.binary(other, OpCode::IntAdd, p)
    }

    /// Sum of the two values; the result is one bit wider and its most
    /// significant bit is the carry, so it cannot overflow.
    pub fn add_with_carry(&self, other: &Integer, p: &mut Program) -> Result<Integer, BuildError> {
        if self.width == BitWidth::MAX {
            return Err(BuildError::WidthOverflow {
                op: "add_with_carry",
                width: self.width,
            });
        }
        self.binary(other, OpCode::IntAddWithCarry, p)
    }

    /// Difference of the two values, with wraparound.
    pub fn sub(&self, other: &Integer, p: &mut Program) -> Result<Integer, BuildError> {
        self.binary(other, OpCode::IntSub, p)
    }

    /// This value plus one. Cheaper than adding a constant-one value.
    pub fn increment(&self, p: &mut Program) -> Result<Integer, BuildError> {
        self.unary(OpCode::IntIncrement, p)
    }

    /// This value minus one.
    pub fn decrement(&self, p: &mut Program) -> Result<Integer, BuildError> {
        self.unary(OpCode::IntDecrement, p)
    }

    /// Unsigned product of the two values. The result is twice as wide,
    /// so it cannot overflow.
    pub fn multiply(&self, other: &Integer, p: &mut Program) -> Result<Integer, BuildError> {
        if self.width > BitWidth::MAX / 2 {
            return Err(BuildError::WidthOverflow {
                op: "multiply",
                width: self.width,
            });
        }
        self.binary(other, OpCode::IntMultiply, p)
    }

    /// A bit that is 1 if this value is unsigned-less than `other`.
    pub fn less(&self, other: &Integer, p: &mut Program) -> Result<Bit, BuildError> {
        self.binary(other, OpCode::IntLess, p)
    }

    /// A bit that is 1 if this value is unsigned-greater than `other`.
    pub fn greater(&self, other: &Integer, p: &mut Program) -> Result<Bit, BuildError> {
        other.less(self, p)
    }

    /// A bit that is 1 if this value is unsigned-less than or equal to
    /// `other`.
    pub fn less_eq(&self, other: &Integer, p: &mut Program) -> Result<Bit, BuildError> {
        let gt = other.less(self, p)?;
        let result = gt.not(p)?;
        gt.recycle(p);
        Ok(result)
    }

    /// A bit that is 1 if this value is unsigned-greater than or equal to
    /// `other`.
    pub fn greater_eq(&self, other: &Integer, p: &mut Program) -> Result<Bit, BuildError> {
        let lt = self.less(other, p)?;
        let result = lt.not(p)?;
        lt.recycle(p);
        Ok(result)
    }

    /// A bit that is 1 if the two values are equal.
    pub fn equal(&self, other: &Integer, p: &mut Program) -> Result<Bit, BuildError> {
        self.binary(other, OpCode::Equal, p)
    }

    /// A bit that is 1 if this value is zero.
    pub fn is_zero(&self, p: &mut Program) -> Result<Bit, BuildError> {
        self.unary(OpCode::IsZero, p)
    }

    /// A bit that is 1 if this value is nonzero.
    pub fn nonzero(&self, p: &mut Program) -> Result<Bit, BuildError> {
        self.unary(OpCode::NonZero, p)
    }

    /// Bitwise negation.
    pub fn not(&self, p: &mut Program) -> Result<Integer, BuildError> {
        self.unary(OpCode::BitNot, p)
    }

    /// Bitwise conjunction.
    pub fn and(&self, other: &Integer, p: &mut Program) -> Result<Integer, BuildError> {
        self.binary(other, OpCode::BitAnd, p)
    }

    /// Bitwise disjunction.
    pub fn or(&self, other: &Integer, p: &mut Program) -> Result<Integer, BuildError> {
        self.binary(other, OpCode::BitOr, p)
    }

    /// Bitwise exclusive or.
    pub fn xor(&self, other: &Integer, p: &mut Program) -> Result<Integer, BuildError> {
        self.binary(other, OpCode::BitXor, p)
    }

    /// Multiplexer: the value of `if_one` when `selector` is 1, otherwise
    /// the value of `if_zero`.
    pub fn select(
        selector: &Bit,
        if_one: &Integer,
        if_zero: &Integer,
        p: &mut Program,
    ) -> Result<Integer, BuildError> {
        selector.ensure_valid()?;
        if_one.ensure_valid()?;
        if_zero.ensure_valid()?;
        if selector.width != 1 {
            return Err(BuildError::SelectorWidth(selector.width));
        }
        if if_one.width != if_zero.width {
            return Err(BuildError::WidthMismatch {
                left: if_one.width,
                right: if_zero.width,
            });
        }
        let mut instr = VirtInstruction::new(OpCode::ValueSelect, if_one.width);
        instr.inputs[0] = if_one.addr;
        instr.inputs[1] = if_zero.addr;
        instr.inputs[2] = selector.addr;
        let addr = p.emit_new(instr)?;
        Ok(Integer {
            addr,
            width: if_one.width,
            owned: true,
        })
    }

    /// Exchange the values of `x` and `y` when `predicate` is 1.
    ///
    /// Built from a select and two xors, so both handles end up owning
    /// fresh regions; prior slices of either are left dangling.
    pub fn swap_if(
        predicate: &Bit,
        x: &mut Integer,
        y: &mut Integer,
        p: &mut Program,
    ) -> Result<(), BuildError> {
        let picked = Integer::select(predicate, x, y, p)?;
        let mask = picked.xor(y, p)?;
        picked.recycle(p);
        let new_x = x.xor(&mask, p)?;
        let new_y = y.xor(&mask, p)?;
        mask.recycle(p);
        x.replace(new_x, p);
        y.replace(new_y, p);
        Ok(())
    }

    /// Order `x` and `y` so that `x <= y` afterwards: the compare-and-swap
    /// step of a sorting network.
    pub fn comparator(x: &mut Integer, y: &mut Integer, p: &mut Program) -> Result<(), BuildError> {
        let gt = x.greater(y, p)?;
        Integer::swap_if(&gt, x, y, p)?;
        gt.recycle(p);
        Ok(())
    }

    /// A non-owning view of `len` bits starting at bit `start` (bit 0 is
    /// the least significant). The slice reads and writes the parent's
    /// region; recycling it is a no-op.
    pub fn slice(&self, start: BitWidth, len: BitWidth) -> Result<Integer, BuildError> {
        self.ensure_valid()?;
        if len == 0 {
            return Err(BuildError::ZeroWidth);
        }
        if start as u32 + len as u32 > self.width as u32 {
            return Err(BuildError::SliceOutOfRange {
                start,
                len,
                width: self.width,
            });
        }
        Ok(Integer {
            addr: self.addr + start as u64,
            width: len,
            owned: false,
        })
    }

    /// A single-bit slice of bit `i`.
    pub fn bit(&self, i: BitWidth) -> Result<Bit, BuildError> {
        self.slice(i, 1)
    }

    /// Replace this value with `other`, recycling the old region first.
    /// The move-assignment of the DSL: aliasing of `other` is preserved.
    pub fn replace(&mut self, other: Integer, p: &mut Program) {
        if self.owned && self.valid() {
            p.recycle(self.addr, self.width);
        }
        self.addr = other.addr;
        self.width = other.width;
        self.owned = other.owned;
    }

    /// Return the backing region to the allocator. A no-op for slices and
    /// invalid values.
    pub fn recycle(self, p: &mut Program) {
        if self.owned && self.valid() {
            p.recycle(self.addr, self.width);
        }
    }

    fn ensure_valid(&self) -> Result<(), BuildError> {
        if self.valid() {
            Ok(())
        } else {
            Err(BuildError::InvalidValue)
        }
    }

    fn unary(&self, op: OpCode, p: &mut Program) -> Result<Integer, BuildError> {
        self.ensure_valid()?;
        let mut instr = VirtInstruction::new(op, self.width);
        instr.inputs[0] = self.addr;
        let addr = p.emit_new(instr)?;
        Ok(Integer {
            addr,
            width: op.output_width(self.width),
            owned: true,
        })
    }

    fn binary(&self, other: &Integer, op: OpCode, p: &mut Program) -> Result<Integer, BuildError> {
        self.ensure_valid()?;
        other.ensure_valid()?;
        if self.width != other.width {
            return Err(BuildError::WidthMismatch {
                left: self.width,
                right: other.width,
            });
        }
        let mut instr = VirtInstruction::new(op, self.width);
        instr.inputs[0] = self.addr;
        instr.inputs[1] = other.addr;
        let addr = p.emit_new(instr)?;
        Ok(Integer {
            addr,
            width: op.output_width(self.width),
            owned: true,
        })
    }
}

fn check_width(width: BitWidth) -> Result<(), BuildError> {
    if width == 0 {
        Err(BuildError::ZeroWidth)
    } else {
        Ok(())
    }
}
