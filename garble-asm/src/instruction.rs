use core::fmt;
use std::io;

use bitflags::bitflags;
use garble_types::{
    page_number, BitWidth, PageShift, PhysAddr, PhysSlot, VirtAddr, VirtPageNumber,
    INVALID_VADDR,
};

use crate::error::CodecError;
use crate::opcode::OpCode;

bitflags! {
    /// Per-instruction flag byte.
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct InstrFlags: u8 {
        /// The `Input` instruction reads from the evaluator's input stream
        /// rather than the garbler's.
        const EVALUATOR_INPUT = 0x01;
    }
}

/// An inclusive range of virtual pages touched by one operand, or by
/// several overlapping operands after merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    /// First page of the range.
    pub start: VirtPageNumber,
    /// Last page of the range, inclusive.
    pub end: VirtPageNumber,
}

impl PageRange {
    fn from_region(addr: VirtAddr, width: BitWidth, shift: PageShift) -> Self {
        debug_assert!(width > 0);
        PageRange {
            start: page_number(addr, shift),
            end: page_number(addr + width as u64 - 1, shift),
        }
    }

    /// Number of pages in the range.
    pub fn num_pages(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Merge `other` into this range if the two overlap or touch.
    /// Returns false (leaving `self` unchanged) if they are disjoint.
    fn merge(&mut self, other: &PageRange) -> bool {
        if other.start > self.end + 1 || self.start > other.end + 1 {
            return false;
        }
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
        true
    }
}

impl Default for PageRange {
    fn default() -> Self {
        PageRange { start: 0, end: 0 }
    }
}

/// The disjoint page ranges covered by an instruction's input operands.
/// At most three operands contribute, so the backing storage is a fixed
/// array. Disjoint ranges keep operand order; a range produced by merging
/// moves to the back.
///
/// The annotator writes next-use slots and the placer consumes them in
/// exactly the iteration order of this structure: range by range, pages
/// ascending within each range. Both sides must construct it through
/// [`VirtInstruction::input_page_ranges`] so the orders agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRanges {
    ranges: [PageRange; 3],
    len: usize,
}

impl PageRanges {
    fn push_merged(&mut self, mut range: PageRange) {
        // Fold the new range into an existing one if they overlap or touch,
        // then cascade in case the union now bridges two ranges.
        let mut i = 0;
        while i < self.len {
            if self.ranges[i].merge(&range) {
                range = self.ranges[i];
                // Remove and retry against earlier ranges.
                for j in i..self.len - 1 {
                    self.ranges[j] = self.ranges[j + 1];
                }
                self.len -= 1;
                self.push_merged(range);
                return;
            }
            i += 1;
        }
        self.ranges[self.len] = range;
        self.len += 1;
    }

    /// The ranges, in operand order.
    pub fn iter(&self) -> impl Iterator<Item = &PageRange> {
        self.ranges[..self.len].iter()
    }

    /// Total number of pages across all ranges.
    pub fn num_pages(&self) -> u64 {
        self.iter().map(PageRange::num_pages).sum()
    }

    /// Every page, ranges in operand order and ascending within a range.
    pub fn pages(&self) -> impl Iterator<Item = VirtPageNumber> + '_ {
        self.iter().flat_map(|r| r.start..=r.end)
    }
}

/// A virtual-address instruction as stored in a `.prog` file.
///
/// Operand slots that the opcode's layout does not use hold
/// [`INVALID_VADDR`] in memory and are absent on disk; the packed size is
/// [`OpCode::encoded_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VirtInstruction {
    /// Operation.
    pub op: OpCode,
    /// Flag byte.
    pub flags: InstrFlags,
    /// Operand width in bits.
    pub width: BitWidth,
    /// Output region base address, or `INVALID_VADDR`.
    pub output: VirtAddr,
    /// Input region base addresses; unused slots hold `INVALID_VADDR`.
    pub inputs: [VirtAddr; 3],
    /// Public constant, when the layout carries one.
    pub constant: u32,
}

impl VirtInstruction {
    /// An instruction with every operand slot empty.
    pub fn new(op: OpCode, width: BitWidth) -> Self {
        VirtInstruction {
            op,
            flags: InstrFlags::empty(),
            width,
            output: INVALID_VADDR,
            inputs: [INVALID_VADDR; 3],
            constant: 0,
        }
    }

    /// Packed size in bytes.
    pub fn encoded_size(&self) -> usize {
        self.op.encoded_size()
    }

    /// Append the packed encoding to `out`.
    pub fn write_to<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let info = self.op.info();
        out.write_all(&[self.op as u8, self.flags.bits()])?;
        out.write_all(&self.width.to_le_bytes())?;
        if info.has_output {
            out.write_all(&self.output.to_le_bytes())?;
        }
        for input in &self.inputs[..info.num_inputs] {
            out.write_all(&input.to_le_bytes())?;
        }
        if info.has_constant {
            out.write_all(&self.constant.to_le_bytes())?;
        }
        Ok(())
    }

    /// Decode one packed instruction.
    ///
    /// Rejects swap opcodes: those occur only in physical programs.
    pub fn read_from<R: io::Read>(input: &mut R) -> Result<Self, CodecError> {
        let (op, flags, width) = read_header(input)?;
        if op.is_swap() {
            return Err(CodecError::SwapInVirtualProgram(op));
        }
        let info = op.info();
        if info.page_traffic && width == 0 {
            return Err(CodecError::ZeroWidth(op));
        }
        let mut instr = VirtInstruction::new(op, width);
        instr.flags = flags;
        if info.has_output {
            instr.output = read_u64(input)?;
        }
        for i in 0..info.num_inputs {
            instr.inputs[i] = read_u64(input)?;
        }
        if info.has_constant {
            instr.constant = read_u32(input)?;
        }
        Ok(instr)
    }

    /// The disjoint page ranges covered by the input operands, merged and
    /// ordered per the annotation contract. Empty for instructions without
    /// page traffic.
    pub fn input_page_ranges(&self, shift: PageShift) -> PageRanges {
        let mut ranges = PageRanges::default();
        let info = self.op.info();
        if !info.page_traffic {
            return ranges;
        }
        for i in 0..info.num_inputs {
            let width = self.op.input_width(i, self.width);
            ranges.push_merged(PageRange::from_region(self.inputs[i], width, shift));
        }
        ranges
    }

    /// The page range covered by the output operand, or `None` for
    /// instructions that produce nothing or move no pages.
    pub fn output_page_range(&self, shift: PageShift) -> Option<PageRange> {
        let info = self.op.info();
        if !info.page_traffic || !info.has_output {
            return None;
        }
        let width = self.op.output_width(self.width);
        Some(PageRange::from_region(self.output, width, shift))
    }
}

impl fmt::Display for VirtInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.op.info();
        write!(f, "{:<8} w{:<5}", self.op, self.width)?;
        if info.has_output {
            write!(f, " out=0x{:09x}", self.output)?;
        }
        for input in &self.inputs[..info.num_inputs] {
            write!(f, " in=0x{:09x}", input)?;
        }
        if info.has_constant {
            write!(f, " k={}", self.constant)?;
        }
        if self.flags.contains(InstrFlags::EVALUATOR_INPUT) {
            write!(f, " [evaluator]")?;
        }
        Ok(())
    }
}

/// A physical-address instruction as stored in a `.memprog` file.
///
/// Compute records carry physical bit addresses in their operand slots.
/// Swap records reuse the output slot for the physical slot index and the
/// first input slot for the virtual page number being moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhysInstruction {
    /// Operation.
    pub op: OpCode,
    /// Flag byte, carried over from the virtual instruction.
    pub flags: InstrFlags,
    /// Operand width in bits; zero for swap records.
    pub width: BitWidth,
    /// Output physical address, or the slot index of a swap record.
    pub output: PhysAddr,
    /// Input physical addresses; `inputs[0]` is the virtual page number of
    /// a swap record.
    pub inputs: [PhysAddr; 3],
    /// Public constant, when the layout carries one.
    pub constant: u32,
}

impl PhysInstruction {
    /// A compute record with every operand slot empty.
    pub fn new(op: OpCode, width: BitWidth) -> Self {
        PhysInstruction {
            op,
            flags: InstrFlags::empty(),
            width,
            output: 0,
            inputs: [0; 3],
            constant: 0,
        }
    }

    /// A record loading `page` into `slot`.
    pub fn swap_in(page: VirtPageNumber, slot: PhysSlot) -> Self {
        let mut instr = PhysInstruction::new(OpCode::SwapIn, 0);
        instr.output = slot;
        instr.inputs[0] = page;
        instr
    }

    /// A record writing `slot` back to `page`'s storage.
    pub fn swap_out(page: VirtPageNumber, slot: PhysSlot) -> Self {
        let mut instr = PhysInstruction::new(OpCode::SwapOut, 0);
        instr.output = slot;
        instr.inputs[0] = page;
        instr
    }

    /// Physical slot of a swap record.
    pub fn swap_slot(&self) -> PhysSlot {
        debug_assert!(self.op.is_swap());
        self.output
    }

    /// Virtual page of a swap record.
    pub fn swap_page(&self) -> VirtPageNumber {
        debug_assert!(self.op.is_swap());
        self.inputs[0]
    }

    /// Packed size in bytes.
    pub fn encoded_size(&self) -> usize {
        self.op.encoded_size()
    }

    /// Append the packed encoding to `out`.
    pub fn write_to<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let info = self.op.info();
        out.write_all(&[self.op as u8, self.flags.bits()])?;
        out.write_all(&self.width.to_le_bytes())?;
        if info.has_output {
            out.write_all(&self.output.to_le_bytes())?;
        }
        for input in &self.inputs[..info.num_inputs] {
            out.write_all(&input.to_le_bytes())?;
        }
        if info.has_constant {
            out.write_all(&self.constant.to_le_bytes())?;
        }
        Ok(())
    }

    /// Decode one packed instruction.
    pub fn read_from<R: io::Read>(input: &mut R) -> Result<Self, CodecError> {
        let (op, flags, width) = read_header(input)?;
        let info = op.info();
        let mut instr = PhysInstruction::new(op, width);
        instr.flags = flags;
        if info.has_output {
            instr.output = read_u64(input)?;
        }
        for i in 0..info.num_inputs {
            instr.inputs[i] = read_u64(input)?;
        }
        if info.has_constant {
            instr.constant = read_u32(input)?;
        }
        Ok(instr)
    }
}

impl fmt::Display for PhysInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op.is_swap() {
            return write!(
                f,
                "{:<8} slot={} page={}",
                self.op,
                self.swap_slot(),
                self.swap_page()
            );
        }
        let info = self.op.info();
        write!(f, "{:<8} w{:<5}", self.op, self.width)?;
        if info.has_output {
            write!(f, " out=0x{:09x}", self.output)?;
        }
        for input in &self.inputs[..info.num_inputs] {
            write!(f, " in=0x{:09x}", input)?;
        }
        if info.has_constant {
            write!(f, " k={}", self.constant)?;
        }
        Ok(())
    }
}

fn read_header<R: io::Read>(
    input: &mut R,
) -> Result<(OpCode, InstrFlags, BitWidth), CodecError> {
    let mut header = [0u8; 4];
    input.read_exact(&mut header)?;
    let op = OpCode::try_from(header[0])?;
    let flags = InstrFlags::from_bits(header[1])
        .ok_or(CodecError::UnknownFlags(header[1]))?;
    let width = BitWidth::from_le_bytes([header[2], header[3]]);
    Ok((op, flags, width))
}

fn read_u64<R: io::Read>(input: &mut R) -> Result<u64, CodecError> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32<R: io::Read>(input: &mut R) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(width: BitWidth, a: VirtAddr, b: VirtAddr, out: VirtAddr) -> VirtInstruction {
        let mut instr = VirtInstruction::new(OpCode::IntAdd, width);
        instr.inputs[0] = a;
        instr.inputs[1] = b;
        instr.output = out;
        instr
    }

    #[test]
    fn virt_codec_round_trip() {
        let mut instr = VirtInstruction::new(OpCode::PublicConstant, 64);
        instr.output = 0x1234;
        instr.constant = 77;

        let mut buf = Vec::new();
        instr.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), instr.encoded_size());

        let decoded = VirtInstruction::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, instr);
    }

    #[test]
    fn virt_decoder_rejects_swaps() {
        let swap = PhysInstruction::swap_in(3, 1);
        let mut buf = Vec::new();
        swap.write_to(&mut buf).unwrap();

        let err = VirtInstruction::read_from(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::SwapInVirtualProgram(OpCode::SwapIn)));
    }

    #[test]
    fn phys_swap_round_trip() {
        let swap = PhysInstruction::swap_out(99, 4);
        let mut buf = Vec::new();
        swap.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 20);

        let decoded = PhysInstruction::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.swap_page(), 99);
        assert_eq!(decoded.swap_slot(), 4);
    }

    #[test]
    fn truncated_instruction_is_an_error() {
        let instr = add(32, 0, 32, 64);
        let mut buf = Vec::new();
        instr.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);

        assert!(VirtInstruction::read_from(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn input_ranges_merge_overlapping_operands() {
        // page_shift 10: 1024-bit pages. Both operands inside page 0.
        let instr = add(32, 0, 32, 1024);
        let ranges = instr.input_page_ranges(10);
        assert_eq!(ranges.iter().count(), 1);
        assert_eq!(ranges.num_pages(), 1);
        assert_eq!(ranges.pages().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn input_ranges_keep_operand_order_when_disjoint() {
        // First operand on page 5, second on page 2.
        let instr = add(32, 5 << 10, 2 << 10, 7 << 10);
        let ranges = instr.input_page_ranges(10);
        assert_eq!(ranges.pages().collect::<Vec<_>>(), vec![5, 2]);
    }

    #[test]
    fn input_ranges_merge_adjacent_pages() {
        // Operands on pages 2 and 3: adjacent, so one range.
        let instr = add(32, 2 << 10, 3 << 10, 0);
        let ranges = instr.input_page_ranges(10);
        assert_eq!(ranges.iter().count(), 1);
        assert_eq!(ranges.pages().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn multi_page_operands_span_ranges() {
        // Width 2048 with 1024-bit pages: each operand covers two pages.
        let mut instr = VirtInstruction::new(OpCode::BitAnd, 2048);
        instr.inputs[0] = 0;
        instr.inputs[1] = 4 << 10;
        instr.output = 8 << 10;

        let inputs = instr.input_page_ranges(10);
        assert_eq!(inputs.num_pages(), 4);
        assert_eq!(inputs.pages().collect::<Vec<_>>(), vec![0, 1, 4, 5]);

        let output = instr.output_page_range(10).unwrap();
        assert_eq!(output.num_pages(), 2);
    }

    #[test]
    fn select_counts_selector_page_once() {
        // Selector is a single bit, so it covers exactly one page even for
        // wide operand widths.
        let mut instr = VirtInstruction::new(OpCode::ValueSelect, 2048);
        instr.inputs[0] = 0;
        instr.inputs[1] = 4 << 10;
        instr.inputs[2] = 9 << 10;
        instr.output = 16 << 10;

        let inputs = instr.input_page_ranges(10);
        assert_eq!(inputs.pages().collect::<Vec<_>>(), vec![0, 1, 4, 5, 9]);
    }

    #[test]
    fn output_instruction_moves_no_pages() {
        let mut instr = VirtInstruction::new(OpCode::Output, 64);
        instr.output = 0x40;
        assert!(instr.output_page_range(10).is_none());
        assert_eq!(instr.input_page_ranges(10).num_pages(), 0);
    }

    #[test]
    fn cascading_merge_bridges_ranges() {
        // Operand ranges [0,0], [2,2], then [1,1] bridges them into [0,2].
        let mut instr = VirtInstruction::new(OpCode::ValueSelect, 1024);
        instr.inputs[0] = 0;
        instr.inputs[1] = 2 << 10;
        instr.inputs[2] = 1 << 10;
        instr.output = 5 << 10;

        let inputs = instr.input_page_ranges(10);
        assert_eq!(inputs.iter().count(), 1);
        assert_eq!(inputs.pages().collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
