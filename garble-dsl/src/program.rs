use std::path::Path;

use garble_asm::{OpCode, ProgramHeader, VirtInstruction, VirtProgramWriter};
use garble_types::{page_size, BitWidth, PageShift, VirtAddr, WorkerId};

use crate::allocator::AddressSpace;
use crate::error::BuildError;

/// A program under construction: the virtual-address allocator plus the
/// bytecode file being written.
///
/// Value handles ([`crate::Integer`]) borrow this mutably for every
/// operation, so each operation is emitted immediately; there is no
/// in-memory expression graph.
#[derive(Debug)]
pub struct Program {
    writer: VirtProgramWriter,
    space: AddressSpace,
    page_shift: PageShift,
}

impl Program {
    /// Start writing a program file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, page_shift: PageShift) -> Result<Self, BuildError> {
        Ok(Program {
            writer: VirtProgramWriter::create(path)?,
            space: AddressSpace::new(),
            page_shift,
        })
    }

    /// Page shift the program is being planned for.
    pub fn page_shift(&self) -> PageShift {
        self.page_shift
    }

    /// Number of instructions emitted so far.
    pub fn num_instructions(&self) -> u64 {
        self.writer.num_instructions()
    }

    /// Allocate a fresh output region for `instr` and append it.
    ///
    /// The region's width is the opcode's output width for the
    /// instruction's operand width.
    pub(crate) fn emit_new(&mut self, mut instr: VirtInstruction) -> Result<VirtAddr, BuildError> {
        let width = instr.op.output_width(instr.width);
        let addr = self.space.allocate(width as u64)?;
        instr.output = addr;
        self.writer.append(&instr)?;
        Ok(addr)
    }

    /// Append `instr` writing to a region the caller already owns.
    pub(crate) fn emit_in_place(&mut self, instr: VirtInstruction) -> Result<(), BuildError> {
        self.writer.append(&instr)?;
        Ok(())
    }

    /// Allocate a region whose width differs from the emitted
    /// instruction's output width (a widening mutate into an invalid
    /// value).
    pub(crate) fn allocate(&mut self, width: BitWidth) -> Result<VirtAddr, BuildError> {
        self.space.allocate(width as u64)
    }

    /// Return a region to the allocator.
    pub(crate) fn recycle(&mut self, addr: VirtAddr, width: BitWidth) {
        self.space.recycle(addr, width as u64);
    }

    /// Reveal `[addr, addr + width)` as program output: emits the `Output`
    /// instruction and records the range in the file trailer.
    pub(crate) fn mark_output(&mut self, addr: VirtAddr, width: BitWidth) -> Result<(), BuildError> {
        let mut instr = VirtInstruction::new(OpCode::Output, width);
        instr.output = addr;
        self.writer.append(&instr)?;
        self.writer.mark_output(addr, width as u64);
        Ok(())
    }

    /// Block the executor until all sends enqueued for `to` have drained.
    pub fn finish_send(&mut self, to: WorkerId) -> Result<(), BuildError> {
        let mut instr = VirtInstruction::new(OpCode::FinishSend, 0);
        instr.constant = to;
        self.writer.append(&instr)?;
        Ok(())
    }

    /// Block the executor until all receives posted from `from` complete.
    pub fn finish_receive(&mut self, from: WorkerId) -> Result<(), BuildError> {
        let mut instr = VirtInstruction::new(OpCode::FinishReceive, 0);
        instr.constant = from;
        self.writer.append(&instr)?;
        Ok(())
    }

    /// Write the trailer and patched header, closing the file.
    pub fn finish(mut self) -> Result<ProgramHeader, BuildError> {
        let page_bits = page_size(self.page_shift);
        let num_pages = (self.space.next_free() + page_bits - 1) >> self.page_shift;
        self.writer.set_page_count(num_pages);
        let header = self.writer.finish()?;
        tracing::debug!(
            instructions = header.num_instructions,
            output_ranges = header.num_output_ranges,
            pages = header.num_pages,
            "program builder closed"
        );
        Ok(header)
    }
}
