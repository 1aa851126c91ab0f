use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use garble_types::{InstrNumber, VirtAddr, PROGRAM_MAGIC};

use crate::error::CodecError;
use crate::instruction::{PhysInstruction, VirtInstruction};

/// Header of a virtual program file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramHeader {
    /// Number of packed instructions following the header.
    pub num_instructions: u64,
    /// Number of output ranges in the trailer.
    pub num_output_ranges: u64,
    /// Number of virtual pages the program's address space spans.
    pub num_pages: u64,
}

/// A half-open range `[start, end)` of virtual addresses revealed as
/// program output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputRange {
    /// First revealed bit address.
    pub start: VirtAddr,
    /// One past the last revealed bit address.
    pub end: VirtAddr,
}

const VIRT_HEADER_SIZE: u64 = 32;
const PHYS_HEADER_SIZE: u64 = 16;
const OUTPUT_RANGE_SIZE: u64 = 16;

/// Writes a virtual program file: a zeroed header, packed instructions as
/// they are appended, the coalesced output-range trailer, and finally the
/// real header patched in place.
#[derive(Debug)]
pub struct VirtProgramWriter {
    output: BufWriter<File>,
    count: InstrNumber,
    outputs: Vec<OutputRange>,
    num_pages: u64,
}

impl VirtProgramWriter {
    /// Create (truncating) the program file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let mut output = BufWriter::new(File::create(path)?);
        output.write_all(&[0u8; VIRT_HEADER_SIZE as usize])?;
        Ok(VirtProgramWriter {
            output,
            count: 0,
            outputs: Vec::new(),
            num_pages: 0,
        })
    }

    /// Append one packed instruction.
    pub fn append(&mut self, instr: &VirtInstruction) -> Result<(), CodecError> {
        instr.write_to(&mut self.output)?;
        self.count += 1;
        Ok(())
    }

    /// Record `[addr, addr + width)` as program output, coalescing with the
    /// previous range when they abut.
    pub fn mark_output(&mut self, addr: VirtAddr, width: u64) {
        match self.outputs.last_mut() {
            Some(last) if last.end == addr => last.end = addr + width,
            _ => self.outputs.push(OutputRange {
                start: addr,
                end: addr + width,
            }),
        }
    }

    /// Set the page count recorded in the header.
    pub fn set_page_count(&mut self, num_pages: u64) {
        self.num_pages = num_pages;
    }

    /// Number of instructions appended so far.
    pub fn num_instructions(&self) -> InstrNumber {
        self.count
    }

    /// Write the trailer, patch the header, and flush.
    pub fn finish(mut self) -> Result<ProgramHeader, CodecError> {
        for range in &self.outputs {
            self.output.write_all(&range.start.to_le_bytes())?;
            self.output.write_all(&range.end.to_le_bytes())?;
        }
        let header = ProgramHeader {
            num_instructions: self.count,
            num_output_ranges: self.outputs.len() as u64,
            num_pages: self.num_pages,
        };
        self.output.seek(SeekFrom::Start(0))?;
        self.output.write_all(&PROGRAM_MAGIC.to_le_bytes())?;
        self.output.write_all(&header.num_instructions.to_le_bytes())?;
        self.output.write_all(&header.num_output_ranges.to_le_bytes())?;
        self.output.write_all(&header.num_pages.to_le_bytes())?;
        self.output.flush()?;
        Ok(header)
    }
}

/// Streams a virtual program file forward: header and output ranges are
/// available immediately, instructions are decoded one at a time.
#[derive(Debug)]
pub struct VirtProgramReader {
    input: BufReader<File>,
    header: ProgramHeader,
    outputs: Vec<OutputRange>,
    next: InstrNumber,
}

impl VirtProgramReader {
    /// Open the program file at `path` and read its header and trailer.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let mut input = BufReader::new(File::open(path)?);

        let magic = read_u64(&mut input)?;
        if magic != PROGRAM_MAGIC {
            return Err(CodecError::BadMagic {
                kind: "program",
                expected: PROGRAM_MAGIC,
                found: magic,
            });
        }
        let header = ProgramHeader {
            num_instructions: read_u64(&mut input)?,
            num_output_ranges: read_u64(&mut input)?,
            num_pages: read_u64(&mut input)?,
        };

        // The instruction region is variable-length, so the trailer is
        // located from the end of the file instead.
        let trailer = header.num_output_ranges * OUTPUT_RANGE_SIZE;
        let file_len = input.get_ref().metadata()?.len();
        if file_len < VIRT_HEADER_SIZE + trailer {
            return Err(CodecError::Truncated("program file trailer"));
        }
        input.seek(SeekFrom::End(-(trailer as i64)))?;
        let mut outputs = Vec::with_capacity(header.num_output_ranges as usize);
        for _ in 0..header.num_output_ranges {
            let start = read_u64(&mut input)?;
            let end = read_u64(&mut input)?;
            outputs.push(OutputRange { start, end });
        }
        input.seek(SeekFrom::Start(VIRT_HEADER_SIZE))?;

        Ok(VirtProgramReader {
            input,
            header,
            outputs,
            next: 0,
        })
    }

    /// The file header.
    pub fn header(&self) -> &ProgramHeader {
        &self.header
    }

    /// The coalesced output ranges from the trailer.
    pub fn outputs(&self) -> &[OutputRange] {
        &self.outputs
    }

    /// Decode the next instruction, or `None` past the last one.
    pub fn next_instruction(&mut self) -> Option<Result<VirtInstruction, CodecError>> {
        if self.next == self.header.num_instructions {
            return None;
        }
        self.next += 1;
        Some(VirtInstruction::read_from(&mut self.input))
    }
}

/// A fully decoded virtual program, for passes that need random or
/// backward access to instructions.
#[derive(Debug)]
pub struct ProgramImage {
    /// The file header.
    pub header: ProgramHeader,
    /// Every instruction, in program order.
    pub instructions: Vec<VirtInstruction>,
    /// The coalesced output ranges.
    pub outputs: Vec<OutputRange>,
}

impl ProgramImage {
    /// Load and decode the whole program at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let mut reader = VirtProgramReader::open(path)?;
        let mut instructions =
            Vec::with_capacity(reader.header().num_instructions as usize);
        while let Some(instr) = reader.next_instruction() {
            instructions.push(instr?);
        }
        Ok(ProgramImage {
            header: reader.header,
            instructions,
            outputs: reader.outputs,
        })
    }
}

/// Writes a physical program file; the instruction count is patched into
/// the header on [`PhysProgramWriter::finish`].
#[derive(Debug)]
pub struct PhysProgramWriter {
    output: BufWriter<File>,
    count: InstrNumber,
}

impl PhysProgramWriter {
    /// Create (truncating) the physical program file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let mut output = BufWriter::new(File::create(path)?);
        output.write_all(&[0u8; PHYS_HEADER_SIZE as usize])?;
        Ok(PhysProgramWriter { output, count: 0 })
    }

    /// Append one packed instruction.
    pub fn append(&mut self, instr: &PhysInstruction) -> Result<(), CodecError> {
        instr.write_to(&mut self.output)?;
        self.count += 1;
        Ok(())
    }

    /// Number of instructions appended so far, swap records included.
    pub fn num_instructions(&self) -> InstrNumber {
        self.count
    }

    /// Patch the header and flush.
    pub fn finish(mut self) -> Result<InstrNumber, CodecError> {
        self.output.seek(SeekFrom::Start(0))?;
        self.output.write_all(&PROGRAM_MAGIC.to_le_bytes())?;
        self.output.write_all(&self.count.to_le_bytes())?;
        self.output.flush()?;
        Ok(self.count)
    }
}

/// Streams a physical program file forward.
#[derive(Debug)]
pub struct PhysProgramReader {
    input: BufReader<File>,
    num_instructions: InstrNumber,
    next: InstrNumber,
}

impl PhysProgramReader {
    /// Open the physical program file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let mut input = BufReader::new(File::open(path)?);
        let magic = read_u64(&mut input)?;
        if magic != PROGRAM_MAGIC {
            return Err(CodecError::BadMagic {
                kind: "physical program",
                expected: PROGRAM_MAGIC,
                found: magic,
            });
        }
        let num_instructions = read_u64(&mut input)?;
        Ok(PhysProgramReader {
            input,
            num_instructions,
            next: 0,
        })
    }

    /// Number of instructions in the file, swap records included.
    pub fn num_instructions(&self) -> InstrNumber {
        self.num_instructions
    }

    /// Decode the next instruction, or `None` past the last one.
    pub fn next_instruction(&mut self) -> Option<Result<PhysInstruction, CodecError>> {
        if self.next == self.num_instructions {
            return None;
        }
        self.next += 1;
        Some(PhysInstruction::read_from(&mut self.input))
    }
}

fn read_u64<R: Read>(input: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;
    use garble_types::INVALID_VADDR;

    fn const_instr(out: VirtAddr, k: u32) -> VirtInstruction {
        let mut instr = VirtInstruction::new(OpCode::PublicConstant, 64);
        instr.output = out;
        instr.constant = k;
        instr
    }

    #[test]
    fn write_then_read_program() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.prog");

        let mut writer = VirtProgramWriter::create(&path).unwrap();
        writer.append(&const_instr(0, 5)).unwrap();
        writer.append(&const_instr(64, 7)).unwrap();
        writer.mark_output(0, 64);
        writer.mark_output(64, 64);
        writer.set_page_count(1);
        let header = writer.finish().unwrap();
        assert_eq!(header.num_instructions, 2);
        // Abutting ranges coalesce.
        assert_eq!(header.num_output_ranges, 1);

        let mut reader = VirtProgramReader::open(&path).unwrap();
        assert_eq!(reader.header().num_instructions, 2);
        assert_eq!(reader.header().num_pages, 1);
        assert_eq!(reader.outputs(), &[OutputRange { start: 0, end: 128 }]);

        let first = reader.next_instruction().unwrap().unwrap();
        assert_eq!(first.constant, 5);
        assert_eq!(first.inputs, [INVALID_VADDR; 3]);
        let second = reader.next_instruction().unwrap().unwrap();
        assert_eq!(second.constant, 7);
        assert!(reader.next_instruction().is_none());
    }

    #[test]
    fn disjoint_outputs_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.prog");

        let mut writer = VirtProgramWriter::create(&path).unwrap();
        writer.mark_output(0, 64);
        writer.mark_output(256, 64);
        let header = writer.finish().unwrap();
        assert_eq!(header.num_output_ranges, 2);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.prog");
        std::fs::write(&path, [0xabu8; 64]).unwrap();

        let err = VirtProgramReader::open(&path).unwrap_err();
        assert!(matches!(err, CodecError::BadMagic { kind: "program", .. }));
    }

    #[test]
    fn phys_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.memprog");

        let mut writer = PhysProgramWriter::create(&path).unwrap();
        writer.append(&PhysInstruction::swap_in(7, 0)).unwrap();
        let mut add = PhysInstruction::new(OpCode::IntAdd, 32);
        add.inputs[0] = 0;
        add.inputs[1] = 32;
        add.output = 64;
        writer.append(&add).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let mut reader = PhysProgramReader::open(&path).unwrap();
        assert_eq!(reader.num_instructions(), 2);
        let swap = reader.next_instruction().unwrap().unwrap();
        assert_eq!(swap.op, OpCode::SwapIn);
        assert_eq!(swap.swap_page(), 7);
        let compute = reader.next_instruction().unwrap().unwrap();
        assert_eq!(compute.op, OpCode::IntAdd);
        assert!(reader.next_instruction().is_none());
    }

    #[test]
    fn image_loads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.prog");

        let mut writer = VirtProgramWriter::create(&path).unwrap();
        writer.append(&const_instr(0, 1)).unwrap();
        writer.mark_output(0, 64);
        writer.finish().unwrap();

        let image = ProgramImage::load(&path).unwrap();
        assert_eq!(image.instructions.len(), 1);
        assert_eq!(image.outputs.len(), 1);
    }
}
