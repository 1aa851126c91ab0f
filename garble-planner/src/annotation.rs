use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use garble_asm::CodecError;
use garble_types::{InstrNumber, ANNOTATION_MAGIC};

/// Next-use metadata for one instruction.
///
/// Slots hold, for every page the instruction touches, the number of the
/// next instruction to touch that page, or one of the sentinels
/// [`garble_types::NEVER`] and [`garble_types::LIVE_OUTPUT`]. Input-page
/// slots come first, in the order defined by
/// [`garble_asm::VirtInstruction::input_page_ranges`]; output-page slots
/// follow, pages in descending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    num_input_pages: u16,
    num_output_pages: u16,
    slots: Vec<InstrNumber>,
}

impl Annotation {
    /// A record with room for the given page counts; slots are filled by
    /// pushing input entries first, then output entries.
    pub(crate) fn with_counts(num_input_pages: u16, num_output_pages: u16) -> Self {
        Annotation {
            num_input_pages,
            num_output_pages,
            slots: Vec::with_capacity(num_input_pages as usize + num_output_pages as usize),
        }
    }

    pub(crate) fn push_slot(&mut self, next_use: InstrNumber) {
        debug_assert!(
            self.slots.len()
                < self.num_input_pages as usize + self.num_output_pages as usize
        );
        self.slots.push(next_use);
    }

    /// Number of input pages described by this record.
    pub fn num_input_pages(&self) -> u16 {
        self.num_input_pages
    }

    /// Number of output pages described by this record.
    pub fn num_output_pages(&self) -> u16 {
        self.num_output_pages
    }

    /// Next-use entries for the input pages, in annotation order.
    pub fn input_slots(&self) -> &[InstrNumber] {
        &self.slots[..self.num_input_pages as usize]
    }

    /// Next-use entries for the output pages, pages in descending order.
    pub fn output_slots(&self) -> &[InstrNumber] {
        &self.slots[self.num_input_pages as usize..]
    }

    /// Size of the packed record in bytes.
    pub fn encoded_size(&self) -> usize {
        8 + 8 * self.slots.len()
    }

    /// Append the packed record: counts, magic, then the slots.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        debug_assert_eq!(
            self.slots.len(),
            self.num_input_pages as usize + self.num_output_pages as usize
        );
        out.write_all(&self.num_input_pages.to_le_bytes())?;
        out.write_all(&self.num_output_pages.to_le_bytes())?;
        out.write_all(&ANNOTATION_MAGIC.to_le_bytes())?;
        for slot in &self.slots {
            out.write_all(&slot.to_le_bytes())?;
        }
        Ok(())
    }

    /// Decode one packed record, validating the magic.
    pub fn read_from<R: Read>(input: &mut R) -> Result<Self, CodecError> {
        let mut header = [0u8; 8];
        input.read_exact(&mut header)?;
        let num_input_pages = u16::from_le_bytes([header[0], header[1]]);
        let num_output_pages = u16::from_le_bytes([header[2], header[3]]);
        let magic = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if magic != ANNOTATION_MAGIC {
            return Err(CodecError::BadMagic {
                kind: "annotation",
                expected: ANNOTATION_MAGIC as u64,
                found: magic as u64,
            });
        }
        let count = num_input_pages as usize + num_output_pages as usize;
        let mut slots = Vec::with_capacity(count);
        let mut buf = [0u8; 8];
        for _ in 0..count {
            input.read_exact(&mut buf)?;
            slots.push(u64::from_le_bytes(buf));
        }
        Ok(Annotation {
            num_input_pages,
            num_output_pages,
            slots,
        })
    }
}

/// Streams annotation records from a forward annotation file.
#[derive(Debug)]
pub struct AnnotationReader {
    input: BufReader<File>,
}

impl AnnotationReader {
    /// Open the annotation file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        Ok(AnnotationReader {
            input: BufReader::new(File::open(path)?),
        })
    }

    /// Decode the next record, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<Annotation>, CodecError> {
        // Peek one byte to distinguish a clean end of file from a record
        // truncated mid-way.
        let mut first = [0u8; 1];
        match self.input.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        let record = Annotation::read_from(&mut (&first[..]).chain(&mut self.input))?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garble_types::{LIVE_OUTPUT, NEVER};

    #[test]
    fn record_round_trip() {
        let mut record = Annotation::with_counts(2, 1);
        record.push_slot(7);
        record.push_slot(NEVER);
        record.push_slot(LIVE_OUTPUT);

        let mut buf = Vec::new();
        record.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), record.encoded_size());

        let decoded = Annotation::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.input_slots(), &[7, NEVER]);
        assert_eq!(decoded.output_slots(), &[LIVE_OUTPUT]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let record = Annotation::with_counts(0, 0);
        let mut buf = Vec::new();
        record.write_to(&mut buf).unwrap();
        buf[4] ^= 0xff;

        assert!(matches!(
            Annotation::read_from(&mut buf.as_slice()),
            Err(CodecError::BadMagic { kind: "annotation", .. })
        ));
    }
}
