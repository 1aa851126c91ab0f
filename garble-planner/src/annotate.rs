use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use garble_asm::{CodecError, OutputRange, ProgramImage};
use garble_types::{
    page_number, InstrNumber, PageShift, VirtPageNumber, ANNOTATION_MAGIC, LIVE_OUTPUT,
    NEVER, VIRTUAL_ADDRESS_BITS,
};

use crate::annotation::Annotation;
use crate::error::PlanError;

/// Every page covered by the program's output ranges. These pages must
/// survive to the end of the stream.
pub fn live_output_pages(
    outputs: &[OutputRange],
    page_shift: PageShift,
) -> HashSet<VirtPageNumber> {
    let mut pages = HashSet::new();
    for range in outputs {
        if range.end > range.start {
            let first = page_number(range.start, page_shift);
            let last = page_number(range.end - 1, page_shift);
            pages.extend(first..=last);
        }
    }
    pages
}

/// Annotate `program` in one backward pass, writing records in reverse
/// instruction order to `reverse_path`.
///
/// Scanning backwards turns "next use" into "previously seen use": a map
/// from page to the last instruction number seen holds, for every live
/// page, exactly the entry the record needs. Input pages write the stored
/// entry (or `NEVER`) and overwrite it with the current instruction;
/// output pages write the stored entry and clear it, since the instruction
/// produces the page and anything before it sees dead contents.
///
/// The map is seeded with the program's output pages at `LIVE_OUTPUT`, so
/// the producer of each revealed region is annotated with the sentinel
/// rather than `NEVER`.
///
/// Returns the peak working-set size in pages: the high-water cardinality
/// of the page map, which bounds the capacity needed for swap-free
/// placement.
pub fn reverse_annotate(
    program: &ProgramImage,
    page_shift: PageShift,
    reverse_path: &Path,
) -> Result<u64, PlanError> {
    if page_shift as u32 >= VIRTUAL_ADDRESS_BITS {
        return Err(PlanError::BadPageShift(page_shift));
    }

    let mut next_access: HashMap<VirtPageNumber, InstrNumber> =
        live_output_pages(&program.outputs, page_shift)
            .into_iter()
            .map(|page| (page, LIVE_OUTPUT))
            .collect();
    let mut max_working_set = next_access.len() as u64;

    let mut out = BufWriter::new(File::create(reverse_path)?);
    for (i, instr) in program.instructions.iter().enumerate().rev() {
        let i = i as InstrNumber;
        let input_ranges = instr.input_page_ranges(page_shift);
        let output_range = instr.output_page_range(page_shift);

        let num_input_pages = input_ranges.num_pages();
        let num_output_pages = output_range.map_or(0, |r| r.num_pages());
        if num_input_pages + num_output_pages > u16::MAX as u64 {
            return Err(PlanError::PageCountOverflow {
                instr: i,
                pages: num_input_pages + num_output_pages,
            });
        }

        let mut record =
            Annotation::with_counts(num_input_pages as u16, num_output_pages as u16);
        for page in input_ranges.pages() {
            let previous = next_access.insert(page, i);
            record.push_slot(previous.unwrap_or(NEVER));
        }

        max_working_set = max_working_set.max(next_access.len() as u64);

        if let Some(range) = output_range {
            for page in (range.start..=range.end).rev() {
                let previous = next_access.remove(&page);
                record.push_slot(previous.unwrap_or(NEVER));
            }
        }

        record.write_to(&mut out)?;
    }
    out.flush()?;

    tracing::debug!(
        instructions = program.instructions.len(),
        max_working_set,
        "reverse annotation pass complete"
    );
    Ok(max_working_set)
}

/// Rewrite the reverse-order record stream at `reverse_path` into forward
/// instruction order at `forward_path`.
///
/// Records are self-describing, so the stream is walked once forward to
/// find record boundaries and then copied out back to front.
pub fn unreverse_annotations(
    reverse_path: &Path,
    forward_path: &Path,
) -> Result<(), PlanError> {
    let data = fs::read(reverse_path)?;

    let mut spans = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < 8 {
            return Err(CodecError::Truncated("annotation record header").into());
        }
        let num_input_pages = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        let num_output_pages = u16::from_le_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let magic = u32::from_le_bytes([
            data[pos + 4],
            data[pos + 5],
            data[pos + 6],
            data[pos + 7],
        ]);
        if magic != ANNOTATION_MAGIC {
            return Err(CodecError::BadMagic {
                kind: "annotation",
                expected: ANNOTATION_MAGIC as u64,
                found: magic as u64,
            }
            .into());
        }
        let len = 8 + 8 * (num_input_pages + num_output_pages);
        if data.len() - pos < len {
            return Err(CodecError::Truncated("annotation record").into());
        }
        spans.push((pos, len));
        pos += len;
    }

    let mut out = BufWriter::new(File::create(forward_path)?);
    for &(start, len) in spans.iter().rev() {
        out.write_all(&data[start..start + len])?;
    }
    out.flush()?;
    Ok(())
}
