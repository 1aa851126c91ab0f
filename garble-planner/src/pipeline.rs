use std::path::{Path, PathBuf};

use garble_asm::{CodecError, PhysProgramWriter, ProgramImage};
use garble_types::PageShift;

use crate::annotate::{live_output_pages, reverse_annotate, unreverse_annotations};
use crate::annotation::AnnotationReader;
use crate::error::PlanError;
use crate::place::Placer;

/// Statistics reported by a completed planning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanReport {
    /// Pages loaded from storage during execution.
    pub num_swapins: u64,
    /// Pages written back to storage, final output flushes included.
    pub num_swapouts: u64,
    /// Peak working-set size of the program, in pages. Any capacity at or
    /// above this executes without eviction traffic.
    pub peak_working_set: u64,
    /// Physical records emitted, swap records included.
    pub num_instructions: u64,
}

/// Paths of the files a planning run produces next to the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanPaths {
    /// Reverse-order annotation stream.
    pub reverse_annotations: PathBuf,
    /// Forward annotation stream.
    pub annotations: PathBuf,
    /// Physical bytecode.
    pub physical_program: PathBuf,
}

impl PlanPaths {
    /// Derive the output paths for `program` by replacing its extension.
    pub fn for_program(program: &Path) -> Self {
        PlanPaths {
            reverse_annotations: program.with_extension("rann"),
            annotations: program.with_extension("ann"),
            physical_program: program.with_extension("memprog"),
        }
    }
}

/// Run the full pipeline over the program at `program`: reverse
/// annotation, un-reversal, and placement into a physical program with
/// `capacity` resident page slots.
pub fn plan(
    program: &Path,
    capacity: u64,
    page_shift: PageShift,
) -> Result<PlanReport, PlanError> {
    let paths = PlanPaths::for_program(program);
    let image = ProgramImage::load(program)?;
    tracing::info!(
        program = %program.display(),
        instructions = image.header.num_instructions,
        pages = image.header.num_pages,
        capacity,
        page_shift,
        "planning"
    );

    let peak_working_set = reverse_annotate(&image, page_shift, &paths.reverse_annotations)?;
    unreverse_annotations(&paths.reverse_annotations, &paths.annotations)?;

    let live = live_output_pages(&image.outputs, page_shift);
    let writer = PhysProgramWriter::create(&paths.physical_program)?;
    let mut placer = Placer::new(capacity, page_shift, live, writer)?;
    let mut annotations = AnnotationReader::open(&paths.annotations)?;
    for instr in &image.instructions {
        let record = annotations
            .next_record()?
            .ok_or(CodecError::Truncated("annotation stream"))?;
        placer.place_instruction(instr, &record)?;
    }
    let placement = placer.finish()?;

    let report = PlanReport {
        num_swapins: placement.num_swapins,
        num_swapouts: placement.num_swapouts,
        peak_working_set,
        num_instructions: placement.num_instructions,
    };
    tracing::info!(
        swapins = report.num_swapins,
        swapouts = report.num_swapouts,
        peak_working_set = report.peak_working_set,
        "planning complete"
    );
    Ok(report)
}
