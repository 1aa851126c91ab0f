use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use garble_asm::{PhysInstruction, PhysProgramWriter, VirtInstruction};
use garble_types::{
    page_number, page_offset, InstrNumber, PageShift, PhysSlot, VirtPageNumber,
    MAX_INSTR_PAGES, NEVER,
};

use crate::annotation::Annotation;
use crate::error::PlanError;
use crate::priority::NextUseIndex;

/// Counters reported after placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Pages loaded from storage into the resident region.
    pub num_swapins: u64,
    /// Pages written back to storage, final live-output flushes included.
    pub num_swapouts: u64,
    /// Physical records emitted, swap records included.
    pub num_instructions: u64,
}

/// Rewrites a virtual program into a physical one, keeping every
/// referenced page resident in a region of `capacity` page slots.
///
/// Eviction is Belady's rule over the next-use annotations: the victim is
/// the resident page whose next use lies farthest in the future, with
/// `NEVER` farthest of all and `LIVE_OUTPUT` just below it, so dead pages
/// go first and revealed outputs are always written back. A victim whose
/// next use is `NEVER` and which backs no program output is discarded
/// without a swap-out.
///
/// The emitted stream is consumed sequentially: swap records always
/// precede the compute record they make room for, and the executor reads
/// every input operand before writing any output, so an output may reuse
/// the slot of an input page evicted in the same step.
#[derive(Debug)]
pub struct Placer {
    capacity: u64,
    page_shift: PageShift,
    resident: HashMap<VirtPageNumber, PhysSlot>,
    free: Vec<PhysSlot>,
    index: NextUseIndex,
    live_outputs: HashSet<VirtPageNumber>,
    output: PhysProgramWriter,
    num_swapins: u64,
    num_swapouts: u64,
    next_instr: InstrNumber,
}

impl Placer {
    /// A placer over a resident region of `capacity` page slots.
    pub fn new(
        capacity: u64,
        page_shift: PageShift,
        live_outputs: HashSet<VirtPageNumber>,
        output: PhysProgramWriter,
    ) -> Result<Self, PlanError> {
        if capacity < MAX_INSTR_PAGES {
            return Err(PlanError::CapacityTooSmall { capacity });
        }
        Ok(Placer {
            capacity,
            page_shift,
            resident: HashMap::new(),
            // Stored high-to-low so slots are handed out in ascending order.
            free: (0..capacity).rev().collect(),
            index: NextUseIndex::new(),
            live_outputs,
            output,
            num_swapins: 0,
            num_swapouts: 0,
            next_instr: 0,
        })
    }

    /// Place one instruction: admit its pages, emit any swaps, and emit
    /// the rewritten compute record.
    pub fn place_instruction(
        &mut self,
        instr: &VirtInstruction,
        record: &Annotation,
    ) -> Result<(), PlanError> {
        let current = self.next_instr;
        self.next_instr += 1;

        let info = instr.op.info();
        if !info.page_traffic {
            if record.num_input_pages() != 0 || record.num_output_pages() != 0 {
                return Err(PlanError::AnnotationMismatch {
                    instr: current,
                    reason: "record for an instruction without page traffic lists pages",
                });
            }
            // Copied through unrewritten; an Output marker keeps its
            // virtual address for the executor's output stage.
            let mut phys = PhysInstruction::new(instr.op, instr.width);
            phys.flags = instr.flags;
            phys.constant = instr.constant;
            phys.output = instr.output;
            self.output.append(&phys)?;
            return Ok(());
        }

        // Input admission. All of this instruction's input pages are
        // pinned while inputs are admitted: evicting one to admit another
        // would hand out a slot the compute record still reads.
        let input_ranges = instr.input_page_ranges(self.page_shift);
        if input_ranges.num_pages() != record.num_input_pages() as u64 {
            return Err(PlanError::AnnotationMismatch {
                instr: current,
                reason: "input page count disagrees with the operands",
            });
        }
        let pins: Vec<VirtPageNumber> = input_ranges.pages().collect();
        let mut input_slots: Vec<(VirtPageNumber, PhysSlot, InstrNumber)> =
            Vec::with_capacity(pins.len());
        for (page, &next_use) in input_ranges.pages().zip(record.input_slots()) {
            let slot = match self.resident.get(&page) {
                Some(&slot) => {
                    self.index.update(slot, page, next_use);
                    slot
                }
                None => {
                    let slot = self.allocate_slot(&pins)?;
                    self.output.append(&PhysInstruction::swap_in(page, slot))?;
                    self.num_swapins += 1;
                    self.resident.insert(page, slot);
                    self.index.insert(slot, page, next_use);
                    slot
                }
            };
            input_slots.push((page, slot, next_use));
        }

        // Output provisioning, pages descending to match the record. No
        // swap-in: the pages are produced, not read. A dead output page is
        // admitted with NEVER so the operand can be rewritten; it is the
        // first eviction victim and is discarded without a swap-out.
        // Inputs are fair game as victims here: their swap-outs land
        // before the compute record, which reads inputs before writing.
        let mut output_slots: Vec<(VirtPageNumber, PhysSlot)> = Vec::new();
        let mut output_pins: Vec<VirtPageNumber> = Vec::new();
        match instr.output_page_range(self.page_shift) {
            Some(range) => {
                if range.num_pages() != record.num_output_pages() as u64 {
                    return Err(PlanError::AnnotationMismatch {
                        instr: current,
                        reason: "output page count disagrees with the operand",
                    });
                }
                for (page, &next_use) in
                    (range.start..=range.end).rev().zip(record.output_slots())
                {
                    output_pins.push(page);
                    let slot = match self.resident.get(&page) {
                        Some(&slot) => {
                            self.index.update(slot, page, next_use);
                            slot
                        }
                        None => {
                            let slot = self.allocate_slot(&output_pins)?;
                            self.resident.insert(page, slot);
                            self.index.insert(slot, page, next_use);
                            slot
                        }
                    };
                    output_slots.push((page, slot));
                }
            }
            None => {
                if record.num_output_pages() != 0 {
                    return Err(PlanError::AnnotationMismatch {
                        instr: current,
                        reason: "record lists output pages for a non-producing instruction",
                    });
                }
            }
        }

        // Rewrite operands against the captured slots; resident state may
        // already disagree for inputs the output provisioning evicted.
        let mut phys = PhysInstruction::new(instr.op, instr.width);
        phys.flags = instr.flags;
        phys.constant = instr.constant;
        for k in 0..info.num_inputs {
            let addr = instr.inputs[k];
            let page = page_number(addr, self.page_shift);
            let slot = input_slots
                .iter()
                .find(|(p, _, _)| *p == page)
                .map(|&(_, slot, _)| slot)
                .ok_or(PlanError::AnnotationMismatch {
                    instr: current,
                    reason: "input operand page missing from the admitted set",
                })?;
            phys.inputs[k] =
                (slot << self.page_shift) | page_offset(addr, self.page_shift);
        }
        if info.has_output {
            let page = page_number(instr.output, self.page_shift);
            let slot = output_slots
                .iter()
                .find(|(p, _)| *p == page)
                .map(|&(_, slot)| slot)
                .ok_or(PlanError::AnnotationMismatch {
                    instr: current,
                    reason: "output operand page missing from the provisioned set",
                })?;
            phys.output =
                (slot << self.page_shift) | page_offset(instr.output, self.page_shift);
        }
        self.output.append(&phys)?;

        // Dead inputs release their slots now that the compute record has
        // been emitted, unless the output re-provisioned the page. The
        // index must not retain entries for pages past their last use.
        for (page, slot, next_use) in input_slots {
            if next_use == NEVER
                && !output_pins.contains(&page)
                && self.resident.get(&page) == Some(&slot)
            {
                self.index.remove(slot);
                self.resident.remove(&page);
                self.free.push(slot);
            }
        }
        Ok(())
    }

    /// Flush still-resident live-output pages and close the file.
    pub fn finish(mut self) -> Result<Placement, PlanError> {
        let live = self
            .resident
            .iter()
            .filter(|(page, _)| self.live_outputs.contains(page))
            .map(|(&page, &slot)| (page, slot))
            .sorted();
        for (page, slot) in live {
            self.output.append(&PhysInstruction::swap_out(page, slot))?;
            self.num_swapouts += 1;
        }

        let num_instructions = self.output.finish()?;
        tracing::debug!(
            swapins = self.num_swapins,
            swapouts = self.num_swapouts,
            records = num_instructions,
            "placement pass complete"
        );
        Ok(Placement {
            num_swapins: self.num_swapins,
            num_swapouts: self.num_swapouts,
            num_instructions,
        })
    }

    /// Take a free slot, or evict the resident page whose next use is
    /// farthest in the future, skipping `pinned` pages.
    fn allocate_slot(&mut self, pinned: &[VirtPageNumber]) -> Result<PhysSlot, PlanError> {
        if let Some(slot) = self.free.pop() {
            return Ok(slot);
        }
        let mut skipped = Vec::new();
        let result = loop {
            match self.index.pop_max() {
                None => {
                    break Err(PlanError::Unschedulable {
                        capacity: self.capacity,
                    })
                }
                Some(entry) if pinned.contains(&entry.page) => skipped.push(entry),
                Some(entry) => {
                    self.resident.remove(&entry.page);
                    if entry.next_use != NEVER || self.live_outputs.contains(&entry.page)
                    {
                        self.output
                            .append(&PhysInstruction::swap_out(entry.page, entry.slot))?;
                        self.num_swapouts += 1;
                    }
                    break Ok(entry.slot);
                }
            }
        };
        for entry in skipped {
            self.index.restore(entry);
        }
        result
    }
}
