//! End-to-end runs of the planning pipeline over programs built with the
//! DSL, checking the pipeline-boundary invariants on the emitted files.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use garble_asm::{OpCode, PhysInstruction, PhysProgramReader, ProgramImage, VirtInstruction};
use garble_dsl::{Integer, Party, Program};
use garble_planner::{live_output_pages, plan, PlanError};
use garble_types::{page_number, page_offset, PageShift, PhysSlot, VirtPageNumber};

fn build_program(
    dir: &Path,
    name: &str,
    page_shift: PageShift,
    build: impl FnOnce(&mut Program),
) -> PathBuf {
    let path = dir.join(name);
    let mut p = Program::create(&path, page_shift).unwrap();
    build(&mut p);
    p.finish().unwrap();
    path
}

fn read_physical(path: &Path) -> Vec<PhysInstruction> {
    let mut reader = PhysProgramReader::open(path).unwrap();
    let mut records = Vec::new();
    while let Some(record) = reader.next_instruction() {
        records.push(record.unwrap());
    }
    records
}

/// Replays the physical stream against the virtual program, checking that
/// every operand's page is resident in the slot the operand names at the
/// moment it is referenced, that slot indices stay below the capacity,
/// and that stripping swap records leaves the virtual opcode and width
/// sequence unchanged.
fn verify_stream(
    program: &ProgramImage,
    physical: &[PhysInstruction],
    capacity: u64,
    page_shift: PageShift,
) {
    let mut slot_contents: HashMap<PhysSlot, VirtPageNumber> = HashMap::new();
    let mut virt = program.instructions.iter();

    for record in physical {
        match record.op {
            OpCode::SwapIn => {
                assert!(record.swap_slot() < capacity, "slot out of range");
                slot_contents.insert(record.swap_slot(), record.swap_page());
            }
            OpCode::SwapOut => {
                assert!(record.swap_slot() < capacity, "slot out of range");
                assert_eq!(
                    slot_contents.get(&record.swap_slot()),
                    Some(&record.swap_page()),
                    "swap-out of a page not resident in its slot"
                );
            }
            _ => {
                let v: &VirtInstruction =
                    virt.next().expect("more compute records than instructions");
                assert_eq!(record.op, v.op);
                assert_eq!(record.width, v.width);
                assert_eq!(record.flags, v.flags);
                assert_eq!(record.constant, v.constant);

                let info = v.op.info();
                if !info.page_traffic {
                    continue;
                }
                for k in 0..info.num_inputs {
                    let page = page_number(v.inputs[k], page_shift);
                    let slot = record.inputs[k] >> page_shift;
                    assert!(slot < capacity);
                    assert_eq!(
                        page_offset(record.inputs[k], page_shift),
                        page_offset(v.inputs[k], page_shift),
                        "operand offset changed"
                    );
                    assert_eq!(
                        slot_contents.get(&slot),
                        Some(&page),
                        "input read from a slot holding the wrong page"
                    );
                }
                if info.has_output {
                    let page = page_number(v.output, page_shift);
                    let slot = record.output >> page_shift;
                    assert!(slot < capacity);
                    assert_eq!(
                        page_offset(record.output, page_shift),
                        page_offset(v.output, page_shift)
                    );
                    slot_contents.insert(slot, page);
                }
            }
        }
    }
    assert!(virt.next().is_none(), "compute records missing");
}

#[test]
fn tiny_add_program_plans_without_swaps() {
    let dir = tempfile::tempdir().unwrap();
    // 32-bit pages: every value is exactly one page.
    let path = build_program(dir.path(), "s1.prog", 5, |p| {
        let a = Integer::input(32, Party::Garbler, p).unwrap();
        let b = Integer::input(32, Party::Evaluator, p).unwrap();
        let c = a.add(&b, p).unwrap();
        c.mark_output(p).unwrap();
    });

    let report = plan(&path, 4, 5).unwrap();
    assert_eq!(report.peak_working_set, 3);
    assert_eq!(report.num_swapins, 0);
    // The only swap-out is the final flush of the revealed sum.
    assert_eq!(report.num_swapouts, 1);

    let physical = read_physical(&path.with_extension("memprog"));
    assert_eq!(physical.len(), 5);
    let last = physical.last().unwrap();
    assert_eq!(last.op, OpCode::SwapOut);
    assert_eq!(last.swap_page(), 2);

    let image = ProgramImage::load(&path).unwrap();
    verify_stream(&image, &physical, 4, 5);
}

#[test]
fn dead_output_is_never_swapped_out() {
    let dir = tempfile::tempdir().unwrap();
    // 64-bit pages; x, the zero constant, and the AND result each get one.
    let path = build_program(dir.path(), "s4.prog", 6, |p| {
        let x = Integer::input(64, Party::Garbler, p).unwrap();
        let zero = Integer::constant(64, 0, p).unwrap();
        let _y = x.and(&zero, p).unwrap();
        x.mark_output(p).unwrap();
    });

    let report = plan(&path, 4, 6).unwrap();
    assert_eq!(report.num_swapins, 0);
    assert_eq!(report.num_swapouts, 1);

    let physical = read_physical(&path.with_extension("memprog"));
    let image = ProgramImage::load(&path).unwrap();
    let y_page = page_number(image.instructions[2].output, 6);
    assert!(physical
        .iter()
        .filter(|r| r.op == OpCode::SwapOut)
        .all(|r| r.swap_page() != y_page));
    verify_stream(&image, &physical, 4, 6);
}

#[test]
fn capacity_below_the_minimum_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_program(dir.path(), "cap.prog", 5, |p| {
        let a = Integer::input(32, Party::Garbler, p).unwrap();
        a.mark_output(p).unwrap();
    });

    assert!(matches!(
        plan(&path, 3, 5),
        Err(PlanError::CapacityTooSmall { capacity: 3 })
    ));
}

#[test]
fn oversized_instruction_footprint_is_unschedulable() {
    let dir = tempfile::tempdir().unwrap();
    // A 2048-bit select with 1024-bit pages needs five input pages
    // resident at once, one more than the capacity.
    let path = build_program(dir.path(), "wide.prog", 10, |p| {
        let a = Integer::input(2048, Party::Garbler, p).unwrap();
        let b = Integer::input(2048, Party::Evaluator, p).unwrap();
        let bit = Integer::constant(1, 1, p).unwrap();
        let picked = Integer::select(&bit, &a, &b, p).unwrap();
        picked.mark_output(p).unwrap();
    });

    assert!(matches!(
        plan(&path, 4, 10),
        Err(PlanError::Unschedulable { capacity: 4 })
    ));
    // One more slot schedules fine.
    assert!(plan(&path, 5, 10).is_ok());
}

#[test]
fn bad_page_shift_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_program(dir.path(), "shift.prog", 5, |p| {
        let a = Integer::input(32, Party::Garbler, p).unwrap();
        a.mark_output(p).unwrap();
    });

    assert!(matches!(plan(&path, 4, 40), Err(PlanError::BadPageShift(40))));
}

fn random_program(p: &mut Program, seed: u64, rounds: usize) {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    let mut values = Vec::new();
    for i in 0..10 {
        let party = if i % 2 == 0 { Party::Garbler } else { Party::Evaluator };
        values.push(Integer::input(32, party, p).unwrap());
    }
    for _ in 0..rounds {
        let a = rng.gen_range(0..values.len());
        let b = rng.gen_range(0..values.len());
        let v = match rng.gen_range(0..5) {
            0 => values[a].add(&values[b], p).unwrap(),
            1 => values[a].sub(&values[b], p).unwrap(),
            2 => values[a].xor(&values[b], p).unwrap(),
            3 => values[a].and(&values[b], p).unwrap(),
            _ => {
                let bit = values[a].less(&values[b], p).unwrap();
                let picked = Integer::select(&bit, &values[a], &values[b], p).unwrap();
                bit.recycle(p);
                picked
            }
        };
        let slot = rng.gen_range(0..values.len());
        let old = std::mem::replace(&mut values[slot], v);
        old.recycle(p);
    }
    for v in values.drain(..) {
        v.mark_output(p).unwrap();
    }
}

#[test]
fn random_programs_place_correctly_under_pressure() {
    let shift: PageShift = 5;
    for seed in 0..4 {
        let dir = tempfile::tempdir().unwrap();
        let path = build_program(dir.path(), "rand.prog", shift, |p| {
            random_program(p, seed, 60)
        });
        let image = ProgramImage::load(&path).unwrap();

        for capacity in [4, 5, 8, 64] {
            let report = plan(&path, capacity, shift).unwrap();
            let physical = read_physical(&path.with_extension("memprog"));
            verify_stream(&image, &physical, capacity, shift);

            let swapins = physical.iter().filter(|r| r.op == OpCode::SwapIn).count();
            let swapouts = physical.iter().filter(|r| r.op == OpCode::SwapOut).count();
            assert_eq!(swapins as u64, report.num_swapins);
            assert_eq!(swapouts as u64, report.num_swapouts);
        }
    }
}

#[test]
fn sufficient_capacity_needs_no_eviction_traffic() {
    let shift: PageShift = 5;
    let dir = tempfile::tempdir().unwrap();
    let path = build_program(dir.path(), "peak.prog", shift, |p| {
        random_program(p, 7, 50)
    });

    let probe = plan(&path, u16::MAX as u64, shift).unwrap();
    let capacity = probe.peak_working_set.max(4);
    let report = plan(&path, capacity, shift).unwrap();
    assert_eq!(report.num_swapins, 0);

    // Every swap-out is a final flush: a live-output page, positioned
    // after the last compute record.
    let image = ProgramImage::load(&path).unwrap();
    let live = live_output_pages(&image.outputs, shift);
    let physical = read_physical(&path.with_extension("memprog"));
    let last_compute = physical
        .iter()
        .rposition(|r| !r.op.is_swap())
        .unwrap();
    for (pos, record) in physical.iter().enumerate() {
        if record.op == OpCode::SwapOut {
            assert!(pos > last_compute);
            assert!(live.contains(&record.swap_page()));
        }
    }
}

#[test]
fn planning_is_deterministic() {
    let shift: PageShift = 5;
    let dir = tempfile::tempdir().unwrap();
    let first = build_program(dir.path(), "one.prog", shift, |p| {
        random_program(p, 3, 40)
    });
    let second = build_program(dir.path(), "two.prog", shift, |p| {
        random_program(p, 3, 40)
    });

    plan(&first, 6, shift).unwrap();
    plan(&second, 6, shift).unwrap();
    assert_eq!(
        fs::read(first.with_extension("memprog")).unwrap(),
        fs::read(second.with_extension("memprog")).unwrap()
    );
}

#[test]
fn belady_beats_a_fifo_oracle() {
    let shift: PageShift = 5;
    for (seed, capacity) in [(1u64, 4u64), (2, 5), (3, 6), (4, 8)] {
        let dir = tempfile::tempdir().unwrap();
        let path = build_program(dir.path(), "oracle.prog", shift, |p| {
            random_program(p, seed, 80)
        });
        let report = plan(&path, capacity, shift).unwrap();

        // FIFO oracle over the same page-touch trace: productions admit
        // for free, reads fault when the page is absent.
        let image = ProgramImage::load(&path).unwrap();
        let mut queue: VecDeque<VirtPageNumber> = VecDeque::new();
        let mut resident: HashSet<VirtPageNumber> = HashSet::new();
        let mut fifo_faults = 0u64;
        let admit = |queue: &mut VecDeque<VirtPageNumber>,
                         resident: &mut HashSet<VirtPageNumber>,
                         page: VirtPageNumber| {
            if resident.len() as u64 == capacity {
                let victim = queue.pop_front().unwrap();
                resident.remove(&victim);
            }
            queue.push_back(page);
            resident.insert(page);
        };
        for v in &image.instructions {
            for page in v.input_page_ranges(shift).pages() {
                if !resident.contains(&page) {
                    fifo_faults += 1;
                    admit(&mut queue, &mut resident, page);
                }
            }
            if let Some(range) = v.output_page_range(shift) {
                for page in range.start..=range.end {
                    if !resident.contains(&page) {
                        admit(&mut queue, &mut resident, page);
                    }
                }
            }
        }

        assert!(
            report.num_swapins <= fifo_faults,
            "belady {} vs fifo {} at capacity {}",
            report.num_swapins,
            fifo_faults,
            capacity
        );
    }
}

#[test]
fn disassembly_round_trip_preserves_the_compute_sequence() {
    let shift: PageShift = 5;
    let dir = tempfile::tempdir().unwrap();
    let path = build_program(dir.path(), "rt.prog", shift, |p| {
        random_program(p, 9, 30)
    });

    plan(&path, 1 << 10, shift).unwrap();
    let image = ProgramImage::load(&path).unwrap();
    let physical = read_physical(&path.with_extension("memprog"));

    let stripped: Vec<(OpCode, u16)> = physical
        .iter()
        .filter(|r| !r.op.is_swap())
        .map(|r| (r.op, r.width))
        .collect();
    let virtual_seq: Vec<(OpCode, u16)> = image
        .instructions
        .iter()
        .map(|v| (v.op, v.width))
        .collect();
    assert_eq!(stripped, virtual_seq);
}
