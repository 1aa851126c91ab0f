//! Sorting networks over DSL values.
//!
//! Secure computation cannot branch on secret data, so sorting is done
//! with data-oblivious comparator networks whose structure is fixed by
//! the input length alone.

use crate::error::BuildError;
use crate::integer::Integer;
use crate::program::Program;

/// Sort a bitonic sequence in place with the BITONIC-SORTER network
/// (CLR, section 28.3). The length must be a power of two.
pub fn bitonic_sorter(
    values: &mut [Integer],
    increasing: bool,
    p: &mut Program,
) -> Result<(), BuildError> {
    if values.len() <= 1 {
        return Ok(());
    }
    if !values.len().is_power_of_two() {
        return Err(BuildError::NotPowerOfTwo(values.len()));
    }

    // HALF-CLEANER[length] stage.
    let half = values.len() / 2;
    let (low, high) = values.split_at_mut(half);
    for i in 0..half {
        if increasing {
            Integer::comparator(&mut low[i], &mut high[i], p)?;
        } else {
            Integer::comparator(&mut high[i], &mut low[i], p)?;
        }
    }

    bitonic_sorter(low, increasing, p)?;
    bitonic_sorter(high, increasing, p)
}

/// Sort arbitrary values in place with the SORTER network (CLR, section
/// 28.5). The length must be a power of two.
///
/// The second recursive half is sorted in the opposite direction, so the
/// whole array forms a bitonic sequence and a plain bitonic sorter merges
/// it. This keeps the network more regular than the textbook MERGER
/// formulation.
pub fn sorter(
    values: &mut [Integer],
    increasing: bool,
    p: &mut Program,
) -> Result<(), BuildError> {
    if values.len() <= 1 {
        return Ok(());
    }
    if !values.len().is_power_of_two() {
        return Err(BuildError::NotPowerOfTwo(values.len()));
    }

    let half = values.len() / 2;
    {
        let (low, high) = values.split_at_mut(half);
        sorter(low, true, p)?;
        sorter(high, false, p)?;
    }
    bitonic_sorter(values, increasing, p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use garble_asm::{OpCode, VirtProgramReader};
    use garble_types::Party;

    #[test]
    fn sorter_emits_the_comparator_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sort.prog");
        let mut p = Program::create(&path, 6).unwrap();

        let mut values: Vec<Integer> = (0..4)
            .map(|_| Integer::input(16, Party::Garbler, &mut p).unwrap())
            .collect();
        sorter(&mut values, true, &mut p).unwrap();
        for v in values.drain(..) {
            v.mark_output(&mut p).unwrap();
        }
        p.finish().unwrap();

        let mut reader = VirtProgramReader::open(&path).unwrap();
        let mut less = 0;
        let mut select = 0;
        let mut xor = 0;
        while let Some(instr) = reader.next_instruction() {
            match instr.unwrap().op {
                OpCode::IntLess => less += 1,
                OpCode::ValueSelect => select += 1,
                OpCode::BitXor => xor += 1,
                OpCode::Input | OpCode::Output => {}
                op => panic!("unexpected opcode {op}"),
            }
        }
        // SORTER[4] is six comparators; each is a compare, a select, and
        // three xors.
        assert_eq!(less, 6);
        assert_eq!(select, 6);
        assert_eq!(xor, 18);
    }

    #[test]
    fn non_power_of_two_lengths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.prog");
        let mut p = Program::create(&path, 6).unwrap();

        let mut values: Vec<Integer> = (0..3)
            .map(|_| Integer::input(16, Party::Garbler, &mut p).unwrap())
            .collect();
        assert!(matches!(
            sorter(&mut values, true, &mut p),
            Err(BuildError::NotPowerOfTwo(3))
        ));
    }
}
