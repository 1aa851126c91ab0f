//! Yao's millionaires' problem: two parties learn who is richer without
//! revealing their wealth. Writes the virtual bytecode to the path given
//! as the first argument (default `millionaires.prog`), ready for the
//! planner.

use garble_dsl::{Integer, Party, Program};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "millionaires.prog".into());

    let mut p = Program::create(&path, 10)?;
    let alice = Integer::input(32, Party::Garbler, &mut p)?;
    let bob = Integer::input(32, Party::Evaluator, &mut p)?;
    let alice_richer = bob.less(&alice, &mut p)?;
    alice_richer.mark_output(&mut p)?;
    let header = p.finish()?;

    println!("wrote {path}: {} instructions", header.num_instructions);
    Ok(())
}
