use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use garble_asm::{CodecError, PhysProgramReader, VirtProgramReader};

/// Print a bytecode file one instruction per line.
///
/// The bytecode kind is inferred from the extension: `.prog` is virtual,
/// `.memprog` and `.repprog` are physical.
#[derive(Parser)]
#[command(name = "disassemble", version)]
struct Args {
    /// Bytecode file to print.
    file: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let extension = args
        .file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    let result = match extension {
        "prog" => disassemble_virtual(&args.file),
        "memprog" | "repprog" => disassemble_physical(&args.file),
        _ => {
            eprintln!("disassemble: could not infer bytecode type from file extension");
            return ExitCode::FAILURE;
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("disassemble: {e}");
            ExitCode::FAILURE
        }
    }
}

fn disassemble_virtual(file: &Path) -> Result<(), CodecError> {
    let mut reader = VirtProgramReader::open(file)?;
    while let Some(instr) = reader.next_instruction() {
        println!("{}", instr?);
    }
    Ok(())
}

fn disassemble_physical(file: &Path) -> Result<(), CodecError> {
    let mut reader = PhysProgramReader::open(file)?;
    while let Some(instr) = reader.next_instruction() {
        println!("{}", instr?);
    }
    Ok(())
}
