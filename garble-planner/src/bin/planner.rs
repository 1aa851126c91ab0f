use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use garble_planner::plan;

/// Plan a virtual program into a paged physical program.
///
/// Writes the physical bytecode next to the input with a `.memprog`
/// extension, along with the intermediate annotation files.
#[derive(Parser)]
#[command(name = "planner", version)]
struct Args {
    /// Virtual program to plan (.prog).
    program: PathBuf,
    /// Number of resident page slots on the target machine.
    capacity_pages: u64,
    /// Log2 of the page size in bits.
    page_shift: u8,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    match plan(&args.program, args.capacity_pages, args.page_shift) {
        Ok(report) => {
            println!(
                "{} swapouts, {} swapins, peak working set {} pages",
                report.num_swapouts, report.num_swapins, report.peak_working_set
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("planner: {e}");
            ExitCode::FAILURE
        }
    }
}
