use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result};

use braid::{error, Exit, Memory, RawModeGuard, RawWriter, RunState, TermSource};

/// Exit status for a run stopped by an interrupt, distinct from normal halt.
const INTERRUPT_EXIT: i32 = 254;

/// Braid is a byte-accurate virtual machine for compiled LC3 machine code.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// One or more machine-code images, loaded in order before execution
    #[arg(required = true, value_name = "IMAGE")]
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut mem = Memory::new(Box::new(TermSource::new()));
    for path in &args.images {
        let bytes = fs::read(path).map_err(|err| error::load_failure(path, err))?;
        mem.load_image(&bytes)
            .map_err(|err| error::load_failure(path, err))?;
    }

    if let Exit::Interrupt = execute(mem)? {
        println!();
        std::process::exit(INTERRUPT_EXIT);
    }
    Ok(())
}

/// Run to completion with the terminal held in raw mode.
///
/// The guard is dropped before returning, so the terminal is restored on
/// every exit path, fault or not.
fn execute(mem: Memory) -> Result<Exit> {
    let guard = RawModeGuard::new().into_diagnostic()?;
    let out: Box<dyn Write> = if guard.is_active() {
        Box::new(RawWriter::new())
    } else {
        Box::new(io::stdout())
    };

    let mut state = RunState::new(mem, out);
    let result = state.run();
    drop(guard);
    result
}
