//! Report constructors for every fatal condition.

use std::fmt::Display;
use std::io;
use std::path::Path;

use miette::{miette, Report, Severity};

// Image loading

pub fn load_failure(path: &Path, cause: impl Display) -> Report {
    miette!(
        severity = Severity::Error,
        code = "load::image",
        help = "images are raw big-endian 16-bit words: an origin followed by the payload.",
        "Failed to load image {}: {cause}",
        path.display(),
    )
}

// Execution faults

pub fn illegal_instruction(instr: u16, addr: u16) -> Report {
    miette!(
        severity = Severity::Error,
        code = "exec::illegal_instruction",
        help = "opcodes 0x8 (RTI) and 0xD are reserved by the architecture.",
        "Illegal instruction 0x{instr:04X} at address 0x{addr:04X}",
    )
}

pub fn unknown_trap(vector: u16, addr: u16) -> Report {
    miette!(
        severity = Severity::Error,
        code = "exec::unknown_trap",
        help = "recognized trap vectors are 0x20 through 0x25.",
        "Unknown trap vector 0x{vector:02X} at address 0x{addr:04X}",
    )
}

// Terminal I/O

pub fn input_failure(err: io::Error) -> Report {
    miette!(
        severity = Severity::Error,
        code = "io::input",
        "Failed to read input: {err}",
    )
}
