// Memory and devices
mod mem;
pub use mem::{ImageError, InputSource, Memory, KBDR, KBSR, MEMORY_MAX};

// Running
mod runtime;
pub use runtime::{Exit, RunState};

// Terminal collaborator
mod term;
pub use term::{RawModeGuard, RawWriter, TermSource};

pub mod error;
pub mod interrupt;
