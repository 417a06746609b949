//! Process-wide interrupt request flag.
//!
//! Raised when the user asks the emulator to stop (Ctrl+C at the terminal).
//! The dispatch loop checks it between instructions, never mid-instruction.

use std::sync::atomic::{AtomicBool, Ordering};

static PENDING: AtomicBool = AtomicBool::new(false);

/// Record an interrupt request.
pub fn raise() {
    PENDING.store(true, Ordering::SeqCst);
}

/// Whether an interrupt request has arrived.
pub fn pending() -> bool {
    PENDING.load(Ordering::SeqCst)
}
