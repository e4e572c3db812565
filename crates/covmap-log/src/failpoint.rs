//! One-shot fault injection for storage operations.
//!
//! Tests arm a failure, then the next matching operation on the same
//! thread consumes it and returns an I/O error. Faults are thread-local so
//! concurrently running tests cannot steal each other's injections.

use std::cell::Cell;
use std::io;

thread_local! {
    static APPEND_FAILURE: Cell<bool> = const { Cell::new(false) };
    static FLUSH_FAILURE: Cell<bool> = const { Cell::new(false) };
}

/// Make the next append or enumerate on this thread fail with an I/O error.
pub fn arm_append_failure() {
    APPEND_FAILURE.with(|flag| flag.set(true));
}

/// Make the next flush on this thread fail with an I/O error.
pub fn arm_flush_failure() {
    FLUSH_FAILURE.with(|flag| flag.set(true));
}

/// Disarm any pending failure on this thread.
pub fn reset() {
    APPEND_FAILURE.with(|flag| flag.set(false));
    FLUSH_FAILURE.with(|flag| flag.set(false));
}

pub(crate) fn check_append() -> io::Result<()> {
    if APPEND_FAILURE.with(Cell::take) {
        return Err(io::Error::other("injected append failure"));
    }
    Ok(())
}

pub(crate) fn check_flush() -> io::Result<()> {
    if FLUSH_FAILURE.with(Cell::take) {
        return Err(io::Error::other("injected flush failure"));
    }
    Ok(())
}
