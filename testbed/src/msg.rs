//! Standardized message emission through the console streams.
//!
//! Debug messages carry the [`DEBUG_MARKER`] prefix so that captured output can be
//! compared without them.

use crate::capture::{DEBUG_MARKER, Stream};
use crate::console::write_line;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Enables or disables debug message emission.
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

/// Returns whether debug message emission is enabled.
pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Emits a debug message to standard output, if debugging is enabled.
pub fn dbg(msg: impl Display) {
    if debug_enabled() {
        write_line(Stream::Stdout, format_args!("{DEBUG_MARKER}{msg}"));
    }
}

/// Emits an informational message to standard output.
pub fn info(msg: impl Display) {
    write_line(Stream::Stdout, format_args!("{msg}"));
}

/// Emits a warning to standard error.
pub fn warn(msg: impl Display) {
    write_line(Stream::Stderr, format_args!("WARNING: {msg}"));
}

/// Emits an error to standard error.
pub fn err(msg: impl Display) {
    write_line(Stream::Stderr, format_args!("ERROR: {msg}"));
}

/// Returns `"s"` unless `count` is exactly one.
pub const fn s_if_plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}
