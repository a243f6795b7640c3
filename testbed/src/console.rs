//! Writers for the capturable console streams.
//!
//! Code exercised by in-process tests should write through these instead of the
//! standard library's `print!` family so that the harness can capture it even when
//! it does not own the process's standard descriptors.

use crate::capture::{Stream, streams};
use std::io::Write;

/// A writer targeting one of the console streams.
#[derive(Clone, Copy, Debug)]
pub struct Console {
    stream: Stream,
    bypass_capture: bool,
}

impl Write for Console {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.bypass_capture {
            streams().write_real(self.stream, buf)?;
        } else {
            streams().write(self.stream, buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Returns a writer for the console's standard output.
pub const fn stdout() -> Console {
    Console {
        stream: Stream::Stdout,
        bypass_capture: false,
    }
}

/// Returns a writer for the console's standard error.
pub const fn stderr() -> Console {
    Console {
        stream: Stream::Stderr,
        bypass_capture: false,
    }
}

/// Returns a writer for the real standard error that is never captured, for the
/// harness's own diagnostics.
pub const fn real_stderr() -> Console {
    Console {
        stream: Stream::Stderr,
        bypass_capture: true,
    }
}

/// Writes formatted text followed by a newline to the given console stream.
#[doc(hidden)]
pub fn write_line(stream: Stream, args: std::fmt::Arguments<'_>) {
    let mut text = args.to_string();
    text.push('\n');

    // Like `println!`, there is no caller to report a failure to.
    let _ = streams().write(stream, text.as_bytes());
}

/// Prints a line to the console's standard output.
#[macro_export]
macro_rules! outln {
    () => {
        $crate::console::write_line($crate::Stream::Stdout, format_args!(""))
    };
    ($($arg:tt)*) => {
        $crate::console::write_line($crate::Stream::Stdout, format_args!($($arg)*))
    };
}

/// Prints a line to the console's standard error.
#[macro_export]
macro_rules! errln {
    () => {
        $crate::console::write_line($crate::Stream::Stderr, format_args!(""))
    };
    ($($arg:tt)*) => {
        $crate::console::write_line($crate::Stream::Stderr, format_args!($($arg)*))
    };
}
