//! Capture of the process-wide console stream pair.
//!
//! Test bodies and the code they exercise write through [`crate::console`], which routes
//! every write through a single [`Streams`] instance. While a [`Capture`] is held, those
//! writes land in private buffers instead of the real standard streams. Only one capture
//! may be active at a time; the gate lock that enforces this is also taken by the report
//! printer, so harness output never lands inside a test's captured text.
//!
//! With descriptor capture enabled (see [`Streams::set_descriptor_capture`]), a capture
//! also points file descriptors 1 and 2 at pipes, so `print!`, `eprint!` and anything
//! else writing to the standard streams is collected too. The harness's own writes
//! then go to duplicates of the original descriptors.

use crate::error::CaptureError;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::io::Write;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

/// Prefix identifying debug-formatted lines.
pub const DEBUG_MARKER: &str = "DEBUG: ";

static STREAMS: LazyLock<Streams> = LazyLock::new(Streams::stdio);

/// Returns the process-wide stream pair.
pub fn streams() -> &'static Streams {
    &STREAMS
}

/// Identifies one of the two standard output streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Text collected from both streams during one capture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Captured standard output, with debug lines removed.
    pub stdout: String,
    /// Captured standard error, with debug lines removed.
    pub stderr: String,
}

#[derive(Default)]
struct Buffers {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Buffers {
    const fn get_mut(&mut self, stream: Stream) -> &mut Vec<u8> {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }
}

/// Where captured writes go while a capture is active.
#[derive(Default)]
struct Sink {
    buffers: Buffers,
    #[cfg(unix)]
    redirect: Option<descriptors::Redirect>,
}

impl Sink {
    fn write(&mut self, stream: Stream, bytes: &[u8]) -> std::io::Result<()> {
        // Share the standard library's buffers so that ordering with `print!` holds.
        #[cfg(unix)]
        if self.redirect.is_some() {
            return match stream {
                Stream::Stdout => std::io::stdout().write_all(bytes),
                Stream::Stderr => std::io::stderr().write_all(bytes),
            };
        }

        self.buffers.get_mut(stream).extend_from_slice(bytes);
        Ok(())
    }
}

struct RealStreams {
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl RealStreams {
    fn get_mut(&mut self, stream: Stream) -> &mut (dyn Write + Send) {
        match stream {
            Stream::Stdout => self.stdout.as_mut(),
            Stream::Stderr => self.stderr.as_mut(),
        }
    }
}

fn write_flushed(writer: &mut (dyn Write + Send), bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes)?;
    writer.flush()
}

/// A stream pair whose output can be temporarily redirected into memory.
pub struct Streams {
    gate: ReentrantMutex<()>,
    owner: Mutex<Option<ThreadId>>,
    sink: Mutex<Option<Sink>>,
    real: Mutex<RealStreams>,
    #[cfg(unix)]
    saved: Option<descriptors::Saved>,
    capture_descriptors: AtomicBool,
}

impl Streams {
    /// Creates a stream pair backed by the real standard output and error.
    pub fn stdio() -> Self {
        #[cfg(unix)]
        {
            // Closed standard streams leave nothing to duplicate.
            if let Ok((saved, stdout, stderr)) = descriptors::Saved::duplicate_stdio() {
                let mut streams = Self::with_writers(stdout, stderr);
                streams.saved = Some(saved);
                return streams;
            }
        }

        Self::with_writers(std::io::stdout(), std::io::stderr())
    }

    /// Creates a stream pair backed by the given writers.
    pub fn with_writers(
        stdout: impl Write + Send + 'static,
        stderr: impl Write + Send + 'static,
    ) -> Self {
        Self {
            gate: ReentrantMutex::new(()),
            owner: Mutex::new(None),
            sink: Mutex::new(None),
            real: Mutex::new(RealStreams {
                stdout: Box::new(stdout),
                stderr: Box::new(stderr),
            }),
            #[cfg(unix)]
            saved: None,
            capture_descriptors: AtomicBool::new(false),
        }
    }

    /// Enables or disables descriptor capture for captures begun from now on.
    ///
    /// Returns whether descriptor capture is in effect, which requires a unix stream
    /// pair created by [`Streams::stdio`].
    pub fn set_descriptor_capture(&self, enabled: bool) -> bool {
        #[cfg(unix)]
        let enabled = enabled && self.saved.is_some();
        #[cfg(not(unix))]
        let enabled = {
            let _ = enabled;
            false
        };

        self.capture_descriptors.store(enabled, Ordering::SeqCst);
        enabled
    }

    /// Starts capturing, blocking while another thread holds a capture.
    ///
    /// Fails if the calling thread already holds a capture, or if the standard
    /// descriptors cannot be redirected.
    pub fn begin(&self) -> Result<Capture<'_>, CaptureError> {
        let me = std::thread::current().id();
        if *self.owner.lock() == Some(me) {
            return Err(CaptureError::AlreadyActive);
        }

        let gate = self.gate.lock();
        let sink = self.open_sink()?;
        *self.owner.lock() = Some(me);
        *self.sink.lock() = Some(sink);

        Ok(Capture {
            streams: self,
            _gate: gate,
        })
    }

    /// Returns whether a capture is currently active.
    pub fn is_capturing(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Writes to the given stream, or into the capture when one is active.
    pub fn write(&self, stream: Stream, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(sink) = self.sink.lock().as_mut() {
            return sink.write(stream, bytes);
        }

        self.write_real(stream, bytes)
    }

    /// Writes straight to the underlying stream, bypassing any capture.
    pub fn write_real(&self, stream: Stream, bytes: &[u8]) -> std::io::Result<()> {
        write_flushed(self.real.lock().get_mut(stream), bytes)
    }

    /// Waits until no capture is active and returns a guard for writing to the real
    /// streams.
    ///
    /// Output written through one guard is never interleaved with captured test
    /// output.
    pub fn lock(&self) -> ConsoleLock<'_> {
        ConsoleLock {
            streams: self,
            _gate: self.gate.lock(),
        }
    }

    /// Writes every `(stream, text)` pair to the real streams under a single
    /// [`Streams::lock`].
    pub fn write_locked<S: AsRef<str>>(&self, writes: &[(Stream, S)]) -> std::io::Result<()> {
        let console = self.lock();
        writes
            .iter()
            .try_for_each(|(stream, text)| console.write_str(*stream, text.as_ref()))
    }

    /// Removes debug-marked lines from `text`, forwarding them to the real `stream`.
    pub fn cull_debug(&self, stream: Stream, text: &str) -> String {
        cull_debug_lines(text, |line| {
            // Nowhere better to report a failure to write diagnostics.
            let _ = self.write_real(stream, line.as_bytes());
        })
    }

    #[cfg_attr(not(unix), allow(clippy::unused_self))]
    fn open_sink(&self) -> Result<Sink, CaptureError> {
        #[cfg(unix)]
        if self.capture_descriptors.load(Ordering::SeqCst) {
            if let Some(saved) = &self.saved {
                let redirect = descriptors::Redirect::start(saved)
                    .map_err(|err| CaptureError::Redirect(err.to_string()))?;
                return Ok(Sink {
                    buffers: Buffers::default(),
                    redirect: Some(redirect),
                });
            }
        }

        Ok(Sink::default())
    }

    fn release(&self) -> Option<Buffers> {
        let sink = self.sink.lock().take();
        *self.owner.lock() = None;
        sink.map(|sink| self.close_sink(sink))
    }

    #[cfg_attr(not(unix), allow(clippy::unused_self))]
    fn close_sink(&self, sink: Sink) -> Buffers {
        #[cfg(unix)]
        if let (Some(redirect), Some(saved)) = (sink.redirect, &self.saved) {
            match redirect.finish(saved) {
                Ok(buffers) => return buffers,
                Err(err) => {
                    let message = format!("failed to restore console streams: {err}\n");
                    let _ = self.write_real(Stream::Stderr, message.as_bytes());
                }
            }
        }

        sink.buffers
    }
}

/// Exclusive access to the real streams; see [`Streams::lock`].
pub struct ConsoleLock<'a> {
    streams: &'a Streams,
    _gate: ReentrantMutexGuard<'a, ()>,
}

impl ConsoleLock<'_> {
    /// Writes text to the real stream.
    pub fn write_str(&self, stream: Stream, text: &str) -> std::io::Result<()> {
        self.streams.write_real(stream, text.as_bytes())
    }
}

/// An active capture. Dropping it without calling [`Capture::finish`] restores the
/// real streams and discards the captured text.
pub struct Capture<'a> {
    streams: &'a Streams,
    _gate: ReentrantMutexGuard<'a, ()>,
}

impl Capture<'_> {
    /// Restores the real streams and returns what was captured. Debug-marked lines are
    /// removed from the result and written to the real streams instead.
    pub fn finish(self) -> CapturedOutput {
        let buffers = self.streams.release().unwrap_or_default();

        let stdout = String::from_utf8_lossy(&buffers.stdout);
        let stderr = String::from_utf8_lossy(&buffers.stderr);

        CapturedOutput {
            stdout: self.streams.cull_debug(Stream::Stdout, &stdout),
            stderr: self.streams.cull_debug(Stream::Stderr, &stderr),
        }
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        // No-op when `finish` already released the sink.
        self.streams.release();
    }
}

#[cfg(unix)]
mod descriptors {
    use super::Buffers;
    use std::io::{Read, Write};
    use std::os::fd::{AsFd, OwnedFd};
    use std::thread::JoinHandle;

    type Drain = JoinHandle<std::io::Result<Vec<u8>>>;

    /// Duplicates of the standard output and error descriptors as they were before
    /// any capture.
    pub(super) struct Saved {
        stdout: OwnedFd,
        stderr: OwnedFd,
    }

    impl Saved {
        /// Duplicates the current standard descriptors, returning them along with
        /// writers for the harness's own output.
        pub(super) fn duplicate_stdio() -> std::io::Result<(Self, std::fs::File, std::fs::File)>
        {
            let stdout = std::io::stdout().as_fd().try_clone_to_owned()?;
            let stderr = std::io::stderr().as_fd().try_clone_to_owned()?;
            let writers = (
                std::fs::File::from(stdout.try_clone()?),
                std::fs::File::from(stderr.try_clone()?),
            );

            Ok((Self { stdout, stderr }, writers.0, writers.1))
        }
    }

    /// Standard output and error pointed at pipes, each drained by its own thread.
    pub(super) struct Redirect {
        stdout: Drain,
        stderr: Drain,
    }

    impl Redirect {
        pub(super) fn start(saved: &Saved) -> std::io::Result<Self> {
            let (stdout_reader, stdout_writer) = os_pipe::pipe()?;
            let (stderr_reader, stderr_writer) = os_pipe::pipe()?;
            let stdout = drain(stdout_reader)?;
            let stderr = drain(stderr_reader)?;

            flush_std()?;
            nix::unistd::dup2_stdout(&stdout_writer)?;
            if let Err(err) = nix::unistd::dup2_stderr(&stderr_writer) {
                nix::unistd::dup2_stdout(&saved.stdout)?;
                return Err(err.into());
            }

            // Descriptors 1 and 2 now hold the only write ends, so the drains see
            // end-of-file once the originals are restored.
            Ok(Self { stdout, stderr })
        }

        pub(super) fn finish(self, saved: &Saved) -> std::io::Result<Buffers> {
            let flushed = flush_std();
            nix::unistd::dup2_stdout(&saved.stdout)?;
            nix::unistd::dup2_stderr(&saved.stderr)?;
            flushed?;

            Ok(Buffers {
                stdout: join(self.stdout)?,
                stderr: join(self.stderr)?,
            })
        }
    }

    fn flush_std() -> std::io::Result<()> {
        std::io::stdout().flush()?;
        std::io::stderr().flush()
    }

    fn drain(mut reader: os_pipe::PipeReader) -> std::io::Result<Drain> {
        std::thread::Builder::new()
            .name(String::from("testbed-capture"))
            .spawn(move || {
                let mut captured = vec![];
                reader.read_to_end(&mut captured)?;
                Ok(captured)
            })
    }

    fn join(drain: Drain) -> std::io::Result<Vec<u8>> {
        drain
            .join()
            .map_err(|_| std::io::Error::other("capture drain thread panicked"))?
    }
}

/// Splits `text` into lines (keeping line endings), hands each debug-marked line to
/// `forward` and returns the concatenation of the remaining lines.
pub fn cull_debug_lines(text: &str, mut forward: impl FnMut(&str)) -> String {
    let mut kept = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if line.starts_with(DEBUG_MARKER) {
            forward(line);
        } else {
            kept.push_str(line);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).to_string()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn test_streams() -> (Streams, SharedBuf, SharedBuf) {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        (Streams::with_writers(out.clone(), err.clone()), out, err)
    }

    #[test]
    fn test_capture_collects_both_streams() -> anyhow::Result<()> {
        let (streams, real_out, real_err) = test_streams();

        let capture = streams.begin()?;
        streams.write(Stream::Stdout, b"hello\n")?;
        streams.write(Stream::Stderr, b"oops\n")?;
        let output = capture.finish();

        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
        assert_eq!(real_out.contents(), "");
        assert_eq!(real_err.contents(), "");
        assert!(!streams.is_capturing());

        Ok(())
    }

    #[test]
    fn test_debug_lines_forwarded_not_captured() -> anyhow::Result<()> {
        let (streams, real_out, real_err) = test_streams();

        let capture = streams.begin()?;
        streams.write(Stream::Stdout, b"one\nDEBUG: detail\ntwo\n")?;
        streams.write(Stream::Stderr, b"DEBUG: err detail\n")?;
        let output = capture.finish();

        assert_eq!(output.stdout, "one\ntwo\n");
        assert_eq!(output.stderr, "");
        assert_eq!(real_out.contents(), "DEBUG: detail\n");
        assert_eq!(real_err.contents(), "DEBUG: err detail\n");

        Ok(())
    }

    #[test]
    fn test_capture_not_reentrant() -> anyhow::Result<()> {
        let (streams, _, _) = test_streams();

        let capture = streams.begin()?;
        assert_eq!(streams.begin().err(), Some(CaptureError::AlreadyActive));
        drop(capture);

        // Released captures can be taken again.
        let again = streams.begin()?;
        drop(again);

        Ok(())
    }

    #[test]
    fn test_dropped_capture_restores_streams() -> anyhow::Result<()> {
        let (streams, real_out, _) = test_streams();

        {
            let _capture = streams.begin()?;
            streams.write(Stream::Stdout, b"discarded\n")?;
        }

        assert!(!streams.is_capturing());
        streams.write(Stream::Stdout, b"visible\n")?;
        assert_eq!(real_out.contents(), "visible\n");

        Ok(())
    }

    #[test]
    fn test_capture_released_on_panic() {
        let (streams, _, _) = test_streams();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _capture = streams.begin();
            std::panic::panic_any("boom");
        }));

        assert!(result.is_err());
        assert!(!streams.is_capturing());
        assert!(streams.begin().is_ok());
    }

    #[test]
    fn test_concurrent_captures_never_interleave() {
        let (streams, _, _) = test_streams();
        let streams = Arc::new(streams);

        let handles: Vec<_> = ["alpha", "beta", "gamma"]
            .into_iter()
            .map(|token| {
                let streams = Arc::clone(&streams);
                std::thread::spawn(move || {
                    let mut outputs = vec![];
                    for _ in 0..50 {
                        let Ok(capture) = streams.begin() else {
                            return Err(token);
                        };
                        for _ in 0..5 {
                            let _ = streams.write(Stream::Stdout, format!("{token}\n").as_bytes());
                            std::thread::yield_now();
                        }
                        outputs.push(capture.finish().stdout);
                    }
                    Ok((token, outputs))
                })
            })
            .collect();

        for handle in handles {
            let Ok(Ok((token, outputs))) = handle.join() else {
                panic!("capture thread failed");
            };

            let expected = format!("{token}\n").repeat(5);
            assert!(outputs.iter().all(|o| *o == expected));
        }
    }

    #[test]
    fn test_descriptor_capture_needs_stdio_streams() {
        let (streams, _, _) = test_streams();
        assert!(!streams.set_descriptor_capture(true));
        assert!(!streams.set_descriptor_capture(false));
    }

    #[test]
    fn test_write_locked_keeps_order() -> anyhow::Result<()> {
        let (streams, real_out, real_err) = test_streams();

        streams.write_locked(&[
            (Stream::Stdout, "first\n"),
            (Stream::Stderr, "second\n"),
            (Stream::Stdout, "third\n"),
        ])?;

        assert_eq!(real_out.contents(), "first\nthird\n");
        assert_eq!(real_err.contents(), "second\n");

        Ok(())
    }

    #[test]
    fn test_cull_debug_lines_keeps_unterminated_tail() {
        let mut forwarded = vec![];
        let kept = cull_debug_lines("a\nDEBUG: x\nb", |line| forwarded.push(line.to_owned()));
        assert_eq!(kept, "a\nb");
        assert_eq!(forwarded, vec!["DEBUG: x\n".to_owned()]);
    }
}
