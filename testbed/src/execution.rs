//! Execution of individual test cases.

use crate::capture::{Stream, streams};
use crate::comparison::{
    ExpectationComparison, SingleExpectationComparison, check_code, check_output, check_result,
};
use crate::error::LaunchError;
use crate::testcase::{Exception, Module, TestCase, TestFn, TestKind};
use crate::util::quote_command;
use serde_json::Value;
#[cfg(unix)]
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Argument appended to subprocess command lines when debugging is enabled.
pub const DEBUG_FLAG: &str = "-g";

/// Everything a test case needs from its surroundings to run.
#[derive(Clone, Copy, Debug)]
pub struct InvocationContext<'a> {
    /// Arguments prepended to every subprocess and batch test's arguments.
    pub command_prefix: &'a [String],
    /// The module declaring the test.
    pub module: &'a Module,
    /// Whether debugging is enabled for this run.
    pub debug: bool,
}

/// Something that went wrong while running a test, beyond its expectations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incident {
    /// The test body returned an error or panicked.
    Exception {
        /// Identifier of the test.
        test: String,
        /// The contained failure.
        exception: Exception,
        /// Whether to show the full error chain.
        show_details: bool,
    },
    /// The child process could not be launched.
    Launch(String),
    /// The child process was killed after exceeding its time limit.
    TimedOut(Duration),
    /// Output capture could not be acquired.
    Capture(String),
}

impl std::fmt::Display for Incident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exception {
                test,
                exception,
                show_details,
            } => {
                write!(f, "Exception occurred during {test}: {exception}")?;
                if *show_details {
                    if let Some(details) = &exception.details {
                        write!(f, "\n{details}")?;
                    }
                }
                Ok(())
            }
            Self::Launch(message) => write!(f, "Failed to launch test: {message}"),
            Self::TimedOut(limit) => write!(f, "Test timed out after {limit:?}"),
            Self::Capture(message) => write!(f, "Failed to capture test output: {message}"),
        }
    }
}

/// The result of running one test case.
#[derive(Clone, Debug)]
pub struct TestOutcome {
    /// Name of the module declaring the test.
    pub module: String,
    /// Name of the test.
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// The quoted command line, for subprocess and batch tests.
    pub command: Option<String>,
    /// Comparison of every channel, when the test got far enough to compare.
    pub comparison: Option<ExpectationComparison>,
    /// Problems encountered while running the test.
    pub incidents: Vec<Incident>,
    /// How long the test took.
    pub duration: Duration,
}

impl TestOutcome {
    /// Returns the identifier used in diagnostics.
    pub fn id(&self) -> String {
        format!("{}/{}", self.module, self.name)
    }

    fn failed(case: &TestCase, incident: Incident, duration: Duration) -> Self {
        Self {
            module: case.module.clone(),
            name: case.name.clone(),
            passed: false,
            command: None,
            comparison: None,
            incidents: vec![incident],
            duration,
        }
    }
}

/// Output of a completed child process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildOutput {
    /// Exit code; `-signal` for children killed by a signal on unix.
    pub code: i32,
    /// Standard output, with debug lines removed.
    pub stdout: String,
    /// Standard error, with debug lines removed.
    pub stderr: String,
    /// Whether the child was killed for exceeding its time limit.
    pub timed_out: bool,
}

impl TestCase {
    /// Runs this test case and compares what it produced against its expectations.
    pub fn invoke(&self, context: &InvocationContext<'_>) -> TestOutcome {
        match &self.kind {
            TestKind::InProcess(f) => self.invoke_in_process(f, context),
            TestKind::Subprocess { args } => self.invoke_subprocess(args, None, context),
            TestKind::Batch(batch) => {
                self.invoke_subprocess(&batch.args, Some(batch.input.as_str()), context)
            }
        }
    }

    #[allow(
        clippy::significant_drop_tightening,
        reason = "the capture must cover the whole test body"
    )]
    fn invoke_in_process(&self, f: &TestFn, context: &InvocationContext<'_>) -> TestOutcome {
        let start_time = Instant::now();

        let capture = match streams().begin() {
            Ok(capture) => capture,
            Err(err) => {
                return TestOutcome::failed(
                    self,
                    Incident::Capture(err.to_string()),
                    start_time.elapsed(),
                );
            }
        };

        let returned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f()));
        let output = capture.finish();
        let duration = start_time.elapsed();

        let (value, exception) = match returned {
            Ok(Ok(value)) => (value, None),
            Ok(Err(exception)) => (Value::Null, Some(exception)),
            Err(payload) => (Value::Null, Some(Exception::from_panic(payload.as_ref()))),
        };

        let test_dir = context.module.test_dir.as_deref();
        let comparison = ExpectationComparison {
            result: check_result(self.expected.result.as_ref(), &value),
            exit_code: SingleExpectationComparison::NotApplicable,
            stdout: check_output(
                self.expected.stdout.as_ref(),
                &output.stdout,
                Stream::Stdout,
                test_dir,
            ),
            stderr: check_output(
                self.expected.stderr.as_ref(),
                &output.stderr,
                Stream::Stderr,
                test_dir,
            ),
        };

        let incidents: Vec<_> = exception
            .into_iter()
            .map(|exception| Incident::Exception {
                test: self.id(),
                exception,
                show_details: context.debug,
            })
            .collect();

        TestOutcome {
            module: self.module.clone(),
            name: self.name.clone(),
            passed: incidents.is_empty() && !comparison.is_failure(),
            command: None,
            comparison: Some(comparison),
            incidents,
            duration,
        }
    }

    fn invoke_subprocess(
        &self,
        args: &[String],
        input: Option<&str>,
        context: &InvocationContext<'_>,
    ) -> TestOutcome {
        let mut argv: Vec<String> = context
            .command_prefix
            .iter()
            .chain(&context.module.global_options)
            .chain(args)
            .cloned()
            .collect();

        if context.debug && !argv.is_empty() {
            argv.push(String::from(DEBUG_FLAG));
        }

        let start_time = Instant::now();
        let command = match self.launchable_command(&argv) {
            Ok(command) => command,
            Err(err) => {
                return TestOutcome::failed(
                    self,
                    Incident::Launch(err.to_string()),
                    start_time.elapsed(),
                );
            }
        };

        let child = match run_child(&argv, &command, input, context.module.subprocess_timeout) {
            Ok(child) => child,
            Err(err) => {
                return TestOutcome::failed(
                    self,
                    Incident::Launch(err.to_string()),
                    start_time.elapsed(),
                );
            }
        };
        let duration = start_time.elapsed();

        let test_dir = context.module.test_dir.as_deref();
        let comparison = ExpectationComparison {
            result: SingleExpectationComparison::NotApplicable,
            exit_code: check_code(self.expected.code, child.code),
            stdout: check_output(
                self.expected.stdout.as_ref(),
                &child.stdout,
                Stream::Stdout,
                test_dir,
            ),
            stderr: check_output(
                self.expected.stderr.as_ref(),
                &child.stderr,
                Stream::Stderr,
                test_dir,
            ),
        };

        let mut incidents = vec![];
        if child.timed_out {
            if let Some(limit) = context.module.subprocess_timeout {
                incidents.push(Incident::TimedOut(limit));
            }
        }

        TestOutcome {
            module: self.module.clone(),
            name: self.name.clone(),
            passed: incidents.is_empty() && !comparison.is_failure(),
            command: Some(command),
            comparison: Some(comparison),
            incidents,
            duration,
        }
    }

    fn launchable_command(&self, argv: &[String]) -> Result<String, LaunchError> {
        if argv.is_empty() {
            return Err(LaunchError::NoArguments(self.id()));
        }

        quote_command(argv)
    }
}

/// Runs a child process to completion, feeding it `input` when given. `command` is
/// the quoted form of `argv`, used in diagnostics.
pub fn run_child(
    argv: &[String],
    command: &str,
    input: Option<&str>,
    timeout: Option<Duration>,
) -> Result<ChildOutput, LaunchError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(LaunchError::NoArguments(command.to_owned()));
    };

    let mut cmd = std::process::Command::new(program);
    cmd.args(args);
    if input.is_none() {
        cmd.stdin(Stdio::null());
    }

    // SAFETY:
    // Children get their own session so that programs probing the controlling terminal
    // cannot signal or block the harness. Calling pre_exec can be unsafe as it runs in
    // the child process after fork() but before exec(), where only async-signal-safe
    // operations are allowed. setsid() performs no allocation and touches no state
    // shared with the parent.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            let _ = nix::unistd::setsid();
            Ok(())
        })
    };

    let mut test_cmd = assert_cmd::Command::from_std(cmd);

    if let Some(timeout) = timeout {
        test_cmd.timeout(timeout);
    }

    if let Some(input) = input {
        test_cmd.write_stdin(input.as_bytes());
    }

    tracing::debug!(target: "testbed", "running: {command}");

    let start_time = Instant::now();
    let output = test_cmd.output().map_err(|source| LaunchError::Spawn {
        command: command.to_owned(),
        source,
    })?;
    let duration = start_time.elapsed();

    let stdout = String::from_utf8_lossy(output.stdout.as_slice());
    let stderr = String::from_utf8_lossy(output.stderr.as_slice());

    Ok(ChildOutput {
        code: exit_code(output.status),
        stdout: streams().cull_debug(Stream::Stdout, &stdout),
        stderr: streams().cull_debug(Stream::Stderr, &stderr),
        timed_out: output.status.code().is_none() && timeout.is_some_and(|t| duration >= t),
    })
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
