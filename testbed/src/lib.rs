//! Concurrent test harness for module-declared test cases.
//!
//! Tests are declared per module as an ordered [`Namespace`] of named symbols:
//!
//! * `test_<name>`: a function run in-process with its output captured;
//! * `run_<name>`: an argument list run as a child process;
//! * `batch_<name>`: a child process fed a newline-delimited input script.
//!
//! Expected values sit next to each test under `result_`, `out_`, `err_` and `code_`
//! prefixed names. A test without an output expectation must produce no output; a
//! test without a result or code expectation must return a truthy value or exit
//! with status zero.
//!
//! Modules are grouped into [`Package`]s and packages into a [`Suite`]. The
//! [`TestRunner`] runs packages and modules concurrently on bounded worker pools,
//! while the tests inside one module always run serially in declaration order.
//! Capture of the process-wide console streams admits one test at a time, so
//! concurrently running modules never see each other's output.
//!
//! Code exercised by in-process tests writes through [`console`] (or the
//! [`outln!`]/[`errln!`] macros and [`msg`] helpers) so that its output can be
//! captured. Binaries that own their standard streams, such as those entering
//! through [`run_main`], capture plain `print!` output as well.

#![cfg_attr(test, allow(clippy::panic, clippy::panic_in_result_fn))]

mod capture;
mod comparison;
mod config;
pub mod console;
mod error;
mod execution;
pub mod logging;
pub mod msg;
mod reporting;
mod results;
mod runner;
pub mod scheduler;
mod testcase;
pub mod util;

pub use capture::{
    Capture, CapturedOutput, ConsoleLock, DEBUG_MARKER, Stream, Streams, cull_debug_lines,
    streams,
};
pub use comparison::{
    Expected, ExpectationComparison, Grep, JsonFilter, Mismatch, SingleExpectationComparison,
    TEST_DIR_PLACEHOLDER, check_code, check_output, check_result, is_truthy, literal_matches,
    remove_keys, values_equal,
};
pub use config::{
    DEFAULT_MODULE_THREADS, DEFAULT_PACKAGE_THREADS, OutputFormat, RunnerConfig, TestOptions,
    qualified_test_name,
};
pub use error::{CaptureError, DiscoveryError, LaunchError};
pub use execution::{ChildOutput, DEBUG_FLAG, Incident, InvocationContext, TestOutcome, run_child};
pub use reporting::{Printer, summary_line};
pub use results::TestResults;
pub use runner::{TestRunner, run_main};
pub use testcase::{
    BATCH_TEST_PREFIX, Batch, COMMAND_PREFIX_ADDITIONS, DISABLED_TESTS_SYMBOL, Exception,
    Expectations, INPROCESS_RESULT_PREFIX, INPROCESS_TEST_PREFIX, IntoNamespace, Module,
    ModuleLoader, Namespace, PackageLoader, Package, SUBPROCESS_CODE_PREFIX,
    SUBPROCESS_TEST_PREFIX, SetupHook, Suite, Symbol, TEST_DIR_SYMBOL, TEST_ERROR_PREFIX,
    TEST_OUTPUT_PREFIX, TestCase, TestFn, TestKind, TestReturn,
};
