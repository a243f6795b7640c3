//! Self-test suite: the harness running its own declarations.
//!
//! Runs as a plain binary so that it exercises the same entry point, option parsing
//! and exit code as any suite built on this crate.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use testbed::{Grep, JsonFilter, Namespace, Package, Suite, msg, outln, util};
#[cfg(unix)]
use testbed::{InvocationContext, SingleExpectationComparison, streams};

fn in_process_module() -> Namespace {
    let calls = Arc::new(AtomicUsize::new(0));
    let (first, second) = (Arc::clone(&calls), Arc::clone(&calls));

    Namespace::new()
        .function("test_greeting", || {
            outln!("hello");
            true
        })
        .define("out_greeting", "hello")
        .function("test_sum", || (1..=4).sum::<i32>())
        .define("result_sum", 10)
        .function("test_parse", || "12".parse::<f64>())
        .define("result_parse", 12)
        .function("test_warning", || {
            msg::warn("disk almost full");
            true
        })
        .define("err_warning", Grep::new("almost full"))
        .function("test_json", || {
            outln!("{}", json!({"name": "x", "id": 42, "nested": {"id": 1, "k": true}}));
            true
        })
        .define(
            "out_json",
            JsonFilter::new(["id"], r#"{"name":"x","nested":{"k":true}}"#),
        )
        .function("test_z_first", move || first.fetch_add(1, Ordering::SeqCst) == 0)
        .function("test_a_second", move || second.load(Ordering::SeqCst) == 1)
        .function("test_multiline", || {
            outln!("one");
            outln!("two");
            true
        })
        .define("out_multiline", "\none\ntwo\n")
        .function("test_token", || util::testing_token().starts_with("_test"))
        .function("test_broken", || false)
        .disable(["test_broken"])
}

#[cfg(unix)]
fn subprocess_module() -> Namespace {
    use testbed::Batch;

    Namespace::new()
        .define("run_echo", ["-c", "echo hi"])
        .define("out_echo", "hi")
        .define("run_status", ["-c", "echo oops >&2; exit 2"])
        .define("code_status", 2)
        .define("err_status", "oops")
        .define("batch_script", Batch::new(["-s", "--"], "echo one\necho two\n"))
        .define("out_script", "one\ntwo")
        .define("batch_prefix_only", "echo via stdin\n")
        .define("out_prefix_only", "via stdin")
}

#[cfg(unix)]
fn std_streams_module() -> Namespace {
    Namespace::new()
        .function("test_std_print", || {
            println!("plain stdout");
            eprintln!("plain stderr");
            true
        })
        .define("out_std_print", "plain stdout")
        .define("err_std_print", "plain stderr")
        .function("test_interleaved", || {
            outln!("console one");
            println!("std two");
            outln!("console three");
            true
        })
        .define("out_interleaved", "console one\nstd two\nconsole three")
        .function("test_partial_line", || {
            print!("no newline");
            true
        })
        .define("out_partial_line", "no newline")
}

/// A stray `println!` in a test body must land in that test's captured output and
/// fail it, rather than reaching the terminal.
#[cfg(unix)]
fn check_stray_print_fails() -> Result<()> {
    let module = Namespace::new()
        .function("test_stray", || {
            println!("stray line");
            eprintln!("stray error");
            true
        })
        .discover("stray")?;

    anyhow::ensure!(
        streams().set_descriptor_capture(true),
        "descriptor capture unavailable"
    );
    let outcome = module.cases[0].invoke(&InvocationContext {
        command_prefix: &[],
        module: &module,
        debug: false,
    });
    streams().set_descriptor_capture(false);

    let differs = |channel: Option<&SingleExpectationComparison>, text: &str| {
        matches!(channel, Some(SingleExpectationComparison::Differs(m)) if m.actual == text)
    };
    let comparison = outcome.comparison.as_ref();

    anyhow::ensure!(
        !outcome.passed
            && differs(comparison.map(|c| &c.stdout), "stray line\n")
            && differs(comparison.map(|c| &c.stderr), "stray error\n"),
        "stray output escaped capture: {outcome:?}"
    );

    Ok(())
}

fn main() -> Result<()> {
    #[cfg(unix)]
    check_stray_print_fails()?;

    #[allow(unused_mut, reason = "only mutated on some platforms")]
    let mut package = Package::new("selftest").module("in_process", in_process_module);

    #[cfg(unix)]
    {
        package = package
            .with_command_prefix(["sh"])
            .module("subprocess", subprocess_module)
            .module("std_streams", std_streams_module);
    }

    let suite = Suite::new("testbed").add_package(package);

    testbed::run_main(&suite)
}
