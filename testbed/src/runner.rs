//! Test runner implementation.

use crate::capture::streams;
use crate::config::{OutputFormat, RunnerConfig, TestOptions, qualified_test_name};
use crate::execution::{InvocationContext, TestOutcome};
use crate::logging::TRACE_TARGET;
use crate::reporting::Printer;
use crate::results::TestResults;
use crate::scheduler::{run_blocking_pool, run_pool};
use crate::testcase::{
    Exception, Module, ModuleLoader, Package, PackageLoader, SetupHook, Suite,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

/// State shared by every worker of one run.
struct RunContext {
    config: RunnerConfig,
    options: TestOptions,
    printer: Printer,
    outcomes: parking_lot::Mutex<Vec<(String, TestOutcome)>>,
}

impl RunContext {
    fn new(config: RunnerConfig, options: TestOptions) -> Self {
        Self {
            printer: Printer::new(options.clone()),
            config,
            options,
            outcomes: parking_lot::Mutex::new(vec![]),
        }
    }

    fn debug(&self, message: impl std::fmt::Display) {
        if self.config.debug {
            report(self.printer.print_debug(&message.to_string()));
        }
    }

    fn load_failure(&self, unit: String, err: &anyhow::Error) -> TestResults {
        report(self.printer.print_load_failure(&unit, err));
        let results = TestResults::load_failure(unit);
        report(self.printer.print_summary(&results));
        results
    }
}

/// Logs a failure to write to the console; there is nowhere else to send it.
fn report<T>(result: Result<T>) {
    if let Err(err) = result {
        tracing::warn!(target: TRACE_TARGET, "failed to write report: {err:#}");
    }
}

/// Runs `f` against the run's context on the blocking pool. Printing waits for the
/// console gate, which a running in-process test may hold for as long as it runs.
async fn on_console<T, F>(context: &Arc<RunContext>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&RunContext) -> T + Send + 'static,
{
    let context = Arc::clone(context);
    Ok(tokio::task::spawn_blocking(move || f(&context)).await?)
}

/// The main test runner.
pub struct TestRunner {
    config: RunnerConfig,
    options: TestOptions,
}

impl TestRunner {
    /// Creates a new test runner with the given configuration and options.
    pub const fn new(config: RunnerConfig, options: TestOptions) -> Self {
        Self { config, options }
    }

    /// Runs every test of the suite and returns the suite's results.
    pub async fn run(&self, suite: &Suite) -> Result<TestResults> {
        crate::msg::set_debug(self.config.debug);
        if streams().set_descriptor_capture(self.config.capture_descriptors) {
            tracing::debug!(target: TRACE_TARGET, "capturing standard descriptors");
        }

        let context = Arc::new(RunContext::new(self.config.clone(), self.options.clone()));

        if self.options.list_tests_only {
            let listed = suite.clone();
            on_console(&context, move |context| list_suite(context, &listed)).await?;
            return Ok(TestResults::new(&suite.name));
        }

        tracing::debug!(target: TRACE_TARGET, "running suite {}", suite.name);

        let hook_context = Arc::clone(&context);
        let mut children = run_blocking_pool(1, suite.setup.clone(), move |(name, hook)| {
            run_setup_hook(&hook_context, &name, &hook)
        })
        .await?;

        let package_context = Arc::clone(&context);
        let package_results = run_pool(
            self.config.package_threads,
            suite.packages.clone(),
            move |(name, loader)| {
                let context = Arc::clone(&package_context);
                async move { run_package(context, name, loader).await }
            },
        )
        .await?;
        children.extend(package_results);

        let results = TestResults::summarize(&suite.name, &children);

        let summary = results.clone();
        on_console(&context, move |context| -> Result<()> {
            let outcomes = std::mem::take(&mut *context.outcomes.lock());
            context.printer.report_results(&outcomes)?;
            context.printer.print_summary(&summary)
        })
        .await??;

        Ok(results)
    }
}

/// Parses options from the command line, runs the suite and exits with status 1 if
/// any test failed.
///
/// In-process tests capture the standard descriptors, so plain `print!` output is
/// compared along with console output.
pub fn run_main(suite: &Suite) -> Result<()> {
    let options = TestOptions::parse();
    crate::logging::init(options.debug);

    let config = RunnerConfig::from_options(&options).with_descriptor_capture(true);
    let runner = TestRunner::new(config, options);

    let results = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(runner.run(suite))?;

    if results.code != 0 {
        std::process::exit(results.code);
    }

    Ok(())
}

fn run_setup_hook(context: &RunContext, name: &str, hook: &SetupHook) -> TestResults {
    let unit = format!("setup:{name}");
    context.debug(format!("Running {unit}"));

    match catch_panic(|| hook()) {
        Ok(()) => TestResults::new(unit),
        Err(err) => context.load_failure(unit, &err),
    }
}

async fn run_package(context: Arc<RunContext>, name: String, loader: PackageLoader) -> TestResults {
    tracing::debug!(target: TRACE_TARGET, "running package {name}");

    let load_name = name.clone();
    let loaded = on_console(&context, move |context| {
        report(context.printer.print_package_start(&load_name));
        catch_panic(|| loader()).map_err(|err| context.load_failure(load_name, &err))
    })
    .await;

    let package = match loaded {
        Ok(Ok(package)) => Arc::new(package),
        Ok(Err(results)) => return results,
        Err(err) => return contained_failure(&context, name, err).await,
    };

    let module_context = Arc::clone(&context);
    let module_package = Arc::clone(&package);
    let module_results = run_blocking_pool(
        context.config.module_threads,
        package.modules.clone(),
        move |(module_name, loader)| {
            run_module(&module_context, &module_package, &module_name, &loader)
        },
    )
    .await;

    let module_results = match module_results {
        Ok(module_results) => module_results,
        Err(err) => return contained_failure(&context, name, err.into()).await,
    };

    let results = TestResults::summarize(&name, &module_results);
    let summary = results.clone();
    report(
        on_console(&context, move |context| context.printer.print_summary(&summary))
            .await
            .and_then(|printed| printed),
    );

    results
}

/// Reports a failure of the harness's own tasks as a load failure of `unit`.
async fn contained_failure(
    context: &Arc<RunContext>,
    unit: String,
    err: anyhow::Error,
) -> TestResults {
    let fallback = TestResults::load_failure(unit.clone());
    on_console(context, move |context| context.load_failure(unit, &err))
        .await
        .unwrap_or(fallback)
}

fn run_module(
    context: &RunContext,
    package: &Package,
    module_name: &str,
    loader: &ModuleLoader,
) -> TestResults {
    let unit = format!("{}/{module_name}", package.name);
    tracing::debug!(target: TRACE_TARGET, "running module {unit}");

    let module = match load_module(module_name, loader) {
        Ok(module) => module,
        Err(err) => return context.load_failure(unit, &err),
    };

    let mut results = TestResults::new(unit);

    for name in &module.disabled {
        context.debug(format!("Skipping disabled test {}/{name}", module.name));
        results.add_skipped();
    }

    let invocation = InvocationContext {
        command_prefix: &package.command_prefix,
        module: &module,
        debug: context.config.debug,
    };

    for case in &module.cases {
        let qualified_name = qualified_test_name(&package.name, &module.name, &case.name);
        if !context.options.should_run_test(&qualified_name) {
            results.add_skipped();
            continue;
        }

        let outcome = case.invoke(&invocation);
        results.add(outcome.passed);

        report(context.printer.print_outcome(&package.name, &outcome));
        if matches!(context.options.format, OutputFormat::Junit) {
            context.outcomes.lock().push((package.name.clone(), outcome));
        }
    }

    report(context.printer.print_summary(&results));
    results
}

fn load_module(name: &str, loader: &ModuleLoader) -> Result<Module> {
    let namespace = catch_panic(|| loader())?;
    namespace
        .discover(name)
        .with_context(|| format!("discovering tests in module {name}"))
}

fn list_suite(context: &RunContext, suite: &Suite) {
    for (package_name, loader) in &suite.packages {
        let package = match catch_panic(|| loader()) {
            Ok(package) => package,
            Err(err) => {
                report(context.printer.print_load_failure(package_name, &err));
                continue;
            }
        };

        for (module_name, loader) in &package.modules {
            let module = match load_module(module_name, loader) {
                Ok(module) => module,
                Err(err) => {
                    let unit = format!("{package_name}/{module_name}");
                    report(context.printer.print_load_failure(&unit, &err));
                    continue;
                }
            };

            for case in &module.cases {
                let qualified_name = qualified_test_name(package_name, module_name, &case.name);
                if context.options.should_run_test(&qualified_name) {
                    report(context.printer.print_listing(&qualified_name));
                }
            }
        }
    }
}

/// Calls `f`, converting a panic into an error.
fn catch_panic<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(anyhow::anyhow!(Exception::from_panic(payload.as_ref()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcase::Namespace;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runner() -> TestRunner {
        let options = TestOptions {
            format: OutputFormat::Terse,
            ..TestOptions::default()
        };
        TestRunner::new(RunnerConfig::from_options(&options), options)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_declaration_order_within_module() -> anyhow::Result<()> {
        let counter = Arc::new(AtomicUsize::new(0));
        let (first, second) = (Arc::clone(&counter), Arc::clone(&counter));

        let package = Package::new("ordering").module("sequence", move || {
            let (first, second) = (Arc::clone(&first), Arc::clone(&second));
            Namespace::new()
                .function("test_z_increments", move || {
                    first.fetch_add(1, Ordering::SeqCst) == 0
                })
                .function("test_a_observes", move || second.load(Ordering::SeqCst) == 1)
        });

        let results = runner()
            .run(&Suite::new("suite").add_package(package))
            .await?;

        assert_eq!((results.total, results.failures), (2, 0));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_are_contained_and_aggregated() -> anyhow::Result<()> {
        let package = Package::new("mixed")
            .module("good", || {
                Namespace::new()
                    .function("test_one", || true)
                    .function("test_two", || Some(1))
            })
            .module("bad", || {
                Namespace::new()
                    .function("test_raises", || -> anyhow::Result<bool> {
                        anyhow::bail!("nope")
                    })
                    .function("test_still_runs", || true)
                    .function("test_disabled", || false)
                    .disable(["test_disabled"])
            })
            .module("broken", || -> anyhow::Result<Namespace> {
                anyhow::bail!("cannot import")
            });

        let suite = Suite::new("suite")
            .add_package(package)
            .package("unloadable", || anyhow::bail!("missing"));

        let results = runner().run(&suite).await?;

        // good: 2 passes; bad: 1 failure + 1 pass + 1 skipped; broken: 1 synthetic
        // failure; unloadable: 1 synthetic failure.
        assert_eq!(results.total, 6);
        assert_eq!(results.failures, 3);
        assert_eq!(results.skipped, 1);
        assert_eq!(results.code, 1);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_setup_hook_counts_once() -> anyhow::Result<()> {
        let suite = Suite::new("suite")
            .setup("fixtures", || anyhow::bail!("no fixtures"))
            .add_package(
                Package::new("p").module("m", || Namespace::new().function("test_ok", || true)),
            );

        let results = runner().run(&suite).await?;
        assert_eq!((results.total, results.failures), (2, 1));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_filters_skip_tests() -> anyhow::Result<()> {
        let options = TestOptions {
            format: OutputFormat::Terse,
            exclude_filters: vec![String::from("test_slow")],
            ..TestOptions::default()
        };
        let runner = TestRunner::new(RunnerConfig::from_options(&options), options);

        let suite = Suite::new("suite").add_package(Package::new("p").module("m", || {
            Namespace::new()
                .function("test_fast", || true)
                .function("test_slow", || false)
        }));

        let results = runner.run(&suite).await?;
        assert_eq!((results.total, results.failures, results.skipped), (1, 0, 1));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_packages_report_on_single_worker() -> anyhow::Result<()> {
        let options = TestOptions {
            format: OutputFormat::Terse,
            ..TestOptions::default()
        };
        let runner = TestRunner::new(
            RunnerConfig::from_options(&options).with_package_threads(3),
            options,
        );

        let suite = Suite::new("suite")
            .add_package(Package::new("slow").module("m", || {
                Namespace::new().function("test_waits", || {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    true
                })
            }))
            .package("unloadable", || anyhow::bail!("missing"))
            .add_package(
                Package::new("quick").module("m", || Namespace::new().function("test_ok", || true)),
            );

        let results = runner.run(&suite).await?;
        assert_eq!((results.total, results.failures), (3, 1));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_suite() -> anyhow::Result<()> {
        let results = runner().run(&Suite::new("nothing")).await?;
        assert_eq!(results, TestResults::new("nothing"));

        Ok(())
    }
}
