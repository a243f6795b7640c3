//! Reporting utilities for test results.

use crate::capture::{DEBUG_MARKER, Stream, streams};
use crate::comparison::SingleExpectationComparison;
use crate::config::{OutputFormat, TestOptions, qualified_test_name};
use crate::execution::TestOutcome;
use crate::msg::s_if_plural;
use crate::results::TestResults;
use crate::util::write_diff;
use anyhow::Result;
use colored::Colorize;
use std::io::Write;

const DIVIDER_WIDTH: usize = 80;

impl TestOutcome {
    /// Writes the details of this outcome to a writer: any incidents, then a diff for
    /// every channel that did not match.
    pub fn write_details<W: Write>(&self, mut writer: W, options: &TestOptions) -> Result<()> {
        let id = self.id();

        for incident in &self.incidents {
            writeln!(writer, "{}", incident.to_string().bright_red())?;
        }

        let Some(comparison) = &self.comparison else {
            return Ok(());
        };

        if options.verbose && !comparison.is_failure() {
            if let Some(command) = &self.command {
                writeln!(writer, "{id}: {}", command.italic())?;
            }
            writeln!(writer, "    ran in {:?}", self.duration)?;
        }

        for channel in comparison.channels() {
            match channel {
                SingleExpectationComparison::NotApplicable
                | SingleExpectationComparison::Matches => {}
                SingleExpectationComparison::InvalidJson(err) => {
                    writeln!(
                        writer,
                        "{id}: {} {err}",
                        "output is not valid JSON:".bright_red()
                    )?;
                }
                SingleExpectationComparison::Differs(mismatch) => {
                    match &self.command {
                        Some(command) => writeln!(writer, "{id}: {}", command.italic())?,
                        None => writeln!(writer, "{id}:")?,
                    }

                    if let Some(expected) = &mismatch.expected {
                        writeln!(writer, "  {} {}", "---".red(), mismatch.expected_title)?;
                        writeln!(writer, "  {} {}", "+++".green(), mismatch.actual_title)?;
                        write_diff(&mut writer, 4, expected, &mismatch.actual)?;
                    } else {
                        writeln!(writer, "  {}:", mismatch.actual_title.bright_red())?;
                        writeln!(writer, "{}", indent::indent_all_by(4, mismatch.actual.as_str()))?;
                    }
                }
            }
        }

        Ok(())
    }

    fn details_as_string(&self, options: &TestOptions) -> Result<String> {
        let mut buf: Vec<u8> = vec![];
        self.write_details(&mut buf, options)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Prints outcomes and summaries to the real console streams. Each call holds the
/// console lock for its whole output, so reports never interleave with each other
/// or with captured test output.
#[derive(Clone, Debug)]
pub struct Printer {
    options: TestOptions,
}

impl Printer {
    /// Creates a printer honoring the given options.
    pub const fn new(options: TestOptions) -> Self {
        Self { options }
    }

    /// Prints the outcome of one test of the given package.
    pub fn print_outcome(&self, package: &str, outcome: &TestOutcome) -> Result<()> {
        if matches!(self.options.format, OutputFormat::Junit) {
            return Ok(());
        }

        let details = outcome.details_as_string(&self.options)?;
        let name = qualified_test_name(package, &outcome.module, &outcome.name);

        let mut writes = vec![];
        if outcome.passed {
            if !details.is_empty() {
                writes.push((Stream::Stderr, details));
            }
            if matches!(self.options.format, OutputFormat::Pretty) {
                writes.push((Stream::Stdout, format!("{name}: {}\n", "pass".green())));
            }
        } else {
            writes.push((Stream::Stderr, divider()));
            writes.push((Stream::Stderr, details));
            writes.push((Stream::Stdout, format!("{name}: {}\n", "FAIL".bright_red())));
        }

        streams().write_locked(&writes)?;
        Ok(())
    }

    /// Prints the banner announcing that a package's tests are starting.
    pub fn print_package_start(&self, package: &str) -> Result<()> {
        streams().write_locked(&[(self.message_stream(), package_banner(package))])?;
        Ok(())
    }

    /// Prints the summary line for a module, package or suite.
    pub fn print_summary(&self, results: &TestResults) -> Result<()> {
        if matches!(self.options.format, OutputFormat::Junit) {
            return Ok(());
        }

        let write = if results.succeeded() {
            (Stream::Stdout, format!("{}\n", summary_line(results)))
        } else {
            let warning = format!("WARNING: {}", summary_line(results));
            (Stream::Stderr, format!("{}\n", warning.yellow()))
        };

        streams().write_locked(&[write])?;
        Ok(())
    }

    /// Prints the error that stopped a module, package or setup hook from running.
    pub fn print_load_failure(&self, unit: &str, err: &anyhow::Error) -> Result<()> {
        let message = format!(
            "{} {unit}: {err}\n{}\n",
            "ERROR: failed to load".bright_red(),
            indent::indent_all_by(4, format!("{err:?}"))
        );

        streams().write_locked(&[(Stream::Stderr, divider()), (Stream::Stderr, message)])?;
        Ok(())
    }

    /// Prints a debug-marked message.
    pub fn print_debug(&self, message: &str) -> Result<()> {
        let line = format!("{DEBUG_MARKER}{message}\n");
        streams().write_locked(&[(self.message_stream(), line)])?;
        Ok(())
    }

    /// Prints a listing line for a test without running it.
    pub fn print_listing(&self, qualified_name: &str) -> Result<()> {
        let line = format!("{qualified_name}: test\n");
        streams().write_locked(&[(self.message_stream(), line)])?;
        Ok(())
    }

    /// Standard output is reserved for the XML report in `JUnit` mode.
    const fn message_stream(&self) -> Stream {
        match self.options.format {
            OutputFormat::Junit => Stream::Stderr,
            OutputFormat::Pretty | OutputFormat::Terse => Stream::Stdout,
        }
    }

    /// Writes the final report for output formats that defer reporting to the end
    /// of the run.
    pub fn report_results(&self, outcomes: &[(String, TestOutcome)]) -> Result<()> {
        match self.options.format {
            OutputFormat::Junit => self.report_results_junit(outcomes),
            OutputFormat::Pretty | OutputFormat::Terse => Ok(()),
        }
    }

    fn report_results_junit(&self, outcomes: &[(String, TestOutcome)]) -> Result<()> {
        let mut report = junit_report::Report::new();
        let mut suites: Vec<(String, junit_report::TestSuite)> = vec![];

        for (package, outcome) in outcomes {
            let suite_name = format!("{package}/{}", outcome.module);

            let mut test_case: junit_report::TestCase = if outcome.passed {
                junit_report::TestCase::success(&outcome.name, outcome.duration.try_into()?)
            } else {
                junit_report::TestCase::failure(
                    &outcome.name,
                    outcome.duration.try_into()?,
                    "test failure",
                    "failed",
                )
            };

            let details = outcome.details_as_string(&self.options)?;
            test_case.set_system_out(strip_ansi_escapes::strip_str(details).as_str());

            if let Some((_, suite)) = suites.iter_mut().find(|(name, _)| *name == suite_name) {
                suite.add_testcase(test_case);
            } else {
                let mut suite = junit_report::TestSuite::new(&suite_name);
                suite.add_testcase(test_case);
                suites.push((suite_name, suite));
            }
        }

        for (_, suite) in suites {
            report.add_testsuite(suite);
        }

        let mut xml: Vec<u8> = vec![];
        report.write_xml(&mut xml)?;
        xml.push(b'\n');
        streams().write_locked(&[(Stream::Stdout, String::from_utf8(xml)?)])?;

        Ok(())
    }
}

fn package_banner(package: &str) -> String {
    format!("{package}: running tests\n")
}

fn divider() -> String {
    format!("{}\n", "=".repeat(DIVIDER_WIDTH))
}

/// Formats the summary of a module, package or suite, without any warning prefix.
pub fn summary_line(results: &TestResults) -> String {
    let failures = if results.failures == 0 {
        String::from("all successful")
    } else {
        format!(
            "{} failure{}",
            results.failures,
            s_if_plural(results.failures)
        )
    };

    let skipped = if results.skipped > 0 {
        format!(", {} skipped", results.skipped)
    } else {
        String::new()
    };

    format!(
        "{}: ran {} test{}, {failures}{skipped}",
        results.name,
        results.total,
        s_if_plural(results.total)
    )
}
