//! Configuration types for the test harness.

use clap::Parser;

/// Default number of package workers.
pub const DEFAULT_PACKAGE_THREADS: usize = 2;
/// Default number of module workers per package.
pub const DEFAULT_MODULE_THREADS: usize = 5;

/// Configuration for the test runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Number of packages run concurrently.
    pub package_threads: usize,
    /// Number of modules run concurrently within each package.
    pub module_threads: usize,
    /// Whether debug messages are emitted and forwarded to subprocesses.
    pub debug: bool,
    /// Whether in-process tests capture the process's standard output and error
    /// descriptors, and not only writes made through [`crate::console`].
    pub capture_descriptors: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            package_threads: DEFAULT_PACKAGE_THREADS,
            module_threads: DEFAULT_MODULE_THREADS,
            debug: false,
            capture_descriptors: false,
        }
    }
}

impl RunnerConfig {
    /// Creates a new runner config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner config from command-line options.
    pub fn from_options(options: &TestOptions) -> Self {
        let config = Self::new()
            .with_package_threads(options.package_threads)
            .with_module_threads(options.module_threads)
            .with_debug(options.debug);

        if options.serial { config.serial() } else { config }
    }

    /// Sets the number of packages run concurrently.
    #[must_use]
    pub const fn with_package_threads(mut self, threads: usize) -> Self {
        self.package_threads = if threads == 0 { 1 } else { threads };
        self
    }

    /// Sets the number of modules run concurrently within each package.
    #[must_use]
    pub const fn with_module_threads(mut self, threads: usize) -> Self {
        self.module_threads = if threads == 0 { 1 } else { threads };
        self
    }

    /// Enables or disables debugging.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Enables or disables capture of the standard output and error descriptors.
    ///
    /// Only a process that owns its standard streams should enable this; under
    /// another test harness the redirection would swallow that harness's output.
    #[must_use]
    pub const fn with_descriptor_capture(mut self, capture: bool) -> Self {
        self.capture_descriptors = capture;
        self
    }

    /// Runs every package and module one at a time, in registration order.
    #[must_use]
    pub const fn serial(self) -> Self {
        self.with_package_threads(1).with_module_threads(1)
    }
}

/// Output format for test results.
#[derive(Clone, Copy, Default, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// `JUnit` XML format.
    Junit,
    /// Minimal output.
    Terse,
}

/// Command-line options for the test harness.
#[derive(Clone, Parser, Debug)]
#[clap(version, about, disable_help_flag = true, disable_version_flag = true)]
pub struct TestOptions {
    /// Display usage information.
    #[clap(long = "help", action = clap::ArgAction::HelpLong)]
    pub help: Option<bool>,

    /// Emit debug information, including from subprocess tests.
    #[clap(short = 'g', long = "debug", env = "TESTBED_DEBUG")]
    pub debug: bool,

    /// Output format for test results.
    #[clap(long = "format", default_value = "pretty", env = "TESTBED_FORMAT")]
    pub format: OutputFormat,

    /// Display details regarding successful test cases.
    #[clap(short = 'v', long = "verbose", env = "TESTBED_VERBOSE")]
    pub verbose: bool,

    /// List available tests without running them.
    #[clap(long = "list")]
    pub list_tests_only: bool,

    /// Exactly match filters (not just substring match).
    #[clap(long = "exact")]
    pub exact_match: bool,

    /// Number of packages run concurrently.
    #[clap(long = "package-threads", default_value_t = DEFAULT_PACKAGE_THREADS, env = "TESTBED_PACKAGE_THREADS")]
    pub package_threads: usize,

    /// Number of modules run concurrently within each package.
    #[clap(long = "module-threads", default_value_t = DEFAULT_MODULE_THREADS, env = "TESTBED_MODULE_THREADS")]
    pub module_threads: usize,

    /// Run packages and modules one at a time.
    #[clap(long = "serial", env = "TESTBED_SERIAL")]
    pub serial: bool,

    /// Capture output? (for compatibility only, has no effect).
    #[clap(long = "nocapture")]
    pub no_capture: bool,

    /// Show output from test cases (for compatibility only, has no effect).
    #[clap(long = "show-output")]
    pub show_output: bool,

    /// Colorize output? (for compatibility only, has no effect).
    #[clap(long = "color", default_value_t = clap::ColorChoice::Auto)]
    pub color: clap::ColorChoice,

    /// Unstable flags (for compatibility only, has no effect).
    #[clap(short = 'Z')]
    pub unstable_flag: Vec<String>,

    /// Patterns for tests to be excluded.
    #[clap(long = "skip")]
    pub exclude_filters: Vec<String>,

    /// Patterns for tests to be included, matched against `package/module.test`.
    pub include_filters: Vec<String>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            help: None,
            debug: false,
            format: OutputFormat::default(),
            verbose: false,
            list_tests_only: false,
            exact_match: false,
            package_threads: DEFAULT_PACKAGE_THREADS,
            module_threads: DEFAULT_MODULE_THREADS,
            serial: false,
            no_capture: false,
            show_output: false,
            color: clap::ColorChoice::Auto,
            unstable_flag: vec![],
            exclude_filters: vec![],
            include_filters: vec![],
        }
    }
}

impl TestOptions {
    /// Returns whether a test should run based on include/exclude filters.
    pub fn should_run_test(&self, qualified_name: &str) -> bool {
        if self.include_filters.is_empty() && self.exclude_filters.is_empty() {
            return true;
        }

        // If any include filters were given, then we are in opt-in mode.
        if !self.include_filters.is_empty()
            && !self.test_matches_filters(qualified_name, &self.include_filters)
        {
            return false;
        }

        // In all cases, exclude filters may be used to exclude tests.
        if !self.exclude_filters.is_empty()
            && self.test_matches_filters(qualified_name, &self.exclude_filters)
        {
            return false;
        }

        true
    }

    fn test_matches_filters(&self, qualified_test_name: &str, filters: &[String]) -> bool {
        if self.exact_match {
            filters.iter().any(|f| f == qualified_test_name)
        } else {
            filters
                .iter()
                .any(|filter| qualified_test_name.contains(filter))
        }
    }
}

/// Returns the name that filters are matched against.
pub fn qualified_test_name(package: &str, module: &str, test: &str) -> String {
    format!("{package}/{module}.{test}")
}
