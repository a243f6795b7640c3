//! Aggregation of test results across modules, packages and suites.

/// Pass/fail counts for one module, package or suite.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestResults {
    /// Name of the unit these results describe.
    pub name: String,
    /// Number of tests that ran.
    pub total: usize,
    /// Number of tests that failed.
    pub failures: usize,
    /// Number of tests that were disabled or filtered out.
    pub skipped: usize,
    /// Process exit code for this unit: 1 if anything failed, else 0.
    pub code: i32,
}

impl TestResults {
    /// Creates empty results.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Creates results standing for a unit that failed before any test could run.
    pub fn load_failure(name: impl Into<String>) -> Self {
        let mut results = Self::new(name);
        results.add_failure();
        results
    }

    /// Records a passing test.
    pub const fn add_success(&mut self) {
        self.total += 1;
    }

    /// Records a failing test.
    pub const fn add_failure(&mut self) {
        self.total += 1;
        self.failures += 1;
        self.code = 1;
    }

    /// Records a test that did not run.
    pub const fn add_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Records the outcome of a test.
    pub const fn add(&mut self, passed: bool) {
        if passed {
            self.add_success();
        } else {
            self.add_failure();
        }
    }

    /// Returns whether every test passed.
    pub const fn succeeded(&self) -> bool {
        self.failures == 0
    }

    /// Combines child results into a parent result: totals, failures and skips are
    /// summed and the exit code is the largest child code.
    pub fn summarize<'a>(
        name: impl Into<String>,
        children: impl IntoIterator<Item = &'a Self>,
    ) -> Self {
        children
            .into_iter()
            .fold(Self::new(name), |mut parent, child| {
                parent.total += child.total;
                parent.failures += child.failures;
                parent.skipped += child.skipped;
                parent.code = parent.code.max(child.code);
                parent
            })
    }
}
