//! Test module declarations and test case discovery.
//!
//! A test module is declared as an ordered [`Namespace`] of named symbols. Names with
//! the `test_`, `run_` and `batch_` prefixes define test cases; names derived from a
//! test's suffix with the `result_`, `out_`, `err_` and `code_` prefixes declare its
//! expectations. [`Namespace::discover`] classifies every symbol once, in declaration
//! order, producing a [`Module`] of [`TestCase`]s.

use crate::comparison::{Expected, Grep, JsonFilter};
use crate::error::DiscoveryError;
use serde_json::Value;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Prefix of in-process test functions.
pub const INPROCESS_TEST_PREFIX: &str = "test_";
/// Prefix of subprocess test argument lists.
pub const SUBPROCESS_TEST_PREFIX: &str = "run_";
/// Prefix of batch test declarations.
pub const BATCH_TEST_PREFIX: &str = "batch_";

/// Prefix of expected in-process results.
pub const INPROCESS_RESULT_PREFIX: &str = "result_";
/// Prefix of expected subprocess exit codes.
pub const SUBPROCESS_CODE_PREFIX: &str = "code_";
/// Prefix of expected standard output.
pub const TEST_OUTPUT_PREFIX: &str = "out_";
/// Prefix of expected standard error.
pub const TEST_ERROR_PREFIX: &str = "err_";

/// Symbol listing the names of disabled tests.
pub const DISABLED_TESTS_SYMBOL: &str = "DISABLED";
/// Symbol naming a directory to be replaced in captured output.
pub const TEST_DIR_SYMBOL: &str = "TEST_DIR";
/// Symbol listing arguments added to the command prefix of the module's subprocess
/// tests.
pub const COMMAND_PREFIX_ADDITIONS: &str = "global_options";

/// A contained failure raised by a test body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exception {
    /// Short type name of the error, `anyhow` for errors without a concrete type,
    /// or `panic`.
    pub kind: String,
    /// The error message.
    pub message: String,
    /// Full error chain, when one is available.
    pub details: Option<String>,
}

impl Exception {
    /// Converts an error returned by a test body.
    pub fn from_error<E: Into<anyhow::Error> + 'static>(err: E) -> Self {
        let kind = if TypeId::of::<E>() == TypeId::of::<anyhow::Error>() {
            String::from("anyhow")
        } else {
            short_type_name::<E>().to_owned()
        };
        let err: anyhow::Error = err.into();

        Self {
            kind,
            message: err.to_string(),
            details: Some(format!("{err:?}")),
        }
    }

    /// Converts the payload of a panic raised by a test body.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::from("Box<dyn Any>")
        };

        Self {
            kind: String::from("panic"),
            message,
            details: None,
        }
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Values an in-process test body may return.
pub trait TestReturn {
    /// Converts the return value into a comparable result.
    fn into_test_value(self) -> Result<Value, Exception>;
}

impl TestReturn for Value {
    fn into_test_value(self) -> Result<Value, Exception> {
        Ok(self)
    }
}

impl TestReturn for () {
    fn into_test_value(self) -> Result<Value, Exception> {
        Ok(Value::Null)
    }
}

impl TestReturn for &str {
    fn into_test_value(self) -> Result<Value, Exception> {
        Ok(Value::from(self))
    }
}

macro_rules! impl_test_return_via_value {
    ($($t:ty),*) => {
        $(
            impl TestReturn for $t {
                fn into_test_value(self) -> Result<Value, Exception> {
                    Ok(Value::from(self))
                }
            }
        )*
    };
}

impl_test_return_via_value!(bool, i32, i64, u32, u64, usize, f64, String);

impl<T: TestReturn> TestReturn for Option<T> {
    fn into_test_value(self) -> Result<Value, Exception> {
        self.map_or(Ok(Value::Null), TestReturn::into_test_value)
    }
}

impl<T: TestReturn, E: Into<anyhow::Error> + 'static> TestReturn for Result<T, E> {
    fn into_test_value(self) -> Result<Value, Exception> {
        match self {
            Ok(value) => value.into_test_value(),
            Err(err) => Err(Exception::from_error(err)),
        }
    }
}

/// A zero-argument in-process test body.
pub type TestFn = Arc<dyn Fn() -> Result<Value, Exception> + Send + Sync>;

/// A batch test: arguments plus newline-delimited input for the child's stdin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Command arguments, appended to the command prefix.
    pub args: Vec<String>,
    /// Text written to the child's standard input.
    pub input: String,
}

impl Batch {
    /// Creates a batch declaration.
    pub fn new<I, S>(args: I, input: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            input: input.into(),
        }
    }
}

/// A value bound to a name in a test module.
#[derive(Clone)]
pub enum Symbol {
    /// A test body.
    Function(TestFn),
    /// A list of strings.
    Args(Vec<String>),
    /// A string.
    Text(String),
    /// Arguments plus standard input.
    Batch(Batch),
    /// A substring expectation.
    Grep(Grep),
    /// A filtered-JSON expectation.
    JsonFilter(JsonFilter),
    /// Any other value.
    Value(Value),
}

impl Symbol {
    /// Wraps a test body.
    pub fn function<F, R>(f: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: TestReturn,
    {
        Self::Function(Arc::new(move || f().into_test_value()))
    }

    const fn type_name(&self) -> &'static str {
        match self {
            Self::Function(_) => "a function",
            Self::Args(_) => "a list",
            Self::Text(_) => "a string",
            Self::Batch(_) => "a batch",
            Self::Grep(_) => "a Grep",
            Self::JsonFilter(_) => "a JsonFilter",
            Self::Value(_) => "a value",
        }
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function(_) => write!(f, "Function(..)"),
            Self::Args(args) => f.debug_tuple("Args").field(args).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Batch(batch) => f.debug_tuple("Batch").field(batch).finish(),
            Self::Grep(grep) => f.debug_tuple("Grep").field(grep).finish(),
            Self::JsonFilter(filter) => f.debug_tuple("JsonFilter").field(filter).finish(),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<const N: usize> From<[&str; N]> for Symbol {
    fn from(value: [&str; N]) -> Self {
        Self::Args(value.iter().map(|s| (*s).to_owned()).collect())
    }
}

impl From<Vec<String>> for Symbol {
    fn from(value: Vec<String>) -> Self {
        Self::Args(value)
    }
}

impl From<Batch> for Symbol {
    fn from(value: Batch) -> Self {
        Self::Batch(value)
    }
}

impl From<Grep> for Symbol {
    fn from(value: Grep) -> Self {
        Self::Grep(value)
    }
}

impl From<JsonFilter> for Symbol {
    fn from(value: JsonFilter) -> Self {
        Self::JsonFilter(value)
    }
}

impl From<Value> for Symbol {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<i32> for Symbol {
    fn from(value: i32) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for Symbol {
    fn from(value: bool) -> Self {
        Self::Value(Value::from(value))
    }
}

/// The ordered symbols exported by one test module.
#[derive(Clone, Debug, Default)]
pub struct Namespace {
    symbols: Vec<(String, Symbol)>,
    subprocess_timeout: Option<Duration>,
}

impl Namespace {
    /// Creates an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a value to a name.
    #[must_use]
    pub fn define(mut self, name: impl Into<String>, value: impl Into<Symbol>) -> Self {
        self.symbols.push((name.into(), value.into()));
        self
    }

    /// Binds a test body to a name.
    #[must_use]
    pub fn function<F, R>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: TestReturn,
    {
        self.define(name, Symbol::function(f))
    }

    /// Declares the module's disabled tests.
    #[must_use]
    pub fn disable<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.define(DISABLED_TESTS_SYMBOL, names)
    }

    /// Declares the directory to replace with a placeholder in captured output.
    #[must_use]
    pub fn test_dir(self, dir: impl Into<String>) -> Self {
        self.define(TEST_DIR_SYMBOL, dir.into())
    }

    /// Limits how long each of the module's subprocess tests may run.
    #[must_use]
    pub const fn subprocess_timeout(mut self, timeout: Duration) -> Self {
        self.subprocess_timeout = Some(timeout);
        self
    }

    /// Iterates over the symbols in declaration order.
    pub fn symbols(&self) -> impl Iterator<Item = (&str, &Symbol)> {
        self.symbols.iter().map(|(name, symbol)| (name.as_str(), symbol))
    }

    /// Classifies the namespace's symbols into the test cases of a module.
    pub fn discover(&self, module_name: &str) -> Result<Module, DiscoveryError> {
        let mut lookup: HashMap<&str, &Symbol> = HashMap::new();
        for (name, symbol) in &self.symbols {
            if lookup.insert(name.as_str(), symbol).is_some() {
                return Err(DiscoveryError::DuplicateSymbol(name.clone()));
            }
        }

        let disabled_names: HashSet<&str> = match lookup.get(DISABLED_TESTS_SYMBOL) {
            None => HashSet::new(),
            Some(Symbol::Args(names)) => names.iter().map(String::as_str).collect(),
            Some(other) => return Err(unexpected(DISABLED_TESTS_SYMBOL, "a list", other)),
        };

        let test_dir = match lookup.get(TEST_DIR_SYMBOL) {
            None => None,
            Some(Symbol::Text(dir)) => Some(dir.clone()),
            Some(other) => return Err(unexpected(TEST_DIR_SYMBOL, "a string", other)),
        };

        let global_options = match lookup.get(COMMAND_PREFIX_ADDITIONS) {
            None => vec![],
            Some(Symbol::Args(args)) => args.clone(),
            Some(other) => return Err(unexpected(COMMAND_PREFIX_ADDITIONS, "a list", other)),
        };

        let mut cases = vec![];
        let mut disabled = vec![];

        for (name, symbol) in &self.symbols {
            let Some((prefix, suffix)) = split_test_name(name) else {
                continue;
            };

            if disabled_names.contains(name.as_str()) {
                disabled.push(name.clone());
                continue;
            }

            let kind = match (prefix, symbol) {
                (INPROCESS_TEST_PREFIX, Symbol::Function(f)) => TestKind::InProcess(f.clone()),
                (INPROCESS_TEST_PREFIX, other) => {
                    return Err(unexpected(name, "a function", other));
                }
                (SUBPROCESS_TEST_PREFIX, Symbol::Args(args)) => {
                    TestKind::Subprocess { args: args.clone() }
                }
                (SUBPROCESS_TEST_PREFIX, other) => return Err(unexpected(name, "a list", other)),
                (_, Symbol::Batch(batch)) => TestKind::Batch(batch.clone()),
                (_, Symbol::Text(input)) => TestKind::Batch(Batch {
                    args: vec![],
                    input: input.clone(),
                }),
                (_, other) => return Err(unexpected(name, "a batch or a string", other)),
            };

            let expected = Expectations {
                result: match &kind {
                    TestKind::InProcess(_) => lookup_result(&lookup, suffix)?,
                    _ => None,
                },
                code: match &kind {
                    TestKind::InProcess(_) => None,
                    _ => lookup_code(&lookup, suffix)?,
                },
                stdout: lookup_stream(&lookup, TEST_OUTPUT_PREFIX, suffix)?,
                stderr: lookup_stream(&lookup, TEST_ERROR_PREFIX, suffix)?,
            };

            cases.push(TestCase {
                module: module_name.to_owned(),
                name: name.clone(),
                kind,
                expected,
            });
        }

        Ok(Module {
            name: module_name.to_owned(),
            cases,
            disabled,
            test_dir,
            global_options,
            subprocess_timeout: self.subprocess_timeout,
        })
    }
}

fn split_test_name(name: &str) -> Option<(&'static str, &str)> {
    [
        INPROCESS_TEST_PREFIX,
        SUBPROCESS_TEST_PREFIX,
        BATCH_TEST_PREFIX,
    ]
    .into_iter()
    .find_map(|prefix| name.strip_prefix(prefix).map(|suffix| (prefix, suffix)))
}

fn unexpected(name: &str, expected: &'static str, found: &Symbol) -> DiscoveryError {
    DiscoveryError::UnexpectedSymbolType {
        name: name.to_owned(),
        expected,
        found: found.type_name(),
    }
}

fn lookup_result(
    lookup: &HashMap<&str, &Symbol>,
    suffix: &str,
) -> Result<Option<Value>, DiscoveryError> {
    let name = format!("{INPROCESS_RESULT_PREFIX}{suffix}");
    match lookup.get(name.as_str()) {
        None => Ok(None),
        Some(Symbol::Value(value)) => Ok(Some(value.clone())),
        Some(Symbol::Text(text)) => Ok(Some(Value::from(text.as_str()))),
        Some(Symbol::Args(items)) => Ok(Some(Value::from(items.clone()))),
        Some(other) => Err(unexpected(&name, "a value", other)),
    }
}

fn lookup_code(
    lookup: &HashMap<&str, &Symbol>,
    suffix: &str,
) -> Result<Option<i32>, DiscoveryError> {
    let name = format!("{SUBPROCESS_CODE_PREFIX}{suffix}");
    match lookup.get(name.as_str()) {
        None => Ok(None),
        Some(Symbol::Value(value)) => value
            .as_i64()
            .and_then(|code| i32::try_from(code).ok())
            .map(Some)
            .ok_or_else(|| DiscoveryError::UnexpectedSymbolType {
                name: name.clone(),
                expected: "an integer",
                found: "a non-integer value",
            }),
        Some(other) => Err(unexpected(&name, "an integer", other)),
    }
}

fn lookup_stream(
    lookup: &HashMap<&str, &Symbol>,
    prefix: &str,
    suffix: &str,
) -> Result<Option<Expected>, DiscoveryError> {
    let name = format!("{prefix}{suffix}");
    match lookup.get(name.as_str()) {
        None => Ok(None),
        Some(Symbol::Text(text)) => Ok(Some(Expected::Literal(text.clone()))),
        Some(Symbol::Grep(grep)) => Ok(Some(Expected::Grep(grep.clone()))),
        Some(Symbol::JsonFilter(filter)) => Ok(Some(Expected::JsonFilter(filter.clone()))),
        Some(other) => Err(unexpected(&name, "a string, Grep or JsonFilter", other)),
    }
}

/// How a test case is executed.
#[derive(Clone)]
pub enum TestKind {
    /// Call a function in this process.
    InProcess(TestFn),
    /// Run a child process with the given arguments.
    Subprocess {
        /// Command arguments, appended to the command prefix.
        args: Vec<String>,
    },
    /// Run a child process and feed it standard input.
    Batch(Batch),
}

impl TestKind {
    /// Returns a short name for this kind of test.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InProcess(_) => "in-process",
            Self::Subprocess { .. } => "subprocess",
            Self::Batch(_) => "batch",
        }
    }
}

impl std::fmt::Debug for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProcess(_) => write!(f, "InProcess(..)"),
            Self::Subprocess { args } => f.debug_struct("Subprocess").field("args", args).finish(),
            Self::Batch(batch) => f.debug_tuple("Batch").field(batch).finish(),
        }
    }
}

/// The expectations declared for one test case. An absent expectation means empty
/// output, a truthy result or a zero exit code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Expectations {
    /// Expected return value (in-process tests only).
    pub result: Option<Value>,
    /// Expected exit code (subprocess and batch tests only).
    pub code: Option<i32>,
    /// Expected standard output.
    pub stdout: Option<Expected>,
    /// Expected standard error.
    pub stderr: Option<Expected>,
}

/// A single test case.
#[derive(Clone, Debug)]
pub struct TestCase {
    /// Name of the module declaring the test.
    pub module: String,
    /// Name of the test, including its prefix.
    pub name: String,
    /// How the test runs.
    pub kind: TestKind,
    /// What the test is expected to produce.
    pub expected: Expectations,
}

impl TestCase {
    /// Returns the identifier used in diagnostics.
    pub fn id(&self) -> String {
        format!("{}/{}", self.module, self.name)
    }
}

/// The discovered test cases of one module, in declaration order.
#[derive(Clone, Debug)]
pub struct Module {
    /// Name of the module.
    pub name: String,
    /// Enabled test cases.
    pub cases: Vec<TestCase>,
    /// Names of test cases excluded by the module's disabled list.
    pub disabled: Vec<String>,
    /// Directory replaced with a placeholder in captured output.
    pub test_dir: Option<String>,
    /// Arguments added to the command prefix of subprocess tests.
    pub global_options: Vec<String>,
    /// Time limit for each subprocess test.
    pub subprocess_timeout: Option<Duration>,
}

/// Produces a module's namespace; called once per run.
pub type ModuleLoader = Arc<dyn Fn() -> anyhow::Result<Namespace> + Send + Sync>;

/// Values a module loader may return.
pub trait IntoNamespace {
    /// Converts into a namespace, or the error that prevented loading it.
    fn into_namespace(self) -> anyhow::Result<Namespace>;
}

impl IntoNamespace for Namespace {
    fn into_namespace(self) -> anyhow::Result<Namespace> {
        Ok(self)
    }
}

impl IntoNamespace for anyhow::Result<Namespace> {
    fn into_namespace(self) -> anyhow::Result<Namespace> {
        self
    }
}

/// A named group of test modules sharing a subprocess command prefix.
#[derive(Clone)]
pub struct Package {
    /// Name of the package.
    pub name: String,
    /// Arguments prepended to every subprocess and batch test's arguments.
    pub command_prefix: Vec<String>,
    /// Module loaders, in registration order.
    pub modules: Vec<(String, ModuleLoader)>,
}

impl Package {
    /// Creates an empty package.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command_prefix: vec![],
            modules: vec![],
        }
    }

    /// Sets the command prefix for the package's subprocess and batch tests.
    #[must_use]
    pub fn with_command_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    /// Registers a module under the given name.
    #[must_use]
    pub fn module<F, N>(mut self, name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> N + Send + Sync + 'static,
        N: IntoNamespace,
    {
        self.modules
            .push((name.into(), Arc::new(move || loader().into_namespace())));
        self
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("command_prefix", &self.command_prefix)
            .field(
                "modules",
                &self.modules.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Produces a package; called once per run.
pub type PackageLoader = Arc<dyn Fn() -> anyhow::Result<Package> + Send + Sync>;

/// Runs once before any package, e.g. to provision fixtures.
pub type SetupHook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// A named collection of test packages.
#[derive(Clone)]
pub struct Suite {
    /// Name of the suite.
    pub name: String,
    /// Package loaders, in registration order.
    pub packages: Vec<(String, PackageLoader)>,
    /// Setup hooks, in registration order.
    pub setup: Vec<(String, SetupHook)>,
}

impl Suite {
    /// Creates an empty suite.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            packages: vec![],
            setup: vec![],
        }
    }

    /// Adds an already-built package.
    #[must_use]
    pub fn add_package(self, package: Package) -> Self {
        let name = package.name.clone();
        self.package(name, move || Ok(package.clone()))
    }

    /// Registers a package whose construction may fail.
    #[must_use]
    pub fn package<F>(mut self, name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<Package> + Send + Sync + 'static,
    {
        self.packages.push((name.into(), Arc::new(loader)));
        self
    }

    /// Registers a hook run before any package.
    #[must_use]
    pub fn setup<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.setup.push((name.into(), Arc::new(hook)));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn names(module: &Module) -> Vec<&str> {
        module.cases.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_exception_kind_names_error_type() {
        let parse = "x".parse::<i32>().map(|_| ());
        let Err(parse) = parse else {
            panic!("parsing should fail");
        };
        assert_eq!(Exception::from_error(parse).kind, "ParseIntError");

        let untyped = Exception::from_error(anyhow::anyhow!("nope"));
        assert_eq!(untyped.kind, "anyhow");
        assert_eq!(untyped.to_string(), "anyhow: nope");
    }

    #[test]
    fn test_discovery_keeps_declaration_order() -> anyhow::Result<()> {
        let module = Namespace::new()
            .function("test_zeta", || true)
            .define("run_beta", ["echo", "hi"])
            .function("test_alpha", || true)
            .define("batch_mid", Batch::new(["cat"], "x\n"))
            .define("helper", "not a test")
            .discover("ordering")?;

        assert_eq!(
            names(&module),
            vec!["test_zeta", "run_beta", "test_alpha", "batch_mid"]
        );
        assert!(matches!(module.cases[0].kind, TestKind::InProcess(_)));
        assert!(matches!(module.cases[1].kind, TestKind::Subprocess { .. }));
        assert!(matches!(module.cases[3].kind, TestKind::Batch(_)));
        assert_eq!(module.cases[2].id(), "ordering/test_alpha");

        Ok(())
    }

    #[test]
    fn test_expectations_are_bound_by_suffix() -> anyhow::Result<()> {
        let module = Namespace::new()
            .function("test_parse", || 12)
            .define("result_parse", 12)
            .define("err_parse", "WARNING: x")
            .define("run_help", ["prog", "--help"])
            .define("out_help", Grep::new("usage"))
            .define("code_help", 2)
            .define("result_help", "ignored for subprocess tests")
            .discover("bindings")?;

        let parse = &module.cases[0].expected;
        assert_eq!(parse.result, Some(json!(12)));
        assert_eq!(parse.code, None);
        assert_eq!(parse.stdout, None);
        assert_eq!(parse.stderr, Some(Expected::Literal("WARNING: x".into())));

        let help = &module.cases[1].expected;
        assert_eq!(help.result, None);
        assert_eq!(help.code, Some(2));
        assert_eq!(help.stdout, Some(Expected::Grep(Grep::new("usage"))));

        Ok(())
    }

    #[test]
    fn test_disabled_tests_are_excluded() -> anyhow::Result<()> {
        let module = Namespace::new()
            .function("test_a", || true)
            .function("test_b", || true)
            .define("run_c", ["true"])
            .disable(["test_b", "run_c", "test_missing"])
            .discover("disabled")?;

        assert_eq!(names(&module), vec!["test_a"]);
        assert_eq!(module.disabled, vec!["test_b", "run_c"]);

        Ok(())
    }

    #[test]
    fn test_batch_from_text_has_no_args() -> anyhow::Result<()> {
        let module = Namespace::new()
            .define("batch_repl", "add 1\nquit\n")
            .define(COMMAND_PREFIX_ADDITIONS, ["--quiet"])
            .test_dir("/tmp/fixtures")
            .discover("batch")?;

        let TestKind::Batch(batch) = &module.cases[0].kind else {
            panic!("expected a batch test");
        };
        assert!(batch.args.is_empty());
        assert_eq!(batch.input, "add 1\nquit\n");
        assert_eq!(module.global_options, vec!["--quiet"]);
        assert_eq!(module.test_dir.as_deref(), Some("/tmp/fixtures"));

        Ok(())
    }

    #[test]
    fn test_malformed_declarations_fail_discovery() {
        let wrong_run = Namespace::new().define("run_x", "echo hi").discover("m");
        assert!(matches!(
            wrong_run,
            Err(DiscoveryError::UnexpectedSymbolType { ref name, .. }) if name == "run_x"
        ));

        let wrong_test = Namespace::new().define("test_x", true).discover("m");
        assert!(wrong_test.is_err());

        let wrong_out = Namespace::new()
            .function("test_x", || true)
            .define("out_x", 3)
            .discover("m");
        assert!(wrong_out.is_err());

        let wrong_code = Namespace::new()
            .define("run_x", ["true"])
            .define("code_x", json!(1.5))
            .discover("m");
        assert!(wrong_code.is_err());

        let duplicate = Namespace::new()
            .function("test_x", || true)
            .function("test_x", || false)
            .discover("m");
        assert_eq!(
            duplicate.err(),
            Some(DiscoveryError::DuplicateSymbol("test_x".into()))
        );
    }

    #[test]
    fn test_return_conversions() {
        assert_eq!(true.into_test_value(), Ok(json!(true)));
        assert_eq!(().into_test_value(), Ok(Value::Null));
        assert_eq!(Some("x").into_test_value(), Ok(json!("x")));
        assert_eq!(None::<i32>.into_test_value(), Ok(Value::Null));

        let failed: Result<i32, std::num::ParseIntError> = "x".parse::<i32>();
        let exception = failed.into_test_value().err();
        assert_eq!(
            exception.as_ref().map(|e| e.kind.as_str()),
            Some("ParseIntError")
        );
        assert_eq!(
            exception.map(|e| e.message),
            Some(String::from("invalid digit found in string"))
        );
    }

    #[test]
    fn test_panic_payload_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("boom"));
        let exception = Exception::from_panic(payload.as_ref());
        assert_eq!(exception.to_string(), "panic: boom");
    }
}
