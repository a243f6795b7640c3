//! Comparison of actual test results against declared expectations.

use crate::capture::Stream;
use serde_json::Value;

/// Token substituted for a module's `TEST_DIR` in captured output.
pub const TEST_DIR_PLACEHOLDER: &str = "%TESTDIR%";

/// Expects the output to contain a search term anywhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grep {
    /// The substring to search for.
    pub search: String,
}

impl Grep {
    /// Creates an expectation satisfied by any output containing `search`.
    pub fn new(search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
        }
    }
}

/// Expects JSON output that, after removing some keys, matches the given text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonFilter {
    /// Keys removed from every object in the output before comparison.
    pub remove: Vec<String>,
    /// Expected compact JSON text.
    pub text: String,
}

impl JsonFilter {
    /// Creates a filter removing `remove` and expecting `text` (surrounding whitespace is
    /// ignored).
    pub fn new<I, S>(remove: I, text: impl AsRef<str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            remove: remove.into_iter().map(Into::into).collect(),
            text: text.as_ref().trim().to_owned(),
        }
    }

    /// Parses `output` as JSON, removes the filtered keys and returns the compact text.
    pub fn apply(&self, output: &str) -> Result<String, serde_json::Error> {
        let mut value: Value = serde_json::from_str(output)?;
        remove_keys(&mut value, &self.remove);
        serde_json::to_string(&value)
    }
}

/// Recursively removes `keys` from every object nested in `value`.
pub fn remove_keys(value: &mut Value, keys: &[String]) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !keys.contains(key));
            for child in map.values_mut() {
                remove_keys(child, keys);
            }
        }
        Value::Array(items) => {
            for item in items {
                remove_keys(item, keys);
            }
        }
        _ => (),
    }
}

/// An expectation for one output stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expected {
    /// The output must equal this text, modulo newline conventions.
    Literal(String),
    /// The output must contain a search term.
    Grep(Grep),
    /// The output must be JSON matching a filtered text.
    JsonFilter(JsonFilter),
}

/// Details of a failed comparison, rendered as a diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    /// The expected value, if one was declared.
    pub expected: Option<String>,
    /// The actual value.
    pub actual: String,
    /// Title for the expected side of the diff.
    pub expected_title: String,
    /// Title for the actual side of the diff.
    pub actual_title: String,
}

/// Comparison of a single channel (result, exit code or stream).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SingleExpectationComparison {
    /// The channel does not apply to this kind of test.
    NotApplicable,
    /// Actual matches expected.
    Matches,
    /// Actual differs from expected.
    Differs(Mismatch),
    /// The actual output could not be parsed as JSON.
    InvalidJson(String),
}

impl SingleExpectationComparison {
    /// Returns whether this comparison indicates a failure.
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Differs(_) | Self::InvalidJson(_))
    }
}

/// Comparison of every channel of one test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectationComparison {
    /// Comparison of an in-process test's return value.
    pub result: SingleExpectationComparison,
    /// Comparison of a subprocess's exit code.
    pub exit_code: SingleExpectationComparison,
    /// Comparison of stdout.
    pub stdout: SingleExpectationComparison,
    /// Comparison of stderr.
    pub stderr: SingleExpectationComparison,
}

impl ExpectationComparison {
    /// Returns whether any channel failed.
    pub const fn is_failure(&self) -> bool {
        self.result.is_failure()
            || self.exit_code.is_failure()
            || self.stdout.is_failure()
            || self.stderr.is_failure()
    }

    /// Iterates over the channels that were compared.
    pub fn channels(&self) -> impl Iterator<Item = &SingleExpectationComparison> {
        [&self.result, &self.exit_code, &self.stdout, &self.stderr]
            .into_iter()
            .filter(|c| !matches!(c, SingleExpectationComparison::NotApplicable))
    }
}

/// Compares captured stream output against an optional expectation.
///
/// Occurrences of `test_dir` in `actual` are replaced with [`TEST_DIR_PLACEHOLDER`]
/// first. Without an expectation the output must be empty.
pub fn check_output(
    expected: Option<&Expected>,
    actual: &str,
    stream: Stream,
    test_dir: Option<&str>,
) -> SingleExpectationComparison {
    let actual = match test_dir {
        Some(dir) if !dir.is_empty() => actual.replace(dir, TEST_DIR_PLACEHOLDER),
        _ => actual.to_owned(),
    };

    let Some(expected) = expected else {
        if actual.is_empty() {
            return SingleExpectationComparison::Matches;
        }

        return SingleExpectationComparison::Differs(Mismatch {
            expected: None,
            actual,
            expected_title: String::from("Expected"),
            actual_title: format!("Unexpected {stream} output"),
        });
    };

    match expected {
        Expected::Grep(grep) => {
            if actual.contains(grep.search.as_str()) {
                SingleExpectationComparison::Matches
            } else {
                SingleExpectationComparison::Differs(Mismatch {
                    expected: Some(grep.search.clone()),
                    actual,
                    expected_title: format!("Expected {stream} substring"),
                    actual_title: format!("Actual {stream} output"),
                })
            }
        }
        Expected::JsonFilter(filter) => match filter.apply(&actual) {
            Ok(filtered) => compare_literal(&filter.text, filtered, stream),
            Err(err) => SingleExpectationComparison::InvalidJson(err.to_string()),
        },
        Expected::Literal(text) => compare_literal(text, actual, stream),
    }
}

fn compare_literal(expected: &str, actual: String, stream: Stream) -> SingleExpectationComparison {
    if literal_matches(expected, &actual) {
        SingleExpectationComparison::Matches
    } else {
        SingleExpectationComparison::Differs(Mismatch {
            expected: Some(expected.to_owned()),
            actual,
            expected_title: format!("Expected {stream} output"),
            actual_title: format!("Actual {stream} output"),
        })
    }
}

/// Returns whether `actual` equals `expected` under any accepted newline convention.
///
/// The conventions are: as-is, without one trailing newline, with a leading newline
/// added, or both. The leading-newline forms let expectations be written as
/// left-justified multi-line literals.
pub fn literal_matches(expected: &str, actual: &str) -> bool {
    let stripped = actual.strip_suffix('\n').unwrap_or(actual);

    expected == actual
        || expected == stripped
        || expected
            .strip_prefix('\n')
            .is_some_and(|rest| rest == actual || rest == stripped)
}

/// Compares an in-process test's return value. Without an expectation the value must
/// be truthy.
pub fn check_result(expected: Option<&Value>, actual: &Value) -> SingleExpectationComparison {
    match expected {
        Some(expected) if values_equal(expected, actual) => SingleExpectationComparison::Matches,
        Some(expected) => SingleExpectationComparison::Differs(Mismatch {
            expected: Some(expected.to_string()),
            actual: actual.to_string(),
            expected_title: String::from("Expected result"),
            actual_title: String::from("Actual result"),
        }),
        None if is_truthy(actual) => SingleExpectationComparison::Matches,
        None => SingleExpectationComparison::Differs(Mismatch {
            expected: None,
            actual: actual.to_string(),
            expected_title: String::from("Expected result"),
            actual_title: String::from("False result"),
        }),
    }
}

/// Compares a subprocess's exit code. Without an expectation the code must be zero.
pub fn check_code(expected: Option<i32>, actual: i32) -> SingleExpectationComparison {
    match expected {
        Some(expected) if expected == actual => SingleExpectationComparison::Matches,
        Some(expected) => SingleExpectationComparison::Differs(Mismatch {
            expected: Some(expected.to_string()),
            actual: actual.to_string(),
            expected_title: String::from("Expected return code"),
            actual_title: String::from("Actual return code"),
        }),
        None if actual == 0 => SingleExpectationComparison::Matches,
        None => SingleExpectationComparison::Differs(Mismatch {
            expected: None,
            actual: actual.to_string(),
            expected_title: String::from("Expected return code"),
            actual_title: String::from("Unexpected nonzero return code"),
        }),
    }
}

/// Returns whether a value counts as a passing result on its own: everything except
/// null, false, zero and empty strings, arrays and objects.
#[allow(clippy::float_cmp, reason = "only exact zero is falsy")]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Structural equality where integers and floats compare by numeric value and object
/// key order is irrelevant.
#[allow(clippy::float_cmp, reason = "numbers are compared for exact equality")]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            l == r || l.as_f64().zip(r.as_f64()).is_some_and(|(l, r)| l == r)
        }
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter()
                    .all(|(key, l)| r.get(key).is_some_and(|r| values_equal(l, r)))
        }
        _ => left == right,
    }
}
