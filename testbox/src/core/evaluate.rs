//! Acceptance test evaluation and report line format.

use crate::core::types::{Outcome, TestResult};

/// Compare an HTTP response against a test's expectations.
///
/// The status code is checked first; the body substring is only consulted
/// when the status matches, and only when a non-empty substring is expected.
pub fn evaluate(
    name: &str,
    expected_status: u16,
    expected_substring: Option<&str>,
    actual_status: u16,
    body: &str,
) -> TestResult {
    if actual_status != expected_status {
        return TestResult::fail(
            name,
            format!("ExpectedCode {expected_status} got {actual_status}"),
        );
    }
    if let Some(needle) = expected_substring
        && !needle.is_empty()
        && !body.contains(needle)
    {
        return TestResult::fail(name, "Response does not contain expected string");
    }
    TestResult::ok(name)
}

/// Format a result as one report line (no trailing newline).
pub fn report_line(result: &TestResult) -> String {
    match (&result.outcome, result.reason.as_deref()) {
        (Outcome::Fail, Some(reason)) => format!("{} fail ({})", result.name, reason),
        (outcome, _) => format!("{} {}", result.name, outcome),
    }
}

/// Parse a line previously written by [`report_line`].
pub fn parse_report_line(line: &str) -> Option<TestResult> {
    let line = line.trim_end();
    if let Some(name) = line.strip_suffix(" ok") {
        return (!name.is_empty()).then(|| TestResult::ok(name));
    }
    let (name, rest) = line.rsplit_once(" fail (")?;
    let reason = rest.strip_suffix(')')?;
    if name.is_empty() {
        return None;
    }
    Some(TestResult::fail(name, reason))
}
