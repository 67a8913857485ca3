//! Expectation matching and verdict classification.
//!
//! The matcher itself is pure substring containment over the finalized
//! capture: every expected string must appear somewhere in the stream.
//! Order among distinct expected strings is not enforced unless the test
//! case declares itself ordered. Classification then folds the simulation's
//! terminal status in: a cycle-budget timeout whose expectations were
//! already met is a pass (idle-loop firmware times out by design), one
//! whose expectations were not met is a failing `Timeout` verdict.

use crate::sim::{CaptureBuffer, TerminalStatus};
use crate::testcase::TestCase;
use serde::{Deserialize, Serialize};

/// Four-way classification of one work item's outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Every expected substring was found.
    Pass,

    /// Verification failed after a normal halt.
    Fail,

    /// Build or simulation infrastructure failed; nothing to verify.
    Error,

    /// The cycle budget ran out before the expectations were met.
    Timeout,
}

impl Verdict {
    /// Whether this verdict counts as a success.
    ///
    /// Everything except `Pass` is a failure for exit-status purposes.
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Fixed-width label for report lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of matching a capture against one expectation set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Expected substrings that were not found.
    pub missing: Vec<String>,
}

impl Verification {
    /// Whether every expected substring was found.
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Match `captured` against `expected` substrings.
///
/// Unordered mode checks plain containment per substring. Ordered mode
/// requires each match to start after the previous match ended.
pub fn verify(captured: &str, expected: &[String], ordered: bool) -> Verification {
    let mut missing = Vec::new();

    if ordered {
        let mut cursor = 0;
        for needle in expected {
            match captured[cursor..].find(needle.as_str()) {
                Some(at) => cursor += at + needle.len(),
                None => missing.push(needle.clone()),
            }
        }
    } else {
        for needle in expected {
            if !captured.contains(needle.as_str()) {
                missing.push(needle.clone());
            }
        }
    }

    Verification { missing }
}

/// Final outcome of one work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestOutcome {
    /// Project the item built.
    pub project: String,

    /// Core the item simulated on.
    pub core: String,

    /// Test case description.
    pub description: String,

    /// Classified verdict.
    pub verdict: Verdict,

    /// Full captured channel text; never truncated to a summary.
    pub captured: String,

    /// Failure or error explanation; empty on pass.
    pub message: String,

    /// Wall-clock duration of the item's pipeline in milliseconds.
    pub duration_ms: u64,

    /// Simulated cycle count, when the testbench reported one.
    pub cycles: Option<u64>,
}

impl TestOutcome {
    /// Whether this outcome passed.
    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    /// Outcome for an infrastructure failure; nothing was captured.
    pub fn error(
        project: &str,
        core: &str,
        description: &str,
        message: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            project: project.to_string(),
            core: core.to_string(),
            description: description.to_string(),
            verdict: Verdict::Error,
            captured: String::new(),
            message,
            duration_ms,
            cycles: None,
        }
    }
}

/// Classify a finalized capture against a test case's expectations.
pub fn evaluate(
    project: &str,
    core: &str,
    case: &TestCase,
    capture: &CaptureBuffer,
    duration_ms: u64,
) -> TestOutcome {
    let captured = capture.as_text().into_owned();

    let (verdict, message) = match &capture.status {
        // No usable buffer after a crash; verification is not attempted.
        TerminalStatus::Crashed { exit_code } => (
            Verdict::Error,
            format!(
                "simulator crashed with exit code {exit_code}: {}",
                capture.stderr.trim()
            ),
        ),
        TerminalStatus::Trapped { .. } => {
            let result = verify(&captured, &case.expected_output, case.ordered);
            if result.passed() {
                (Verdict::Pass, String::new())
            } else {
                (
                    Verdict::Fail,
                    format!("expected output not found: {:?}", result.missing),
                )
            }
        }
        TerminalStatus::Timeout { cycles } => {
            let result = verify(&captured, &case.expected_output, case.ordered);
            if result.passed() {
                // Expected execution mode for firmware that idles forever
                // after producing its output.
                (Verdict::Pass, String::new())
            } else {
                (
                    Verdict::Timeout,
                    format!(
                        "cycle budget exhausted{}; expected output not found: {:?}",
                        cycles
                            .map(|c| format!(" after {c} cycles"))
                            .unwrap_or_default(),
                        result.missing
                    ),
                )
            }
        }
    };

    TestOutcome {
        project: project.to_string(),
        core: core.to_string(),
        description: case.description.clone(),
        verdict,
        captured,
        message,
        duration_ms,
        cycles: capture.status.cycles(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn case(expected: &[&str], ordered: bool) -> TestCase {
        TestCase {
            description: "banner".to_string(),
            cores: vec!["picorv32".to_string()],
            expected_output: strings(expected),
            ordered,
            timeout: 10_000,
            build_args: Vec::new(),
        }
    }

    fn capture(text: &str, status: TerminalStatus) -> CaptureBuffer {
        CaptureBuffer::for_tests(text.as_bytes().to_vec(), status)
    }

    #[test]
    fn test_hello_world_passes() {
        let result = verify(
            "Hello, World from Rust on PicoRV32!\r\n",
            &strings(&["Hello, World from Rust on PicoRV32!"]),
            false,
        );
        assert!(result.passed());
    }

    #[test]
    fn test_empty_buffer_fails_with_empty_diagnostic() {
        let c = capture("", TerminalStatus::Trapped { cycles: Some(10) });
        let outcome = evaluate("hello", "picorv32", &case(&["boot"], false), &c, 5);
        assert_eq!(outcome.verdict, Verdict::Fail);
        // The diagnostic payload is the buffer itself, present even when empty.
        assert_eq!(outcome.captured, "");
        assert!(outcome.message.contains("boot"));
    }

    #[test]
    fn test_unordered_containment_ignores_order() {
        let result = verify("second then first", &strings(&["first", "second"]), false);
        assert!(result.passed());
    }

    #[test]
    fn test_ordered_mode_enforces_order() {
        let out = "ready\nok\n";
        assert!(verify(out, &strings(&["ready", "ok"]), true).passed());
        let result = verify(out, &strings(&["ok", "ready"]), true);
        assert_eq!(result.missing, vec!["ready"]);
    }

    #[test]
    fn test_ordered_matches_do_not_overlap() {
        let result = verify("abc", &strings(&["abc", "abc"]), true);
        assert!(!result.passed());
    }

    #[test]
    fn test_timeout_before_output_is_failing() {
        let c = capture("", TerminalStatus::Timeout { cycles: Some(10_000) });
        let outcome = evaluate("hello", "picorv32", &case(&["boot"], false), &c, 5);
        assert!(!outcome.passed());
        assert_eq!(outcome.verdict, Verdict::Timeout);
        assert!(outcome.message.contains("10000 cycles"));
        assert_eq!(outcome.cycles, Some(10_000));
    }

    #[test]
    fn test_timeout_after_all_output_is_pass() {
        // Idle-loop firmware: banner printed, then spins until the budget
        // runs out. That is a pass.
        let c = capture(
            "Hello, World from Rust on PicoRV32!\r\n",
            TerminalStatus::Timeout { cycles: Some(10_000) },
        );
        let outcome = evaluate(
            "hello",
            "picorv32",
            &case(&["Hello, World from Rust on PicoRV32!"], false),
            &c,
            5,
        );
        assert_eq!(outcome.verdict, Verdict::Pass);
    }

    #[test]
    fn test_crash_is_error_without_verification() {
        let c = CaptureBuffer::for_tests_with_stderr(
            b"partial".to_vec(),
            TerminalStatus::Crashed { exit_code: 3 },
            "assertion failed".to_string(),
        );
        let outcome = evaluate("hello", "picorv32", &case(&["partial"], false), &c, 5);
        assert_eq!(outcome.verdict, Verdict::Error);
        assert!(outcome.message.contains("assertion failed"));
    }

    #[test]
    fn test_no_expectations_passes_trivially() {
        let c = capture("noise", TerminalStatus::Trapped { cycles: None });
        let outcome = evaluate("hello", "picorv32", &case(&[], false), &c, 5);
        assert_eq!(outcome.verdict, Verdict::Pass);
    }

    #[test]
    fn test_verdict_labels() {
        assert_eq!(Verdict::Pass.label(), "PASS");
        assert_eq!(Verdict::Timeout.to_string(), "TIMEOUT");
        assert!(!Verdict::Timeout.is_pass());
        assert!(!Verdict::Error.is_pass());
    }

    #[test]
    fn test_verdict_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Verdict::Pass).unwrap(), "\"PASS\"");
        assert_eq!(
            serde_json::from_str::<Verdict>("\"TIMEOUT\"").unwrap(),
            Verdict::Timeout
        );
    }
}
