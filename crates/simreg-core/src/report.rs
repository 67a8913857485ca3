//! Outcome aggregation and report rendering.
//!
//! Two consumers: a human-oriented console summary and a machine-readable
//! JSON report for CI ingestion (one record per work item). Rendering is a
//! pure projection of the summary; it never alters verdicts.

use crate::error::{RegressionError, Result};
use crate::verify::{TestOutcome, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Aggregate of one complete matrix run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// Run identity, carried into the report file.
    pub run_id: Uuid,

    /// When the run finished.
    pub run_at: DateTime<Utc>,

    /// One outcome per expanded work item, in expansion order.
    pub outcomes: Vec<TestOutcome>,

    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl Summary {
    /// Aggregate `outcomes` into a summary.
    pub fn aggregate(outcomes: Vec<TestOutcome>, duration_ms: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            run_at: Utc::now(),
            outcomes,
            duration_ms,
        }
    }

    /// Whether every outcome passed.
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(TestOutcome::passed)
    }

    /// Whether the matrix expanded to nothing.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of outcomes with `verdict`.
    pub fn count(&self, verdict: Verdict) -> usize {
        self.outcomes.iter().filter(|o| o.verdict == verdict).count()
    }

    /// Number of passing outcomes.
    pub fn passed(&self) -> usize {
        self.count(Verdict::Pass)
    }

    /// Number of non-passing outcomes.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }
}

// ── console rendering ─────────────────────────────────────────────────────

/// Render the human-oriented console summary.
///
/// Per-item pass/fail lines, counts by verdict, and a full diagnostic dump
/// (message plus the complete captured stream) for every non-passing item.
/// `verbose` additionally dumps captured output for passing items.
pub fn render_console(summary: &Summary, verbose: bool) -> String {
    let mut out = String::new();

    for outcome in &summary.outcomes {
        let mark = if outcome.passed() { '✓' } else { '✗' };
        out.push_str(&format!(
            "{mark} {} on {} [{}] ({}ms, {})\n",
            outcome.project,
            outcome.core,
            outcome.description,
            outcome.duration_ms,
            outcome.verdict
        ));
        if verbose && outcome.passed() {
            push_capture(&mut out, outcome);
        }
    }

    let failures: Vec<&TestOutcome> = summary.outcomes.iter().filter(|o| !o.passed()).collect();
    for outcome in &failures {
        out.push_str(&format!(
            "\n--- {} on {} [{}]: {}\n{}\n",
            outcome.project, outcome.core, outcome.description, outcome.verdict, outcome.message
        ));
        push_capture(&mut out, outcome);
    }

    out.push_str(&format!(
        "\nSummary: {}/{} passed",
        summary.passed(),
        summary.outcomes.len()
    ));
    let (fail, err, timeout) = (
        summary.count(Verdict::Fail),
        summary.count(Verdict::Error),
        summary.count(Verdict::Timeout),
    );
    if fail + err + timeout > 0 {
        out.push_str(&format!(" ({fail} failed, {err} errored, {timeout} timed out)"));
    }
    out.push_str(&format!(" in {}ms\n", summary.duration_ms));
    out
}

fn push_capture(out: &mut String, outcome: &TestOutcome) {
    out.push_str("UART output:\n");
    out.push_str(&"-".repeat(40));
    out.push('\n');
    out.push_str(&outcome.captured);
    if !outcome.captured.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&"-".repeat(40));
    out.push('\n');
}

// ── machine-readable report ───────────────────────────────────────────────

/// One work item's record in the CI report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportRecord {
    pub project: String,
    pub core: String,
    pub description: String,
    pub verdict: Verdict,
    pub duration_ms: u64,
    pub cycles: Option<u64>,
    pub message: String,
}

/// Per-run report file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFile {
    pub run_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub success: bool,
    pub duration_ms: u64,
    pub records: Vec<ReportRecord>,
}

impl ReportFile {
    /// Project a summary into its report-file form.
    pub fn from_summary(summary: &Summary) -> Self {
        Self {
            run_id: summary.run_id,
            run_at: summary.run_at,
            total: summary.outcomes.len(),
            passed: summary.passed(),
            failed: summary.failed(),
            success: summary.success(),
            duration_ms: summary.duration_ms,
            records: summary
                .outcomes
                .iter()
                .map(|o| ReportRecord {
                    project: o.project.clone(),
                    core: o.core.clone(),
                    description: o.description.clone(),
                    verdict: o.verdict,
                    duration_ms: o.duration_ms,
                    cycles: o.cycles,
                    message: o.message.clone(),
                })
                .collect(),
        }
    }

    /// Serialize to pretty JSON and write to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let report_err = |e: std::io::Error| {
            RegressionError::Report(format!("cannot write {}: {e}", path.display()))
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(report_err)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(report_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(core: &str, verdict: Verdict, captured: &str) -> TestOutcome {
        TestOutcome {
            project: "hello-world".to_string(),
            core: core.to_string(),
            description: "banner".to_string(),
            verdict,
            captured: captured.to_string(),
            message: match verdict {
                Verdict::Pass => String::new(),
                _ => "expected output not found: [\"boot\"]".to_string(),
            },
            duration_ms: 40,
            cycles: Some(900),
        }
    }

    fn summary() -> Summary {
        Summary::aggregate(
            vec![
                outcome("picorv32", Verdict::Pass, "Hello\r\n"),
                outcome("femtorv", Verdict::Fail, ""),
                outcome("vexriscv", Verdict::Timeout, "partial"),
            ],
            123,
        )
    }

    #[test]
    fn test_aggregate_counts() {
        let s = summary();
        assert_eq!(s.passed(), 1);
        assert_eq!(s.failed(), 2);
        assert_eq!(s.count(Verdict::Fail), 1);
        assert_eq!(s.count(Verdict::Timeout), 1);
        assert!(!s.success());
        assert!(!s.is_empty());
    }

    #[test]
    fn test_all_pass_is_success() {
        let s = Summary::aggregate(vec![outcome("picorv32", Verdict::Pass, "ok")], 10);
        assert!(s.success());
    }

    #[test]
    fn test_console_has_per_item_lines_and_totals() {
        let text = render_console(&summary(), false);
        assert!(text.contains("✓ hello-world on picorv32 [banner]"));
        assert!(text.contains("✗ hello-world on femtorv [banner]"));
        assert!(text.contains("Summary: 1/3 passed"));
        assert!(text.contains("1 failed, 0 errored, 1 timed out"));
    }

    #[test]
    fn test_console_dumps_full_capture_for_failures() {
        let text = render_console(&summary(), false);
        // The timed-out item's partial output appears in the dump, and the
        // empty buffer of the failed item is shown as an empty dump rather
        // than omitted.
        assert!(text.contains("partial"));
        assert_eq!(text.matches("UART output:").count(), 2);
    }

    #[test]
    fn test_verbose_dumps_passing_capture() {
        let text = render_console(&summary(), true);
        assert!(text.contains("Hello\r\n"));
        assert_eq!(text.matches("UART output:").count(), 3);
    }

    #[test]
    fn test_report_file_projection() {
        let s = summary();
        let report = ReportFile::from_summary(&s);
        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 2);
        assert!(!report.success);
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.records[1].verdict, Verdict::Fail);
        assert_eq!(report.records[2].cycles, Some(900));
    }

    #[test]
    fn test_report_roundtrips_through_json() {
        let report = ReportFile::from_summary(&summary());
        let json = serde_json::to_string(&report).unwrap();
        let back: ReportFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.records, report.records);
        assert_eq!(back.run_id, report.run_id);
    }

    #[test]
    fn test_report_write_failure_is_report_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let err = ReportFile::from_summary(&summary())
            .write(&blocker.join("run.json"))
            .unwrap_err();
        assert!(matches!(err, RegressionError::Report(_)));
    }

    #[test]
    fn test_report_write_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("reports/run.json");
        ReportFile::from_summary(&summary()).write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"verdict\": \"TIMEOUT\""));
    }
}
