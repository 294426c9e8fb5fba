//! Deterministic classification of executor reports.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ExecutionReport, TestStatus};

static TEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)")
        .expect("test summary pattern should be valid")
});

/// Line prefixes that carry build noise rather than error content.
const NOISE_PREFIXES: [&str; 3] = ["[INFO]", "[main]", "[WARNING]"];
/// Per-run summary marker; the second occurrence restates earlier output.
const SUMMARY_MARKER: &str = "[ERROR] Tests run:";
/// Marker the build tool emits before its full-stack-trace hint.
const STACK_TRACE_MARKER: &str = "[ERROR] To see the full stack trace";

/// Status plus the diagnostic excerpt fed back into refinement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: TestStatus,
    pub diagnostics: String,
}

/// Parsed `Tests run: R, Failures: F, Errors: E, Skipped: S` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestSummary {
    pub run: u64,
    pub failures: u64,
    pub errors: u64,
    pub skipped: u64,
}

impl TestSummary {
    /// Tests that neither failed, errored nor were skipped. May be negative
    /// when the tool reports inconsistent counts.
    pub fn passed(&self) -> i128 {
        i128::from(self.run)
            - i128::from(self.failures)
            - i128::from(self.errors)
            - i128::from(self.skipped)
    }
}

/// Classify an executor report into a [`Verdict`].
///
/// - compile failure → `FailCompile` with the compile log excerpt.
/// - execute failure → `Success` if the summary shows at least one passing
///   test, `FailPass` if any assertion failed, `FailExecute` otherwise
///   (including a missing summary).
/// - both succeeded → `Success`.
///
/// Excerpts are capped at `line_cap` lines after noise filtering.
pub fn classify_report(report: &ExecutionReport, line_cap: usize) -> Verdict {
    if !report.compile_succeeded {
        return Verdict {
            status: TestStatus::FailCompile,
            diagnostics: cap_lines(&extract_diagnostics(&report.compile_log), line_cap),
        };
    }
    if report.execute_succeeded {
        return Verdict {
            status: TestStatus::Success,
            diagnostics: String::new(),
        };
    }

    let diagnostics = cap_lines(&extract_diagnostics(&report.execute_log), line_cap);
    match parse_test_summary(&report.execute_log) {
        Some(summary) if summary.passed() > 0 => Verdict {
            status: TestStatus::Success,
            diagnostics: String::new(),
        },
        Some(summary) if summary.failures > 0 => Verdict {
            status: TestStatus::FailPass,
            diagnostics,
        },
        _ => Verdict {
            status: TestStatus::FailExecute,
            diagnostics,
        },
    }
}

/// First test summary line in `log`, if any.
pub fn parse_test_summary(log: &str) -> Option<TestSummary> {
    let caps = TEST_SUMMARY.captures(log)?;
    let field = |idx: usize| caps.get(idx)?.as_str().parse::<u64>().ok();
    Some(TestSummary {
        run: field(1)?,
        failures: field(2)?,
        errors: field(3)?,
        skipped: field(4)?,
    })
}

/// Drop noise lines and stop at the stack-trace hint or the second summary.
pub fn extract_diagnostics(log: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut seen_summary = false;

    for line in log.split('\n') {
        let trimmed = line.trim();
        if NOISE_PREFIXES
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
        {
            continue;
        }
        if trimmed.starts_with(SUMMARY_MARKER) {
            if seen_summary {
                break;
            }
            seen_summary = true;
        }
        if trimmed.starts_with(STACK_TRACE_MARKER) {
            break;
        }
        kept.push(line);
    }

    kept.join("\n")
}

fn cap_lines(text: &str, line_cap: usize) -> String {
    text.split('\n')
        .take(line_cap)
        .collect::<Vec<_>>()
        .join("\n")
}
