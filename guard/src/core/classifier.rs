//! Test-output parsing and phase-aware run classification.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Phase, Suggestion, TestSummary};

static JUNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests run: (\d+), Failures: (\d+), Errors: (\d+)(?:, Skipped: (\d+))?").unwrap()
});
static JEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests:\s+(?:(\d+) failed, )?(\d+) passed, (\d+) total").unwrap()
});
static CARGO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: (?:ok|FAILED)\. (\d+) passed; (\d+) failed; (\d+) ignored").unwrap()
});
static PYTEST_FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=+ (\d+) failed, (\d+) passed").unwrap());
static PYTEST_PASSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=+ (\d+) passed in").unwrap());

/// Parse framework-specific pass/fail counts from captured test output.
///
/// Known patterns are tried in order over stdout then stderr; the first match
/// wins. Unrecognized output yields a zeroed summary rather than an error so
/// a run with an exotic runner still records its exit status.
pub fn parse_test_output(stdout: &str, stderr: &str) -> TestSummary {
    for text in [stdout, stderr] {
        if let Some(summary) = parse_single(text) {
            return summary;
        }
    }
    TestSummary::default()
}

fn parse_single(text: &str) -> Option<TestSummary> {
    if let Some(caps) = JUNIT_RE.captures(text) {
        let total = num(&caps, 1);
        let failed = num(&caps, 2) + num(&caps, 3);
        let skipped = num(&caps, 4);
        return Some(TestSummary {
            total,
            passed: total.saturating_sub(failed + skipped),
            failed,
            skipped,
        });
    }
    if let Some(caps) = JEST_RE.captures(text) {
        return Some(TestSummary {
            total: num(&caps, 3),
            passed: num(&caps, 2),
            failed: num(&caps, 1),
            skipped: 0,
        });
    }
    if let Some(caps) = CARGO_RE.captures(text) {
        let passed = num(&caps, 1);
        let failed = num(&caps, 2);
        let skipped = num(&caps, 3);
        return Some(TestSummary {
            total: passed + failed + skipped,
            passed,
            failed,
            skipped,
        });
    }
    if let Some(caps) = PYTEST_FAILED_RE.captures(text) {
        let failed = num(&caps, 1);
        let passed = num(&caps, 2);
        return Some(TestSummary {
            total: failed + passed,
            passed,
            failed,
            skipped: 0,
        });
    }
    if let Some(caps) = PYTEST_PASSED_RE.captures(text) {
        let passed = num(&caps, 1);
        return Some(TestSummary {
            total: passed,
            passed,
            failed: 0,
            skipped: 0,
        });
    }
    None
}

fn num(caps: &regex::Captures<'_>, group: usize) -> u32 {
    caps.get(group)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Classify a run outcome against the current phase.
///
/// - RED expects failure: success is a warning, failure suggests GREEN.
/// - GREEN expects success: success suggests REFACTOR, failure means keep going.
/// - REFACTOR expects success: failure is a warning (the refactor broke tests).
pub fn classify(phase: Phase, test_succeeded: bool) -> Suggestion {
    let mut suggestion = Suggestion {
        phase,
        test_succeeded,
        next_phase: None,
        actions: Vec::new(),
        warnings: Vec::new(),
    };

    match (phase, test_succeeded) {
        (Phase::Red, true) => {
            suggestion
                .warnings
                .push("RED tests must fail; check that the new test exercises missing behavior".to_string());
        }
        (Phase::Red, false) => {
            suggestion.next_phase = Some(Phase::Green);
            suggestion
                .actions
                .push("tests fail as expected; switch to GREEN and implement".to_string());
        }
        (Phase::Green, true) => {
            suggestion.next_phase = Some(Phase::Refactor);
            suggestion
                .actions
                .push("tests pass; switch to REFACTOR to clean up".to_string());
        }
        (Phase::Green, false) => {
            suggestion
                .actions
                .push("tests still failing; keep implementing until they pass".to_string());
        }
        (Phase::Refactor, true) => {
            suggestion
                .actions
                .push("tests stayed green; safe to continue or start a new RED".to_string());
        }
        (Phase::Refactor, false) => {
            suggestion
                .warnings
                .push("refactor broke tests; revert or fix before continuing".to_string());
        }
        (Phase::Ready, _) => {
            suggestion
                .actions
                .push("no TDD cycle active; create a feature and switch to RED".to_string());
        }
    }

    suggestion
}
