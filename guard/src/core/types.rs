//! Shared deterministic types for guard core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// TDD phase for a feature. `Ready` is the initial/idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Ready,
    Red,
    Green,
    Refactor,
}

impl Phase {
    /// All phases, in canonical cycle order starting at `Ready`.
    pub const ALL: [Phase; 4] = [Phase::Ready, Phase::Red, Phase::Green, Phase::Refactor];

    /// Parse a phase name (case-insensitive). Rejects anything outside the
    /// four known phases before any state is touched.
    pub fn parse(name: &str) -> Result<Self, InvalidPhase> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ready" => Ok(Phase::Ready),
            "red" => Ok(Phase::Red),
            "green" => Ok(Phase::Green),
            "refactor" => Ok(Phase::Refactor),
            _ => Err(InvalidPhase {
                name: name.to_string(),
            }),
        }
    }

    /// Display name used in guard reasons and advisory text.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Ready => "READY",
            Phase::Red => "RED",
            Phase::Green => "GREEN",
            Phase::Refactor => "REFACTOR",
        }
    }

    /// Next phase in the canonical READY→RED→GREEN→REFACTOR→RED cycle.
    pub fn canonical_next(self) -> Phase {
        match self {
            Phase::Ready => Phase::Red,
            Phase::Red => Phase::Green,
            Phase::Green => Phase::Refactor,
            Phase::Refactor => Phase::Red,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error: phase name is not one of READY/RED/GREEN/REFACTOR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPhase {
    pub name: String,
}

impl fmt::Display for InvalidPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid phase '{}' (expected one of READY, RED, GREEN, REFACTOR)",
            self.name
        )
    }
}

impl std::error::Error for InvalidPhase {}

/// Result of a path permission check. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardDecision {
    pub allowed: bool,
    pub reason: String,
}

impl GuardDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Parsed pass/fail counts from test runner output.
///
/// Unrecognized output parses to the zeroed default rather than an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Phase-aware advisory derived from a completed test run.
///
/// `next_phase` is only set when the run outcome matches the current phase's
/// expectation (e.g. failing tests in RED). Warnings flag outcomes that
/// contradict the phase (passing tests in RED, broken tests in REFACTOR).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub phase: Phase,
    pub test_succeeded: bool,
    pub next_phase: Option<Phase>,
    pub actions: Vec<String>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_phases_case_insensitively() {
        assert_eq!(Phase::parse("red").expect("parse"), Phase::Red);
        assert_eq!(Phase::parse("GREEN").expect("parse"), Phase::Green);
        assert_eq!(Phase::parse(" Refactor ").expect("parse"), Phase::Refactor);
        assert_eq!(Phase::parse("ready").expect("parse"), Phase::Ready);
    }

    #[test]
    fn parse_rejects_unknown_phase_names() {
        let err = Phase::parse("blue").expect_err("expected error");
        assert_eq!(err.name, "blue");
        assert!(err.to_string().contains("invalid phase 'blue'"));
    }

    #[test]
    fn canonical_cycle_loops_through_red() {
        assert_eq!(Phase::Ready.canonical_next(), Phase::Red);
        assert_eq!(Phase::Red.canonical_next(), Phase::Green);
        assert_eq!(Phase::Green.canonical_next(), Phase::Refactor);
        assert_eq!(Phase::Refactor.canonical_next(), Phase::Red);
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Phase::Refactor).expect("serialize"),
            "\"refactor\""
        );
    }
}
