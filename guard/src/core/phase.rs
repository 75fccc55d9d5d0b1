//! Phase transition rules for features.

use chrono::{DateTime, Utc};

use crate::core::types::Phase;
use crate::model::{Feature, PhaseTransitionRecord};

/// Result of applying a phase switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub from: Phase,
    pub to: Phase,
    /// Advisory warning when the transition leaves the canonical
    /// RED→GREEN→REFACTOR cycle. Never blocks the switch: practitioners
    /// legitimately jump phases (e.g. abandoning a RED test to restart).
    pub non_canonical: Option<String>,
}

/// Apply a phase switch to `feature`.
///
/// Closes the currently open history record (`completed_at = now`), appends a
/// new open record, and updates `current_phase`. The first transition of a
/// feature with no history may go to any phase without a warning.
pub fn switch_phase(feature: &mut Feature, target: Phase, now: DateTime<Utc>) -> SwitchOutcome {
    let from = feature.current_phase;
    let had_history = !feature.history.is_empty();

    if let Some(open) = feature.history.last_mut()
        && open.completed_at.is_none()
    {
        open.completed_at = Some(now);
    }

    feature.history.push(PhaseTransitionRecord {
        from_phase: from,
        to_phase: target,
        started_at: now,
        completed_at: None,
        feature: feature.id.clone(),
    });
    feature.current_phase = target;

    let non_canonical = if had_history && target != from.canonical_next() {
        Some(format!(
            "non-canonical transition {from} -> {target} (canonical next after {from} is {})",
            from.canonical_next()
        ))
    } else {
        None
    };

    SwitchOutcome {
        from,
        to: target,
        non_canonical,
    }
}

/// Short advisory guidance surfaced on phase switches and in status output.
pub fn recommendations(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::Ready => &["create a feature and switch to RED to start a TDD cycle"],
        Phase::Red => &[
            "write test code only, no production code",
            "make sure the new test fails for the right reason",
            "test one behavior at a time",
        ],
        Phase::Green => &[
            "write production code only, no test edits",
            "write the minimum code that makes the test pass",
        ],
        Phase::Refactor => &[
            "keep the tests passing",
            "improve structure and remove duplication without changing behavior",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature, fixed_time};
    use chrono::Duration;

    /// A switch closes the open record and appends a new chained one.
    #[test]
    fn switch_closes_previous_record_and_appends_open_one() {
        let t0 = fixed_time();
        let t1 = t0 + Duration::seconds(10);
        let mut f = feature("login", Phase::Red);

        switch_phase(&mut f, Phase::Green, t0);
        let outcome = switch_phase(&mut f, Phase::Refactor, t1);

        assert_eq!(outcome.from, Phase::Green);
        assert_eq!(outcome.to, Phase::Refactor);
        assert_eq!(f.current_phase, Phase::Refactor);
        assert_eq!(f.history.len(), 2);
        assert_eq!(f.history[0].completed_at, Some(t1));
        assert_eq!(f.history[1].completed_at, None);
        assert_eq!(f.history[0].to_phase, f.history[1].from_phase);
    }

    #[test]
    fn canonical_transition_carries_no_warning() {
        let t = fixed_time();
        let mut f = feature("login", Phase::Red);
        switch_phase(&mut f, Phase::Green, t);

        let outcome = switch_phase(&mut f, Phase::Refactor, t + Duration::seconds(1));
        assert_eq!(outcome.non_canonical, None);
    }

    /// Jumping back from REFACTOR to GREEN succeeds but warns.
    #[test]
    fn non_canonical_transition_warns_but_applies() {
        let t = fixed_time();
        let mut f = feature("login", Phase::Refactor);
        switch_phase(&mut f, Phase::Red, t);

        let outcome = switch_phase(&mut f, Phase::Refactor, t + Duration::seconds(1));
        assert_eq!(f.current_phase, Phase::Refactor);
        let warning = outcome.non_canonical.expect("expected warning");
        assert!(warning.contains("RED -> REFACTOR"));
        assert!(warning.contains("GREEN"));
    }

    /// A fresh feature may open in any phase without a warning.
    #[test]
    fn first_transition_goes_anywhere_without_warning() {
        let mut f = feature("login", Phase::Ready);
        f.history.clear();

        let outcome = switch_phase(&mut f, Phase::Refactor, fixed_time());
        assert_eq!(outcome.non_canonical, None);
        assert_eq!(f.current_phase, Phase::Refactor);
        assert_eq!(f.history.len(), 1);
    }

    #[test]
    fn history_timestamps_are_monotonic() {
        let t0 = fixed_time();
        let mut f = feature("login", Phase::Red);
        for (i, target) in [Phase::Green, Phase::Refactor, Phase::Red].iter().enumerate() {
            switch_phase(&mut f, *target, t0 + Duration::seconds(i as i64));
        }

        for pair in f.history.windows(2) {
            assert!(pair[0].started_at <= pair[1].started_at);
            assert_eq!(pair[0].to_phase, pair[1].from_phase);
        }
    }
}
