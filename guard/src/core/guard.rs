//! Phase-aware path permission checks.
//!
//! `check` is a pure function of (phase, normalized path, policy table): no
//! side effects, safe to call concurrently, and never blocked by disk I/O or
//! an in-flight test run.

use crate::core::policy::PolicyTable;
use crate::core::types::{GuardDecision, Phase};

/// Normalize a candidate path before matching: backslashes become `/` and
/// leading `./` segments are stripped.
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.replace('\\', "/");
    while let Some(stripped) = path.strip_prefix("./") {
        path = stripped.to_string();
    }
    path
}

/// Decide whether the current phase permits writing `raw_path`.
///
/// `phase = None` means no feature is active; the guard fails open so idle
/// tooling is never blocked. Tooling-config paths (the guard's own state
/// directory) are allowed regardless of phase. On deny, the reason names the
/// violated phase and the allowed-pattern set verbatim.
pub fn check(table: &PolicyTable, phase: Option<Phase>, raw_path: &str) -> GuardDecision {
    let path = normalize_path(raw_path);

    if table.is_tooling_path(&path) {
        return GuardDecision::allow("system-config-file");
    }

    let Some(phase) = phase else {
        return GuardDecision::allow("no active TDD phase");
    };

    let policy = table.policy(phase);
    if policy.permits(&path) {
        return GuardDecision::allow(format!("{} phase permits '{path}'", phase.as_str()));
    }

    GuardDecision::deny(deny_reason(phase, &path, &policy.allowed_patterns))
}

/// Deny reason format. Kept in one place: the exact string (phase name plus
/// the allowed-pattern set) is a contract consumed by the pre-write hook.
fn deny_reason(phase: Phase, path: &str, allowed: &[String]) -> String {
    format!(
        "{} phase does not permit writing '{path}'; allowed paths: {}",
        phase.as_str(),
        allowed.join(", ")
    )
}
