//! Path policy tables derived from the active phase.
//!
//! Policies are compiled once per (phase, glob set) and evaluated in memory;
//! permission checks never touch disk.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;

use crate::core::types::Phase;

/// Build-manifest files writable in GREEN alongside production sources.
pub const BUILD_MANIFEST_GLOBS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
];

/// Documentation paths writable in REFACTOR.
pub const DOC_GLOBS: &[&str] = &["docs/**", "**/*.md"];

/// The tool's own state directory; always writable regardless of phase.
pub const TOOLING_GLOBS: &[&str] = &[".guard/**"];

/// Allow/deny pattern sets for one phase.
///
/// Deny patterns are evaluated first and short-circuit. If no deny matches,
/// membership in the allow list is required: an empty allow list denies by
/// default, except when both lists are empty (the idle allow-all case).
#[derive(Debug, Clone)]
pub struct PathPolicy {
    pub phase: Phase,
    pub allowed_patterns: Vec<String>,
    pub denied_patterns: Vec<String>,
    allow: GlobSet,
    deny: GlobSet,
}

impl PathPolicy {
    fn new(phase: Phase, allowed: Vec<String>, denied: Vec<String>) -> Result<Self> {
        let allow = compile(&allowed)?;
        let deny = compile(&denied)?;
        Ok(Self {
            phase,
            allowed_patterns: allowed,
            denied_patterns: denied,
            allow,
            deny,
        })
    }

    /// Evaluate a normalized path against this policy.
    pub fn permits(&self, normalized: &str) -> bool {
        if self.deny.is_match(normalized) {
            return false;
        }
        if self.allowed_patterns.is_empty() && self.denied_patterns.is_empty() {
            return true;
        }
        self.allow.is_match(normalized)
    }
}

/// Precompiled policies for all phases plus the always-allowed tooling set.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<Phase, PathPolicy>,
    tooling: GlobSet,
}

impl PolicyTable {
    /// Compile the per-phase tables from a project's test and source globs.
    ///
    /// | Phase    | Allowed                    | Denied        |
    /// |----------|----------------------------|---------------|
    /// | RED      | test globs                 | source globs  |
    /// | GREEN    | source + build manifests   | test globs    |
    /// | REFACTOR | source + docs              | test globs    |
    /// | READY    | tooling-config paths only  | (deny-by-default) |
    pub fn compile(test_globs: &[String], source_globs: &[String]) -> Result<Self> {
        let tests = test_globs.to_vec();
        let sources = source_globs.to_vec();

        let mut policies = HashMap::new();
        policies.insert(
            Phase::Red,
            PathPolicy::new(Phase::Red, tests.clone(), sources.clone())?,
        );
        policies.insert(
            Phase::Green,
            PathPolicy::new(
                Phase::Green,
                merged(&sources, BUILD_MANIFEST_GLOBS),
                tests.clone(),
            )?,
        );
        policies.insert(
            Phase::Refactor,
            PathPolicy::new(Phase::Refactor, merged(&sources, DOC_GLOBS), tests)?,
        );
        policies.insert(
            Phase::Ready,
            PathPolicy::new(
                Phase::Ready,
                TOOLING_GLOBS.iter().map(|s| s.to_string()).collect(),
                Vec::new(),
            )?,
        );

        Ok(Self {
            policies,
            tooling: compile(&TOOLING_GLOBS.iter().map(|s| s.to_string()).collect::<Vec<_>>())?,
        })
    }

    pub fn policy(&self, phase: Phase) -> &PathPolicy {
        // All four phases are inserted in compile().
        &self.policies[&phase]
    }

    /// True for the tool's own state paths, writable in every phase.
    pub fn is_tooling_path(&self, normalized: &str) -> bool {
        self.tooling.is_match(normalized)
    }
}

fn merged(base: &[String], extra: &[&str]) -> Vec<String> {
    let mut out = base.to_vec();
    out.extend(extra.iter().map(|s| s.to_string()));
    out
}

fn compile(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{pattern}'"))?);
    }
    builder.build().context("compile glob set")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::default_policy_table;

    #[test]
    fn red_allows_tests_and_denies_sources() {
        let table = default_policy_table();
        let policy = table.policy(Phase::Red);

        assert!(policy.permits("tests/foo_test.go"));
        assert!(policy.permits("foo.spec.ts"));
        assert!(!policy.permits("src/Foo.go"));
    }

    #[test]
    fn green_allows_sources_and_manifests_denies_tests() {
        let table = default_policy_table();
        let policy = table.policy(Phase::Green);

        assert!(policy.permits("src/lib.rs"));
        assert!(policy.permits("Cargo.toml"));
        assert!(!policy.permits("tests/foo_test.go"));
    }

    #[test]
    fn refactor_allows_docs_but_protects_tests() {
        let table = default_policy_table();
        let policy = table.policy(Phase::Refactor);

        assert!(policy.permits("src/lib.rs"));
        assert!(policy.permits("docs/design.md"));
        assert!(!policy.permits("tests/foo_test.go"));
    }

    #[test]
    fn ready_only_allows_tooling_paths() {
        let table = default_policy_table();
        let policy = table.policy(Phase::Ready);

        assert!(policy.permits(".guard/state/profile.toml"));
        assert!(!policy.permits("src/lib.rs"));
        assert!(!policy.permits("README.txt"));
    }

    /// Deny patterns win over allow patterns when both match.
    #[test]
    fn deny_takes_precedence_over_allow() {
        let policy = PathPolicy::new(
            Phase::Red,
            vec!["tests/**".to_string()],
            vec!["tests/fixtures/**".to_string()],
        )
        .expect("policy");

        assert!(policy.permits("tests/foo_test.rs"));
        assert!(!policy.permits("tests/fixtures/golden.json"));
    }

    /// Both lists empty means allow-all (the idle case).
    #[test]
    fn empty_policy_permits_everything() {
        let policy = PathPolicy::new(Phase::Ready, Vec::new(), Vec::new()).expect("policy");
        assert!(policy.permits("anything/at/all.txt"));
    }
}
