//! Test-only helpers for constructing workspace state and scripted runners.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};

use crate::core::policy::PolicyTable;
use crate::core::types::Phase;
use crate::io::config::ProjectProfile;
use crate::model::{Feature, FeatureStatus, PhaseTransitionRecord};
use crate::verify::{TestInvocation, TestRequest, TestRunner};

/// Deterministic timestamp for state constructed in tests.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Deterministic feature in `phase` with a consistent opening history record.
pub fn feature(id: &str, phase: Phase) -> Feature {
    let now = fixed_time();
    let history = if phase == Phase::Ready {
        Vec::new()
    } else {
        vec![PhaseTransitionRecord {
            from_phase: Phase::Ready,
            to_phase: phase,
            started_at: now,
            completed_at: None,
            feature: id.to_string(),
        }]
    };
    Feature {
        id: id.to_string(),
        title: format!("{id} title"),
        description: format!("{id} description"),
        current_phase: phase,
        history,
        status: FeatureStatus::Active,
        created_at: now,
        completed_at: None,
        test_files: Vec::new(),
        impl_files: Vec::new(),
    }
}

/// Policy table compiled from the default profile globs.
pub fn default_policy_table() -> PolicyTable {
    let profile = ProjectProfile::default();
    PolicyTable::compile(&profile.test_globs, &profile.source_globs)
        .expect("compile default policy table")
}

/// Invocation shaped like a fully passing cargo test run.
pub fn passing_invocation() -> TestInvocation {
    TestInvocation {
        exit_status: Some(0),
        success: true,
        stdout: "test result: ok. 3 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out\n"
            .to_string(),
        stderr: String::new(),
        timed_out: false,
    }
}

/// Invocation shaped like a cargo test run with one failure.
pub fn failing_invocation() -> TestInvocation {
    TestInvocation {
        exit_status: Some(101),
        success: false,
        stdout: "test result: FAILED. 2 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out\n"
            .to_string(),
        stderr: String::new(),
        timed_out: false,
    }
}

/// Test runner returning scripted invocations without spawning processes.
///
/// Outcomes are consumed in order; the final one repeats once the script is
/// exhausted. `calls` counts every invocation.
pub struct ScriptedTestRunner {
    outcomes: Mutex<Vec<TestInvocation>>,
    calls: AtomicUsize,
}

impl ScriptedTestRunner {
    pub fn new(outcomes: Vec<TestInvocation>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, _request: &TestRequest) -> Result<TestInvocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().expect("lock outcomes");
        if outcomes.len() > 1 {
            Ok(outcomes.remove(0))
        } else {
            Ok(outcomes.first().cloned().unwrap_or_else(passing_invocation))
        }
    }
}
