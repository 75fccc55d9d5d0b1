//! End-to-end verification loop test: file change → debounce → run → suggestion.
//!
//! Uses a real filesystem watcher with a scripted test runner, so timing
//! assertions stay tolerant of slow event delivery.

use std::fs;
use std::time::{Duration, Instant};

use guard::core::types::Phase;
use guard::io::config::ProjectProfile;
use guard::test_support::{ScriptedTestRunner, failing_invocation};
use guard::verify::Verifier;
use guard::workspace::WorkspaceManager;

#[test]
fn change_event_produces_phase_aware_suggestion() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    fs::create_dir_all(root.join("tests")).expect("mkdir tests");

    // A fresh feature opens in RED: failing tests should suggest GREEN.
    let manager = WorkspaceManager::open(root).expect("open workspace");
    manager.create_feature("login", "", "").expect("create feature");
    drop(manager);

    let profile = ProjectProfile {
        debounce_ms: 200,
        ..ProjectProfile::default()
    };
    let verifier = Verifier::new(ScriptedTestRunner::new(vec![failing_invocation()]));
    verifier.start_watching(root, &profile).expect("start watching");

    // Give the OS watcher time to register before writing.
    std::thread::sleep(Duration::from_millis(200));
    fs::write(
        root.join("tests/login_test.rs"),
        "#[test]\nfn rejects_bad_password() {\n    assert!(false);\n}\n",
    )
    .expect("write test file");

    let deadline = Instant::now() + Duration::from_secs(10);
    let record = loop {
        if let Some(record) = verifier.last_result(root) {
            break record;
        }
        assert!(
            Instant::now() < deadline,
            "no test run recorded within deadline"
        );
        std::thread::sleep(Duration::from_millis(100));
    };

    assert_eq!(record.phase, Phase::Red);
    assert!(!record.suggestion.test_succeeded);
    assert_eq!(record.suggestion.next_phase, Some(Phase::Green));
    assert_eq!(record.summary.failed, 1);

    verifier.stop_watching(root);
}
