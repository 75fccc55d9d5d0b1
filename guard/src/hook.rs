//! Pre-write hook: JSON request on stdin, permission decision on stdout.
//!
//! The hook runs as a short-lived process invoked before every candidate
//! file write. It reads the phase snapshot, evaluates the path against the
//! compiled policy, and answers synchronously; it never waits on a test run.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::core::guard;
use crate::core::policy::PolicyTable;
use crate::core::types::{GuardDecision, Phase};
use crate::io::config::load_profile;
use crate::io::state_store::{StatePaths, load_phase_state};
use crate::workspace::WorkspaceManager;

/// Decision payload emitted on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResponse {
    pub permission_decision: String,
    pub permission_decision_reason: String,
}

impl From<GuardDecision> for HookResponse {
    fn from(decision: GuardDecision) -> Self {
        Self {
            permission_decision: if decision.allowed { "allow" } else { "deny" }.to_string(),
            permission_decision_reason: decision.reason,
        }
    }
}

/// Handle one pre-write request for the project at `root`.
///
/// The candidate path is read from `toolInput.file_path`, tolerating the
/// `tool_input`/`path`/`file`/`files[0]` spellings different tools use.
/// Requests without a file target are allowed (e.g. a plain shell command).
/// Malformed JSON is an explicit error, not a silent allow.
pub fn handle_request(root: &Path, input: &str) -> Result<HookResponse> {
    let request: Value = serde_json::from_str(input).context("parse hook request json")?;

    let Some(raw_path) = extract_file_path(&request) else {
        return Ok(HookResponse {
            permission_decision: "allow".to_string(),
            permission_decision_reason: "no-target-file".to_string(),
        });
    };
    let candidate = relativize(root, &raw_path);

    let paths = StatePaths::new(root);
    let profile = load_profile(&paths.profile_path)?;
    let table = PolicyTable::compile(&profile.test_globs, &profile.source_globs)?;
    let phase = enforced_phase(root)?;
    let decision = guard::check(&table, phase, &candidate);
    debug!(path = %candidate, allowed = decision.allowed, "guard decision");

    if decision.allowed && phase.is_some() && decision.reason != "system-config-file" {
        // Track which files the feature touched; best-effort only, a
        // bookkeeping failure must not flip an allow into an error.
        if let Ok(manager) = WorkspaceManager::open(root) {
            let _ = manager.record_file_touch(&guard::normalize_path(&candidate));
        }
    }

    Ok(decision.into())
}

/// Phase to enforce for writes. `None` (fail open) only when no feature is
/// active; a feature idling in READY still restricts writes to tooling paths.
pub fn enforced_phase(root: &Path) -> Result<Option<Phase>> {
    let paths = StatePaths::new(root);
    let Some(state) = load_phase_state(&paths.phase_path)? else {
        return Ok(None);
    };
    if state.feature_id.is_none() {
        return Ok(None);
    }
    Ok(Some(state.current_phase))
}

fn extract_file_path(request: &Value) -> Option<String> {
    let tool_input = request
        .get("toolInput")
        .or_else(|| request.get("tool_input"))?;
    for key in ["file_path", "path", "file"] {
        if let Some(path) = tool_input.get(key).and_then(Value::as_str) {
            return Some(path.to_string());
        }
    }
    tool_input
        .get("files")
        .and_then(Value::as_array)
        .and_then(|files| files.first())
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Tools usually pass absolute paths; match them against the project-relative
/// policy globs by stripping the root prefix.
fn relativize(root: &Path, raw: &str) -> String {
    let path = Path::new(raw);
    if path.is_absolute()
        && let Ok(rel) = path.strip_prefix(root)
    {
        return rel.to_string_lossy().into_owned();
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceManager;

    fn request_for(path: &str) -> String {
        serde_json::json!({ "toolInput": { "file_path": path } }).to_string()
    }

    /// With a feature in RED, a source write is denied with the phase named.
    #[test]
    fn denies_source_write_in_red() {
        let temp = tempfile::tempdir().expect("tempdir");
        let m = WorkspaceManager::open(temp.path()).expect("open");
        m.create_feature("a", "", "").expect("create");

        let response = handle_request(temp.path(), &request_for("src/Foo.go")).expect("hook");
        assert_eq!(response.permission_decision, "deny");
        assert!(response.permission_decision_reason.contains("RED"));
        assert!(response.permission_decision_reason.contains("tests/**"));
    }

    /// Allowed test writes are recorded against the feature.
    #[test]
    fn allows_test_write_in_red_and_records_touch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let m = WorkspaceManager::open(temp.path()).expect("open");
        m.create_feature("a", "", "").expect("create");
        drop(m);

        let response =
            handle_request(temp.path(), &request_for("tests/foo_test.go")).expect("hook");
        assert_eq!(response.permission_decision, "allow");

        let reopened = WorkspaceManager::open(temp.path()).expect("reopen");
        let ws = reopened.snapshot();
        assert_eq!(
            ws.features.get("a").expect("feature").test_files,
            vec!["tests/foo_test.go".to_string()]
        );
    }

    /// No phase state at all fails open.
    #[test]
    fn allows_everything_without_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let response = handle_request(temp.path(), &request_for("src/Foo.go")).expect("hook");
        assert_eq!(response.permission_decision, "allow");
    }

    #[test]
    fn allows_requests_without_file_target() {
        let temp = tempfile::tempdir().expect("tempdir");
        let response =
            handle_request(temp.path(), r#"{"toolInput": {"command": "ls"}}"#).expect("hook");
        assert_eq!(response.permission_decision, "allow");
        assert_eq!(response.permission_decision_reason, "no-target-file");
    }

    #[test]
    fn tolerates_alternate_field_spellings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let m = WorkspaceManager::open(temp.path()).expect("open");
        m.create_feature("a", "", "").expect("create");
        drop(m);

        let snake = r#"{"tool_input": {"path": "src/Foo.go"}}"#;
        let response = handle_request(temp.path(), snake).expect("hook");
        assert_eq!(response.permission_decision, "deny");

        let files = r#"{"toolInput": {"files": ["tests/a_test.rs"]}}"#;
        let response = handle_request(temp.path(), files).expect("hook");
        assert_eq!(response.permission_decision, "allow");
    }

    /// Absolute paths under the root are matched project-relative.
    #[test]
    fn absolute_paths_are_relativized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let m = WorkspaceManager::open(temp.path()).expect("open");
        m.create_feature("a", "", "").expect("create");
        drop(m);

        let abs = temp.path().join("src/Foo.go");
        let response =
            handle_request(temp.path(), &request_for(&abs.to_string_lossy())).expect("hook");
        assert_eq!(response.permission_decision, "deny");
    }

    /// The guard's own state files stay writable in every phase.
    #[test]
    fn system_config_paths_always_allowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let m = WorkspaceManager::open(temp.path()).expect("open");
        m.create_feature("a", "", "").expect("create");
        drop(m);

        let response =
            handle_request(temp.path(), &request_for(".guard/state/profile.toml")).expect("hook");
        assert_eq!(response.permission_decision, "allow");
        assert_eq!(response.permission_decision_reason, "system-config-file");
    }

    #[test]
    fn malformed_json_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = handle_request(temp.path(), "not json").expect_err("expected error");
        assert!(err.to_string().contains("parse hook request json"));
    }

    /// Responses serialize with the camelCase protocol field names.
    #[test]
    fn response_uses_protocol_field_names() {
        let response = HookResponse {
            permission_decision: "deny".to_string(),
            permission_decision_reason: "nope".to_string(),
        };
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["permissionDecision"], "deny");
        assert_eq!(value["permissionDecisionReason"], "nope");
    }
}
