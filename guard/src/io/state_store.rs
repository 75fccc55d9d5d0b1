//! Durable per-project JSON state: the phase-state file and the workspace file.
//!
//! All writes are atomic (temp file + rename). The workspace file is validated
//! against an embedded JSON Schema plus semantic invariants on load, so a
//! corrupted or hand-mangled file fails loudly instead of poisoning state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::core::types::Phase;
use crate::model::Workspace;

const WORKSPACE_SCHEMA: &str = include_str!("../../schemas/workspace.schema.json");

/// Well-known locations under a project root.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub state_dir: PathBuf,
    pub phase_path: PathBuf,
    pub workspace_path: PathBuf,
    pub profile_path: PathBuf,
}

impl StatePaths {
    pub fn new(root: &Path) -> Self {
        let state_dir = root.join(".guard").join("state");
        Self {
            phase_path: state_dir.join("phase.json"),
            workspace_path: state_dir.join("workspace.json"),
            profile_path: state_dir.join("profile.toml"),
            state_dir,
        }
    }
}

/// One closed phase interval in the phase-state file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPhase {
    pub phase: Phase,
    pub end_time: DateTime<Utc>,
}

/// Compact phase snapshot (`.guard/state/phase.json`) consumed by the
/// pre-write hook and the verification loop on every check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    pub current_phase: Phase,
    pub feature_id: Option<String>,
    /// Last time this file was written.
    pub timestamp: DateTime<Utc>,
    /// When the current phase was entered.
    pub phase_start_time: DateTime<Utc>,
    #[serde(default)]
    pub phase_history: Vec<ClosedPhase>,
    pub previous_phase: Option<Phase>,
}

/// Load the phase snapshot. `Ok(None)` when the file does not exist yet.
pub fn load_phase_state(path: &Path) -> Result<Option<PhaseState>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read phase state {}", path.display()))?;
    let state: PhaseState = serde_json::from_str(&contents)
        .with_context(|| format!("parse phase state {}", path.display()))?;
    debug!(phase = %state.current_phase, feature = ?state.feature_id, "phase state loaded");
    Ok(Some(state))
}

/// Atomically write the phase snapshot.
pub fn write_phase_state(path: &Path, state: &PhaseState) -> Result<()> {
    debug!(path = %path.display(), phase = %state.current_phase, "writing phase state");
    write_json_atomic(path, state)
}

/// Load and validate the workspace file (schema + invariants).
pub fn load_workspace(path: &Path) -> Result<Workspace> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read workspace {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse workspace {}", path.display()))?;
    validate_schema(&value)?;
    let workspace: Workspace = serde_json::from_value(value)
        .with_context(|| format!("deserialize workspace {}", path.display()))?;
    validate_workspace_invariants(&workspace)?;
    Ok(workspace)
}

/// Atomically write the workspace file.
pub fn write_workspace(path: &Path, workspace: &Workspace) -> Result<()> {
    debug!(path = %path.display(), features = workspace.features.len(), "writing workspace");
    write_json_atomic(path, workspace)
}

fn validate_schema(workspace: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(WORKSPACE_SCHEMA).context("parse embedded workspace schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(workspace) {
        let messages = compiled
            .iter_errors(workspace)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "workspace schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn validate_workspace_invariants(workspace: &Workspace) -> Result<()> {
    let errors = validate_invariants(workspace);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("workspace invariants failed: {}", errors.join("; ")))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::default_workspace;
    use crate::test_support::{feature, fixed_time};

    /// Verifies write → load preserves all workspace fields.
    #[test]
    fn workspace_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workspace.json");

        let mut ws = default_workspace(fixed_time());
        ws.features.insert("login".to_string(), feature("login", Phase::Red));
        ws.current_feature_id = Some("login".to_string());

        write_workspace(&path, &ws).expect("write");
        let loaded = load_workspace(&path).expect("load");
        assert_eq!(loaded, ws);
    }

    #[test]
    fn load_rejects_schema_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workspace.json");
        fs::write(&path, r#"{"features": {}, "completedFeatures": "oops"}"#).expect("write");

        let err = load_workspace(&path).expect_err("expected schema failure");
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn load_rejects_invariant_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workspace.json");

        let mut ws = default_workspace(fixed_time());
        ws.current_feature_id = Some("ghost".to_string());
        // Bypass write-side validation by serializing directly.
        let payload = serde_json::to_string_pretty(&ws).expect("serialize");
        fs::write(&path, payload).expect("write");

        let err = load_workspace(&path).expect_err("expected invariant failure");
        assert!(err.to_string().contains("workspace invariants failed"));
    }

    #[test]
    fn phase_state_round_trips_and_missing_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("phase.json");

        assert!(load_phase_state(&path).expect("load missing").is_none());

        let now = fixed_time();
        let state = PhaseState {
            current_phase: Phase::Green,
            feature_id: Some("login".to_string()),
            timestamp: now,
            phase_start_time: now,
            phase_history: vec![ClosedPhase {
                phase: Phase::Red,
                end_time: now,
            }],
            previous_phase: Some(Phase::Red),
        };
        write_phase_state(&path, &state).expect("write");
        let loaded = load_phase_state(&path).expect("load").expect("some");
        assert_eq!(loaded, state);
    }

    #[test]
    fn state_paths_are_stable() {
        let paths = StatePaths::new(Path::new("/proj"));
        assert!(paths.phase_path.ends_with(".guard/state/phase.json"));
        assert!(paths.workspace_path.ends_with(".guard/state/workspace.json"));
        assert!(paths.profile_path.ends_with(".guard/state/profile.toml"));
    }
}
