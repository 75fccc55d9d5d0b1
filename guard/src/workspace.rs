//! Multi-feature workspace orchestration with write-through persistence.
//!
//! Every mutation is persisted before the call returns so state survives a
//! process crash between calls. A per-project mutex serializes all
//! read-modify-write cycles; disk writes themselves are atomic.

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::core::phase::{SwitchOutcome, switch_phase};
use crate::core::types::Phase;
use crate::io::state_store::{self, ClosedPhase, PhaseState, StatePaths};
use crate::model::{
    Feature, FeatureStatus, Workspace, default_workspace, normalize_feature_id,
};

/// Workspace misuse errors, recoverable by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    DuplicateFeature { id: String },
    UnknownFeature { id: String },
    NoActiveFeature,
}

impl fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceError::DuplicateFeature { id } => {
                write!(f, "feature '{id}' already exists")
            }
            WorkspaceError::UnknownFeature { id } => write!(f, "unknown feature '{id}'"),
            WorkspaceError::NoActiveFeature => write!(f, "no active feature"),
        }
    }
}

impl std::error::Error for WorkspaceError {}

/// Owns the in-memory workspace for one project root and writes it through to
/// `.guard/state/` on every mutation.
pub struct WorkspaceManager {
    paths: StatePaths,
    state: Mutex<Workspace>,
}

impl WorkspaceManager {
    /// Open the workspace for `root`, loading persisted state or starting empty.
    pub fn open(root: &Path) -> Result<Self> {
        let paths = StatePaths::new(root);
        let workspace = if paths.workspace_path.exists() {
            state_store::load_workspace(&paths.workspace_path)?
        } else {
            default_workspace(Utc::now())
        };
        Ok(Self {
            paths,
            state: Mutex::new(workspace),
        })
    }

    /// Create a feature and make it current. New features open in RED, the
    /// canonical entry point of the TDD cycle.
    pub fn create_feature(&self, id: &str, title: &str, description: &str) -> Result<Feature> {
        let now = Utc::now();
        let normalized = normalize_feature_id(id);
        if normalized.is_empty() {
            return Err(anyhow!("feature id must not be empty"));
        }

        let mut ws = self.lock_state();
        if ws.features.contains_key(&normalized)
            || ws.completed_feature_ids.contains(&normalized)
        {
            return Err(WorkspaceError::DuplicateFeature { id: normalized }.into());
        }

        let mut feature = Feature {
            id: normalized.clone(),
            title: if title.is_empty() { normalized.clone() } else { title.to_string() },
            description: description.to_string(),
            current_phase: Phase::Ready,
            history: Vec::new(),
            status: FeatureStatus::Active,
            created_at: now,
            completed_at: None,
            test_files: Vec::new(),
            impl_files: Vec::new(),
        };
        switch_phase(&mut feature, Phase::Red, now);

        ws.global_phase_history.push(feature.history[0].clone());
        ws.features.insert(normalized.clone(), feature.clone());
        ws.current_feature_id = Some(normalized.clone());
        self.persist(&mut ws, now);

        info!(feature = %normalized, "created feature");
        Ok(feature)
    }

    /// Make another existing feature current. A pure pointer move: the
    /// feature's phase and history are untouched.
    pub fn switch_feature(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        let normalized = normalize_feature_id(id);

        let mut ws = self.lock_state();
        if !ws.features.contains_key(&normalized) {
            return Err(WorkspaceError::UnknownFeature { id: normalized }.into());
        }
        ws.current_feature_id = Some(normalized.clone());
        self.persist(&mut ws, now);

        info!(feature = %normalized, "switched feature");
        Ok(())
    }

    /// Complete the current feature: its id moves to the completed set and no
    /// feature is current afterwards.
    pub fn complete_feature(&self) -> Result<String> {
        let now = Utc::now();
        let mut ws = self.lock_state();
        let id = ws
            .current_feature_id
            .clone()
            .ok_or(WorkspaceError::NoActiveFeature)?;
        // The invariant check on load guarantees the id keys the map.
        ws.features.remove(&id);
        ws.completed_feature_ids.push(id.clone());
        ws.current_feature_id = None;
        self.persist(&mut ws, now);

        info!(feature = %id, "completed feature");
        Ok(id)
    }

    /// Switch the current feature's phase. Non-canonical transitions succeed
    /// with a warning; fails with `NoActiveFeature` when no feature is current.
    pub fn switch_phase(&self, target: Phase) -> Result<SwitchOutcome> {
        let now = Utc::now();
        let mut ws = self.lock_state();

        let (outcome, record) = {
            let feature = ws
                .current_feature_mut()
                .ok_or(WorkspaceError::NoActiveFeature)?;
            let outcome = switch_phase(feature, target, now);
            let record = feature.history.last().cloned();
            (outcome, record)
        };
        if let Some(record) = record {
            ws.global_phase_history.push(record);
        }
        self.persist(&mut ws, now);

        if let Some(warning) = &outcome.non_canonical {
            warn!(%warning, "phase switch");
        }
        info!(from = %outcome.from, to = %outcome.to, "switched phase");
        Ok(outcome)
    }

    /// Record a guard-approved write against the current feature: test paths
    /// in RED, implementation paths in GREEN/REFACTOR. Returns false when
    /// nothing was recorded (no active feature, idle feature, or a path
    /// already tracked).
    pub fn record_file_touch(&self, path: &str) -> Result<bool> {
        let now = Utc::now();
        let mut ws = self.lock_state();

        let recorded = {
            let Some(feature) = ws.current_feature_mut() else {
                return Ok(false);
            };
            let bucket = match feature.current_phase {
                Phase::Red => &mut feature.test_files,
                Phase::Green | Phase::Refactor => &mut feature.impl_files,
                Phase::Ready => return Ok(false),
            };
            if bucket.iter().any(|existing| existing == path) {
                false
            } else {
                bucket.push(path.to_string());
                true
            }
        };

        if recorded {
            self.persist(&mut ws, now);
        }
        Ok(recorded)
    }

    /// Phase of the current feature, if one is active.
    pub fn current_phase(&self) -> Option<Phase> {
        self.lock_state().current_feature().map(|f| f.current_phase)
    }

    /// Snapshot of the full workspace for status display.
    pub fn snapshot(&self) -> Workspace {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, Workspace> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write-through persistence of the workspace plus the compact phase
    /// snapshot. Disk failures are logged and the in-memory state remains
    /// authoritative; the next successful write reconciles.
    fn persist(&self, ws: &mut Workspace, now: DateTime<Utc>) {
        ws.last_modified = now;
        if let Err(err) = state_store::write_workspace(&self.paths.workspace_path, ws) {
            warn!(err = %format!("{err:#}"), "failed to persist workspace; keeping in-memory state");
        }
        let phase_state = phase_state_from(ws, now);
        if let Err(err) = state_store::write_phase_state(&self.paths.phase_path, &phase_state) {
            warn!(err = %format!("{err:#}"), "failed to persist phase state; keeping in-memory state");
        }
    }
}

fn phase_state_from(ws: &Workspace, now: DateTime<Utc>) -> PhaseState {
    match ws.current_feature() {
        Some(feature) => {
            let open = feature.history.iter().rev().find(|r| r.completed_at.is_none());
            PhaseState {
                current_phase: feature.current_phase,
                feature_id: Some(feature.id.clone()),
                timestamp: now,
                phase_start_time: open.map(|r| r.started_at).unwrap_or(feature.created_at),
                phase_history: feature
                    .history
                    .iter()
                    .filter_map(|r| {
                        r.completed_at.map(|end| ClosedPhase {
                            phase: r.to_phase,
                            end_time: end,
                        })
                    })
                    .collect(),
                previous_phase: open.map(|r| r.from_phase),
            }
        }
        None => PhaseState {
            current_phase: Phase::Ready,
            feature_id: None,
            timestamp: now,
            phase_start_time: now,
            phase_history: Vec::new(),
            previous_phase: None,
        },
    }
}
