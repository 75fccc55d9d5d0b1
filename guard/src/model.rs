//! Workspace data model: features, phase history, and their on-disk shape.
//!
//! Field names follow the workspace file format (camelCase, feature history
//! serialized as `cycles`), so these structs round-trip the persisted JSON
//! without a separate wire layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::Phase;

/// One phase transition in a feature's history.
///
/// Appended by the phase state machine on every switch, never mutated except
/// to stamp `completed_at` when the next switch closes it. Records within one
/// feature are ordered by `started_at` ascending and chained: each record's
/// `from_phase` equals the previous record's `to_phase`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransitionRecord {
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub feature: String,
}

/// Lifecycle state of a feature within the workspace file.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    Active,
    Completed,
}

/// An independently tracked unit of TDD work with its own phase and history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: String,
    pub title: String,
    pub description: String,
    pub current_phase: Phase,
    #[serde(rename = "cycles", default)]
    pub history: Vec<PhaseTransitionRecord>,
    pub status: FeatureStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Test paths the guard allowed while this feature was in RED.
    #[serde(default)]
    pub test_files: Vec<String>,
    /// Source paths the guard allowed while this feature was in GREEN/REFACTOR.
    #[serde(default)]
    pub impl_files: Vec<String>,
}

/// Per-project container of all features (`.guard/state/workspace.json`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    #[serde(rename = "currentFeature")]
    pub current_feature_id: Option<String>,
    pub features: BTreeMap<String, Feature>,
    #[serde(rename = "completedFeatures", default)]
    pub completed_feature_ids: Vec<String>,
    #[serde(default)]
    pub global_phase_history: Vec<PhaseTransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Workspace {
    pub fn current_feature(&self) -> Option<&Feature> {
        self.current_feature_id
            .as_ref()
            .and_then(|id| self.features.get(id))
    }

    pub fn current_feature_mut(&mut self) -> Option<&mut Feature> {
        match &self.current_feature_id {
            Some(id) => self.features.get_mut(id),
            None => None,
        }
    }
}

/// Empty workspace with creation timestamps set to `now`.
pub fn default_workspace(now: DateTime<Utc>) -> Workspace {
    Workspace {
        current_feature_id: None,
        features: BTreeMap::new(),
        completed_feature_ids: Vec::new(),
        global_phase_history: Vec::new(),
        created_at: now,
        last_modified: now,
    }
}

/// Normalize a caller-supplied feature id for identity comparison.
///
/// Trimmed and lowercased; internal whitespace collapses to single dashes so
/// "Login Form" and "login-form" name the same feature.
pub fn normalize_feature_id(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}
