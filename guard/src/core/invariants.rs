//! Semantic invariants not expressible via JSON Schema.

use crate::core::types::Phase;
use crate::model::{Feature, Workspace};

/// Check semantic invariants not expressible in JSON Schema:
/// - `currentFeature`, if set, keys an entry in `features`
/// - `currentFeature` is never in `completedFeatures`
/// - active features do not appear in `completedFeatures`
/// - per feature: history ordered by `started_at`, records chained
///   (`to_phase` of one equals `from_phase` of the next), `current_phase`
///   equals the last record's `to_phase` (READY when history is empty)
pub fn validate_invariants(workspace: &Workspace) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(id) = &workspace.current_feature_id {
        if !workspace.features.contains_key(id) {
            errors.push(format!("currentFeature '{id}' not found in features"));
        }
        if workspace.completed_feature_ids.contains(id) {
            errors.push(format!("currentFeature '{id}' is already completed"));
        }
    }

    for id in workspace.features.keys() {
        if workspace.completed_feature_ids.contains(id) {
            errors.push(format!("feature '{id}' is both active and completed"));
        }
    }

    for (id, feature) in &workspace.features {
        if feature.id != *id {
            errors.push(format!("feature '{id}': id field is '{}'", feature.id));
        }
        validate_feature_history(feature, &mut errors);
    }

    errors
}

fn validate_feature_history(feature: &Feature, errors: &mut Vec<String>) {
    let id = &feature.id;

    for pair in feature.history.windows(2) {
        if pair[0].started_at > pair[1].started_at {
            errors.push(format!("feature '{id}': history not ordered by startedAt"));
            break;
        }
    }
    for pair in feature.history.windows(2) {
        if pair[0].to_phase != pair[1].from_phase {
            errors.push(format!(
                "feature '{id}': history broken between {} and {}",
                pair[0].to_phase, pair[1].from_phase
            ));
            break;
        }
    }

    match feature.history.last() {
        Some(last) => {
            if feature.current_phase != last.to_phase {
                errors.push(format!(
                    "feature '{id}': currentPhase {} does not match last transition {}",
                    feature.current_phase, last.to_phase
                ));
            }
        }
        None => {
            if feature.current_phase != Phase::Ready {
                errors.push(format!(
                    "feature '{id}': currentPhase {} with empty history (expected READY)",
                    feature.current_phase
                ));
            }
        }
    }

    for record in &feature.history {
        if record.feature != *id {
            errors.push(format!(
                "feature '{id}': history record names feature '{}'",
                record.feature
            ));
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::default_workspace;
    use crate::test_support::{feature, fixed_time};

    #[test]
    fn valid_workspace_has_no_errors() {
        let mut ws = default_workspace(fixed_time());
        ws.features.insert("a".to_string(), feature("a", Phase::Red));
        ws.current_feature_id = Some("a".to_string());

        assert!(validate_invariants(&ws).is_empty());
    }

    #[test]
    fn current_feature_must_key_features() {
        let mut ws = default_workspace(fixed_time());
        ws.current_feature_id = Some("ghost".to_string());

        let errors = validate_invariants(&ws);
        assert!(errors.iter().any(|e| e.contains("'ghost' not found")));
    }

    #[test]
    fn completed_feature_cannot_be_current() {
        let mut ws = default_workspace(fixed_time());
        ws.features.insert("a".to_string(), feature("a", Phase::Red));
        ws.current_feature_id = Some("a".to_string());
        ws.completed_feature_ids.push("a".to_string());

        let errors = validate_invariants(&ws);
        assert!(errors.iter().any(|e| e.contains("already completed")));
        assert!(errors.iter().any(|e| e.contains("both active and completed")));
    }

    #[test]
    fn broken_history_chain_is_reported() {
        let mut ws = default_workspace(fixed_time());
        let mut f = feature("a", Phase::Green);
        // Force a gap: record says READY→RED but phase claims GREEN.
        f.history[0].to_phase = Phase::Red;
        ws.features.insert("a".to_string(), f);

        let errors = validate_invariants(&ws);
        assert!(errors.iter().any(|e| e.contains("does not match last transition")));
    }

    #[test]
    fn empty_history_requires_ready_phase() {
        let mut ws = default_workspace(fixed_time());
        let mut f = feature("a", Phase::Red);
        f.history.clear();
        ws.features.insert("a".to_string(), f);

        let errors = validate_invariants(&ws);
        assert!(errors.iter().any(|e| e.contains("expected READY")));
    }
}
