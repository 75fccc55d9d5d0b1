//! Project profile stored under `.guard/state/profile.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Per-project verification profile (TOML).
///
/// Produced by project-type detection or edited by humans; this crate only
/// loads, validates, and persists it. Missing fields default to generic
/// conventions that cover the common language layouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectProfile {
    /// Test command to execute (e.g. `["cargo","test"]`).
    pub test_command: Vec<String>,

    /// Globs that trigger the verification loop when files change.
    pub watch_globs: Vec<String>,

    /// Globs identifying test files (writable in RED, protected elsewhere).
    pub test_globs: Vec<String>,

    /// Globs identifying production sources (writable in GREEN/REFACTOR).
    pub source_globs: Vec<String>,

    /// Quiet period after the last change event before tests run.
    pub debounce_ms: u64,

    /// Hard wall-clock budget for one test run.
    pub test_timeout_secs: u64,

    /// Truncate captured test output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ProjectProfile {
    fn default() -> Self {
        Self {
            test_command: vec!["cargo".to_string(), "test".to_string()],
            watch_globs: vec![
                "src/**".to_string(),
                "lib/**".to_string(),
                "app/**".to_string(),
                "tests/**".to_string(),
                "test/**".to_string(),
            ],
            test_globs: vec![
                "tests/**".to_string(),
                "test/**".to_string(),
                "spec/**".to_string(),
                "__tests__/**".to_string(),
                "**/*.test.*".to_string(),
                "**/*.spec.*".to_string(),
                "**/*_test.*".to_string(),
                "**/test_*.*".to_string(),
            ],
            source_globs: vec![
                "src/**".to_string(),
                "lib/**".to_string(),
                "app/**".to_string(),
            ],
            debounce_ms: 2_000,
            test_timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

impl ProjectProfile {
    pub fn validate(&self) -> Result<()> {
        if self.test_command.is_empty() || self.test_command[0].trim().is_empty() {
            return Err(anyhow!("test_command must be a non-empty array"));
        }
        if self.debounce_ms == 0 {
            return Err(anyhow!("debounce_ms must be > 0"));
        }
        if self.test_timeout_secs == 0 {
            return Err(anyhow!("test_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load a profile from a TOML file.
///
/// If the file is missing, returns `ProjectProfile::default()`.
pub fn load_profile(path: &Path) -> Result<ProjectProfile> {
    if !path.exists() {
        let profile = ProjectProfile::default();
        profile.validate()?;
        return Ok(profile);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let profile: ProjectProfile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    profile.validate()?;
    Ok(profile)
}

/// Atomically write a profile to disk (temp file + rename).
pub fn write_profile(path: &Path, profile: &ProjectProfile) -> Result<()> {
    profile.validate()?;
    let parent = path
        .parent()
        .with_context(|| format!("profile path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = toml::to_string_pretty(profile).context("serialize profile toml")?;
    buf.push('\n');
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp profile {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace profile {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let profile = load_profile(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(profile, ProjectProfile::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("profile.toml");
        let profile = ProjectProfile {
            test_command: vec!["npm".to_string(), "test".to_string()],
            debounce_ms: 500,
            ..ProjectProfile::default()
        };
        write_profile(&path, &profile).expect("write");
        let loaded = load_profile(&path).expect("load");
        assert_eq!(loaded, profile);
    }

    #[test]
    fn validate_rejects_empty_test_command() {
        let profile = ProjectProfile {
            test_command: Vec::new(),
            ..ProjectProfile::default()
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let profile = ProjectProfile {
            test_timeout_secs: 0,
            ..ProjectProfile::default()
        };
        assert!(profile.validate().is_err());
    }
}
