use crate::error::{CoreError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONDUCTOR_DIR: &str = ".conductor";
pub const RUNS_DIR: &str = ".conductor/runs";
pub const FEATURES_DIR: &str = ".conductor/features";
pub const CHECKPOINTS_DIR: &str = ".conductor/checkpoints";
pub const LOGS_DIR: &str = ".conductor/logs";

pub const MANIFEST_FILE: &str = "manifest.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn conductor_dir(root: &Path) -> PathBuf {
    root.join(CONDUCTOR_DIR)
}

pub fn run_manifest(root: &Path, run_id: &str) -> PathBuf {
    root.join(RUNS_DIR).join(format!("{run_id}.yaml"))
}

pub fn feature_dir(root: &Path, feature_id: &str) -> PathBuf {
    root.join(FEATURES_DIR).join(feature_id)
}

pub fn feature_manifest(root: &Path, feature_id: &str) -> PathBuf {
    feature_dir(root, feature_id).join(MANIFEST_FILE)
}

pub fn checkpoint_path(root: &Path, thread_id: &str) -> PathBuf {
    root.join(CHECKPOINTS_DIR).join(format!("{thread_id}.yaml"))
}

pub fn run_log_path(root: &Path, run_id: &str) -> PathBuf {
    root.join(LOGS_DIR).join(format!("{run_id}.log"))
}

// ---------------------------------------------------------------------------
// Id validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

/// Run/feature ids double as file names, so they are restricted to
/// lowercase alphanumerics and hyphens.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !id_re().is_match(id) {
        return Err(CoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
