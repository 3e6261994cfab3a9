use crate::error::{CoreError, Result};
use crate::gates::ApprovalGates;
use crate::paths;
use crate::types::Lifecycle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Feature
// ---------------------------------------------------------------------------

/// Persistent record for one unit of work.
///
/// `lifecycle` mirrors the graph node currently executing; a `Blocked`
/// feature cannot progress until its parent reaches `Maintain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub lifecycle: Lifecycle,
    pub spec_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub repository_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_run_id: Option<String>,
    #[serde(default)]
    pub approval_gates: ApprovalGates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feature {
    pub fn new(
        id: impl Into<String>,
        spec_path: impl Into<PathBuf>,
        repository_path: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            lifecycle: Lifecycle::Analyze,
            spec_path: spec_path.into(),
            worktree_path: None,
            branch: None,
            repository_path: repository_path.into(),
            agent_run_id: None,
            approval_gates: ApprovalGates::default(),
            parent_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureStore
// ---------------------------------------------------------------------------

/// File-backed feature repository: one YAML manifest per feature under
/// `.conductor/features/<id>/`.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    root: PathBuf,
}

impl FeatureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn create(&self, feature: &Feature) -> Result<()> {
        paths::validate_id(&feature.id)?;
        let manifest = paths::feature_manifest(&self.root, &feature.id);
        if manifest.exists() {
            return Err(CoreError::FeatureExists(feature.id.clone()));
        }
        self.save(feature)
    }

    pub fn save(&self, feature: &Feature) -> Result<()> {
        let manifest = paths::feature_manifest(&self.root, &feature.id);
        let data = serde_yaml::to_string(feature)?;
        crate::io::atomic_write(&manifest, data.as_bytes())
    }

    pub fn find_by_id(&self, id: &str) -> Result<Feature> {
        let manifest = paths::feature_manifest(&self.root, id);
        if !manifest.exists() {
            return Err(CoreError::FeatureNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&manifest)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn list(&self) -> Result<Vec<Feature>> {
        let dir = self.root.join(paths::FEATURES_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut features = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let id = entry.file_name().to_string_lossy().into_owned();
                match self.find_by_id(&id) {
                    Ok(f) => features.push(f),
                    Err(CoreError::FeatureNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        features.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(features)
    }

    pub fn update<F>(&self, id: &str, mutate: F) -> Result<Feature>
    where
        F: FnOnce(&mut Feature),
    {
        let mut feature = self.find_by_id(id)?;
        mutate(&mut feature);
        feature.updated_at = Utc::now();
        self.save(&feature)?;
        Ok(feature)
    }

    /// The single lifecycle-mutation entry point.
    ///
    /// Rewrites the feature's stage (idempotent on retries) and, when a
    /// feature reaches `Maintain`, unblocks any `Blocked` child whose
    /// parent it is. The cascade runs through this same entry point, so
    /// every transition re-checks blocked dependents exactly once.
    pub fn set_lifecycle(&self, id: &str, stage: Lifecycle) -> Result<Feature> {
        let feature = self.update(id, |f| f.lifecycle = stage)?;

        if stage == Lifecycle::Maintain {
            for child in self.list()? {
                if child.lifecycle == Lifecycle::Blocked && child.parent_id.as_deref() == Some(id) {
                    // Unblocked work re-enters at Analyze.
                    self.set_lifecycle(&child.id, Lifecycle::Analyze)?;
                }
            }
        }

        Ok(feature)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FeatureStore) {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(dir.path());
        (dir, store)
    }

    fn feature(id: &str) -> Feature {
        Feature::new(id, format!("specs/{id}.md"), "/repo")
    }

    #[test]
    fn create_and_load() {
        let (_dir, store) = store();
        store.create(&feature("auth-login")).unwrap();

        let loaded = store.find_by_id("auth-login").unwrap();
        assert_eq!(loaded.lifecycle, Lifecycle::Analyze);
        assert_eq!(loaded.spec_path, PathBuf::from("specs/auth-login.md"));
    }

    #[test]
    fn create_duplicate_fails() {
        let (_dir, store) = store();
        store.create(&feature("auth")).unwrap();
        assert!(matches!(
            store.create(&feature("auth")),
            Err(CoreError::FeatureExists(_))
        ));
    }

    #[test]
    fn create_validates_id() {
        let (_dir, store) = store();
        assert!(matches!(
            store.create(&feature("Bad Id")),
            Err(CoreError::InvalidId(_))
        ));
    }

    #[test]
    fn set_lifecycle_is_idempotent() {
        let (_dir, store) = store();
        store.create(&feature("auth")).unwrap();

        store.set_lifecycle("auth", Lifecycle::Planning).unwrap();
        store.set_lifecycle("auth", Lifecycle::Planning).unwrap();
        assert_eq!(
            store.find_by_id("auth").unwrap().lifecycle,
            Lifecycle::Planning
        );
    }

    #[test]
    fn maintain_unblocks_children() {
        let (_dir, store) = store();
        store.create(&feature("parent")).unwrap();

        let mut child = feature("child");
        child.lifecycle = Lifecycle::Blocked;
        child.parent_id = Some("parent".into());
        store.create(&child).unwrap();

        let mut unrelated = feature("other");
        unrelated.lifecycle = Lifecycle::Blocked;
        unrelated.parent_id = Some("someone-else".into());
        store.create(&unrelated).unwrap();

        store.set_lifecycle("parent", Lifecycle::Maintain).unwrap();

        assert_eq!(
            store.find_by_id("child").unwrap().lifecycle,
            Lifecycle::Analyze
        );
        assert_eq!(
            store.find_by_id("other").unwrap().lifecycle,
            Lifecycle::Blocked
        );
    }

    #[test]
    fn non_maintain_transitions_do_not_cascade() {
        let (_dir, store) = store();
        store.create(&feature("parent")).unwrap();

        let mut child = feature("child");
        child.lifecycle = Lifecycle::Blocked;
        child.parent_id = Some("parent".into());
        store.create(&child).unwrap();

        store.set_lifecycle("parent", Lifecycle::Review).unwrap();
        assert_eq!(
            store.find_by_id("child").unwrap().lifecycle,
            Lifecycle::Blocked
        );
    }
}
