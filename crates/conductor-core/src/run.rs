use crate::error::{CoreError, Result};
use crate::paths;
use crate::types::{ApprovalStatus, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// AgentRun
// ---------------------------------------------------------------------------

/// Persistent record for one orchestration run.
///
/// Created by the launcher, mutated by the owning worker (heartbeat,
/// node-start) and by operator actions (approve/reject/stop). Immutable
/// once terminal, except via [`RunStore::relaunch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub feature_id: String,
    pub agent_name: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Correlation key for the checkpoint store.
    pub thread_id: String,
    /// Progress marker, e.g. `node:plan`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<ApprovalStatus>,
    /// Operator-visible count of reject/re-run rounds.
    #[serde(default)]
    pub feedback_rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRun {
    pub fn new(
        id: impl Into<String>,
        feature_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            thread_id: id.clone(),
            id,
            feature_id: feature_id.into(),
            agent_name: agent_name.into(),
            status: RunStatus::Pending,
            pid: None,
            result: None,
            error: None,
            approval_status: None,
            feedback_rounds: 0,
            last_heartbeat: None,
            started_at: now,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// RunPatch
// ---------------------------------------------------------------------------

/// Optional field updates applied together with a status write.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub pid: Option<Option<u32>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub approval_status: Option<ApprovalStatus>,
    pub heartbeat: bool,
    pub completed: bool,
    pub bump_feedback_rounds: bool,
}

impl RunPatch {
    pub fn heartbeat(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            heartbeat: true,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

/// File-backed run repository: one YAML manifest per run under
/// `.conductor/runs/`.
///
/// All writes are read-modify-write with last-write-wins semantics. Writes
/// for a given run are expected to come from the worker that owns it plus
/// operator-triggered terminal transitions from the launcher.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn save(&self, run: &AgentRun) -> Result<()> {
        let path = paths::run_manifest(&self.root, &run.id);
        let data = serde_yaml::to_string(run)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn find_by_id(&self, id: &str) -> Result<AgentRun> {
        let path = paths::run_manifest(&self.root, id);
        if !path.exists() {
            return Err(CoreError::RunNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn list(&self) -> Result<Vec<AgentRun>> {
        let dir = self.root.join(paths::RUNS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "yaml") {
                let data = std::fs::read_to_string(&path)?;
                runs.push(serde_yaml::from_str(&data)?);
            }
        }
        runs.sort_by(|a: &AgentRun, b: &AgentRun| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    /// Apply a status transition plus `patch` under the monotonicity
    /// invariant: once terminal, a run only changes via [`Self::relaunch`].
    pub fn update_status(&self, id: &str, status: RunStatus, patch: RunPatch) -> Result<AgentRun> {
        let mut run = self.find_by_id(id)?;

        if run.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: run.status.to_string(),
                to: status.to_string(),
                reason: "run is terminal; relaunch to start a new invocation".to_string(),
            });
        }

        let now = Utc::now();
        run.status = status;
        if let Some(pid) = patch.pid {
            run.pid = pid;
        }
        if let Some(result) = patch.result {
            run.result = Some(result);
        }
        if let Some(error) = patch.error {
            run.error = Some(error);
        }
        if let Some(approval) = patch.approval_status {
            run.approval_status = Some(approval);
        }
        if patch.heartbeat {
            run.last_heartbeat = Some(now);
        }
        if patch.completed {
            run.completed_at = Some(now);
        }
        if patch.bump_feedback_rounds {
            run.feedback_rounds += 1;
        }
        run.updated_at = now;

        self.save(&run)?;
        Ok(run)
    }

    /// Explicit new invocation under the same id: clears terminal fields and
    /// returns the run to `Pending`. The only sanctioned exit from a
    /// terminal status.
    pub fn relaunch(&self, id: &str) -> Result<AgentRun> {
        let mut run = self.find_by_id(id)?;
        let now = Utc::now();
        run.status = RunStatus::Pending;
        run.pid = None;
        run.result = None;
        run.error = None;
        run.approval_status = None;
        run.completed_at = None;
        run.started_at = now;
        run.updated_at = now;
        self.save(&run)?;
        Ok(run)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, RunStore) {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn save_and_find_roundtrip() {
        let (_dir, store) = store();
        let run = AgentRun::new("r1", "auth", "claude");
        store.save(&run).unwrap();

        let loaded = store.find_by_id("r1").unwrap();
        assert_eq!(loaded.feature_id, "auth");
        assert_eq!(loaded.status, RunStatus::Pending);
        assert_eq!(loaded.thread_id, "r1");
    }

    #[test]
    fn find_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.find_by_id("nope"),
            Err(CoreError::RunNotFound(_))
        ));
    }

    #[test]
    fn update_status_applies_patch() {
        let (_dir, store) = store();
        store.save(&AgentRun::new("r1", "auth", "claude")).unwrap();

        let run = store
            .update_status(
                "r1",
                RunStatus::Running,
                RunPatch {
                    pid: Some(Some(4321)),
                    result: Some("node:analyze".into()),
                    heartbeat: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.pid, Some(4321));
        assert_eq!(run.result.as_deref(), Some("node:analyze"));
        assert!(run.last_heartbeat.is_some());
    }

    #[test]
    fn terminal_status_is_sticky() {
        let (_dir, store) = store();
        store.save(&AgentRun::new("r1", "auth", "claude")).unwrap();
        store
            .update_status("r1", RunStatus::Completed, RunPatch::default())
            .unwrap();

        let err = store
            .update_status("r1", RunStatus::Running, RunPatch::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn relaunch_clears_terminal_fields() {
        let (_dir, store) = store();
        store.save(&AgentRun::new("r1", "auth", "claude")).unwrap();
        store
            .update_status(
                "r1",
                RunStatus::Failed,
                RunPatch {
                    error: Some("boom".into()),
                    completed: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let run = store.relaunch("r1").unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.error.is_none());
        assert!(run.completed_at.is_none());
        assert!(run.pid.is_none());
    }

    #[test]
    fn list_sorted_by_created_at() {
        let (_dir, store) = store();
        let mut first = AgentRun::new("r1", "auth", "claude");
        first.created_at = Utc::now() - chrono::Duration::seconds(60);
        store.save(&first).unwrap();
        store.save(&AgentRun::new("r2", "auth", "claude")).unwrap();

        let runs = store.list().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, "r1");
        assert_eq!(runs[1].id, "r2");
    }

    #[test]
    fn list_on_empty_root() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
    }
}
