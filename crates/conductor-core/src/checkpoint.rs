use crate::error::{CoreError, Result};
use crate::gates::ApprovalGates;
use crate::paths;
use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// GraphState
// ---------------------------------------------------------------------------

/// Full graph-engine state as of the last completed (or interrupted) node.
///
/// Serialized to the checkpoint store after every node, so an equivalent
/// worker process can resume from exactly this point. Identical checkpoint +
/// identical executor responses replay to identical node ordering and
/// artifact paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphState {
    pub feature_id: String,
    /// The feature specification document fed into every phase prompt.
    pub spec_path: PathBuf,
    /// Directory phase artifacts are written into.
    pub spec_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub gates: ApprovalGates,
    /// Phases whose node has completed successfully, in execution order.
    #[serde(default)]
    pub completed: Vec<Phase>,
    /// Artifact path written by each completed phase.
    #[serde(default)]
    pub artifacts: BTreeMap<Phase, PathBuf>,
    /// Accumulated operator feedback and repair notes, appended to prompts.
    #[serde(default)]
    pub messages: Vec<String>,
    /// Per-phase retry counters (executor + validation failures).
    #[serde(default)]
    pub retries: BTreeMap<Phase, u32>,
    /// Set when the graph paused at a closed gate after this phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_at: Option<Phase>,
    /// CI fix attempts consumed by the current merge invocation.
    #[serde(default)]
    pub ci_attempt: u32,
    pub updated_at: DateTime<Utc>,
}

impl GraphState {
    pub fn new(
        feature_id: impl Into<String>,
        spec_path: impl Into<PathBuf>,
        spec_dir: impl Into<PathBuf>,
        gates: ApprovalGates,
    ) -> Self {
        Self {
            feature_id: feature_id.into(),
            spec_path: spec_path.into(),
            spec_dir: spec_dir.into(),
            worktree_path: None,
            branch: None,
            gates,
            completed: Vec::new(),
            artifacts: BTreeMap::new(),
            messages: Vec::new(),
            retries: BTreeMap::new(),
            interrupted_at: None,
            ci_attempt: 0,
            updated_at: Utc::now(),
        }
    }

    /// The next phase to execute: the first not yet completed.
    pub fn next_phase(&self) -> Option<Phase> {
        Phase::all()
            .iter()
            .copied()
            .find(|p| !self.completed.contains(p))
    }

    pub fn mark_completed(&mut self, phase: Phase) {
        if !self.completed.contains(&phase) {
            self.completed.push(phase);
        }
        self.updated_at = Utc::now();
    }

    pub fn record_artifact(&mut self, phase: Phase, path: PathBuf) {
        self.artifacts.insert(phase, path);
        self.updated_at = Utc::now();
    }

    /// Increment and return the retry counter for `phase`.
    pub fn bump_retry(&mut self, phase: Phase) -> u32 {
        let n = self.retries.entry(phase).or_insert(0);
        *n += 1;
        self.updated_at = Utc::now();
        *n
    }

    /// Clear the interrupt marker after an operator approval. The
    /// interrupted phase stays completed, so execution proceeds to the next
    /// node without re-invoking it.
    pub fn approve(&mut self) -> Result<Phase> {
        let phase = self
            .interrupted_at
            .take()
            .ok_or_else(|| CoreError::Resume("no pending interrupt to approve".to_string()))?;
        self.updated_at = Utc::now();
        Ok(phase)
    }

    /// Re-open the interrupted phase after an operator rejection: the phase
    /// is removed from the completed set and the reason joins the
    /// accumulated feedback, so the same node re-runs with it in the prompt.
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<Phase> {
        let phase = self
            .interrupted_at
            .take()
            .ok_or_else(|| CoreError::Resume("no pending interrupt to reject".to_string()))?;
        self.completed.retain(|p| *p != phase);
        self.messages
            .push(format!("Reviewer feedback on {phase}: {}", reason.into()));
        self.updated_at = Utc::now();
        Ok(phase)
    }

    /// Deterministic artifact path for a phase.
    pub fn artifact_path(&self, phase: Phase) -> PathBuf {
        self.spec_dir.join(phase.artifact_filename())
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Checkpoint persistence keyed by thread id. Owned exclusively by the
/// graph engine: read on resume, written after every node.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn save(&self, thread_id: &str, state: &GraphState) -> Result<()> {
        let path = paths::checkpoint_path(&self.root, thread_id);
        let data = serde_yaml::to_string(state)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn load(&self, thread_id: &str) -> Result<GraphState> {
        let path = paths::checkpoint_path(&self.root, thread_id);
        if !path.exists() {
            return Err(CoreError::CheckpointNotFound(thread_id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn exists(&self, thread_id: &str) -> bool {
        paths::checkpoint_path(&self.root, thread_id).exists()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
