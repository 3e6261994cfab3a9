use std::sync::atomic::{AtomicU32, Ordering};

use crate::bus::{EventBus, RunEvent};
use crate::error::{CoreError, Result};
use crate::feature::FeatureStore;
use crate::run::{RunPatch, RunStore};
use crate::types::{ApprovalStatus, Phase, RunStatus};

/// Consecutive heartbeat-write failures tolerated before the side channel
/// stops swallowing them and returns a hard error from the next write.
const MAX_CONSECUTIVE_HEARTBEAT_FAILURES: u32 = 8;

// ---------------------------------------------------------------------------
// WorkerContext
// ---------------------------------------------------------------------------

/// Per-worker side channel for run bookkeeping and lifecycle sync.
///
/// Constructed once at worker startup and passed by reference into the
/// engine — one instance per run process, never shared across runs.
///
/// Heartbeat and lifecycle writes are fire-and-forget: failures are logged
/// and swallowed so bookkeeping never aborts graph execution. Sustained
/// failure is the exception — once `MAX_CONSECUTIVE_HEARTBEAT_FAILURES`
/// writes in a row have failed, the next call returns an error and the
/// engine surfaces it as a node failure.
pub struct WorkerContext {
    runs: RunStore,
    features: FeatureStore,
    bus: EventBus,
    run_id: String,
    feature_id: String,
    heartbeat_failures: AtomicU32,
}

impl WorkerContext {
    pub fn new(
        runs: RunStore,
        features: FeatureStore,
        bus: EventBus,
        run_id: impl Into<String>,
        feature_id: impl Into<String>,
    ) -> Self {
        Self {
            runs,
            features,
            bus,
            run_id: run_id.into(),
            feature_id: feature_id.into(),
            heartbeat_failures: AtomicU32::new(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Heartbeat + lifecycle sync fired at the start of every node.
    ///
    /// Writes status=running with a `node:<name>` progress marker and a
    /// fresh heartbeat, rewrites the feature lifecycle to the phase's stage
    /// (idempotent on retries), and emits a bus event.
    pub fn report_node_start(&self, phase: Phase) -> Result<()> {
        let status_write = self.runs.update_status(
            &self.run_id,
            RunStatus::Running,
            RunPatch::heartbeat(format!("node:{phase}")),
        );
        let lifecycle_write = self
            .features
            .set_lifecycle(&self.feature_id, phase.lifecycle());

        let failed = status_write.is_err() || lifecycle_write.is_err();
        if let Err(e) = status_write {
            tracing::warn!(run_id = %self.run_id, %phase, error = %e, "heartbeat write failed");
        }
        if let Err(e) = lifecycle_write {
            tracing::warn!(feature_id = %self.feature_id, %phase, error = %e, "lifecycle sync failed");
        }

        if failed {
            let n = self.heartbeat_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if n > MAX_CONSECUTIVE_HEARTBEAT_FAILURES {
                return Err(CoreError::PhaseFailed {
                    phase: phase.to_string(),
                    reason: format!("{n} consecutive side-channel write failures"),
                });
            }
        } else {
            self.heartbeat_failures.store(0, Ordering::SeqCst);
        }

        self.bus.emit(RunEvent::NodeStarted {
            run_id: self.run_id.clone(),
            phase,
        });
        Ok(())
    }

    /// Terminal/interrupt status writes. Unlike heartbeats these are real
    /// outcomes, so persistence errors propagate.
    ///
    /// The pid is cleared: the worker exits after checkpointing the
    /// interrupt, and a run without a pid is exempt from crash
    /// reconciliation.
    pub fn mark_waiting_approval(&self, phase: Phase) -> Result<()> {
        self.runs.update_status(
            &self.run_id,
            RunStatus::WaitingApproval,
            RunPatch {
                pid: Some(None),
                result: Some(format!("node:{phase}")),
                ..Default::default()
            },
        )?;
        self.bus.emit(RunEvent::WaitingApproval {
            run_id: self.run_id.clone(),
            phase,
        });
        Ok(())
    }

    /// Close out a successful run. Moving the feature to `Maintain` also
    /// unblocks any children waiting on it.
    pub fn mark_completed(&self) -> Result<()> {
        self.runs.update_status(
            &self.run_id,
            RunStatus::Completed,
            RunPatch {
                completed: true,
                ..Default::default()
            },
        )?;
        self.features
            .set_lifecycle(&self.feature_id, crate::types::Lifecycle::Maintain)?;
        self.bus.emit(RunEvent::RunCompleted {
            run_id: self.run_id.clone(),
        });
        Ok(())
    }

    /// Record the operator decision carried by a resume invocation on the
    /// run record, returning it to `running`.
    pub fn record_decision(&self, decision: ApprovalStatus, bump_feedback: bool) -> Result<()> {
        self.runs.update_status(
            &self.run_id,
            RunStatus::Running,
            RunPatch {
                approval_status: Some(decision),
                bump_feedback_rounds: bump_feedback,
                heartbeat: true,
                ..Default::default()
            },
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, error: &str) -> Result<()> {
        self.runs.update_status(
            &self.run_id,
            RunStatus::Failed,
            RunPatch {
                error: Some(error.to_string()),
                completed: true,
                ..Default::default()
            },
        )?;
        self.bus.emit(RunEvent::RunFailed {
            run_id: self.run_id.clone(),
            error: error.to_string(),
        });
        Ok(())
    }

    pub fn emit_ci_attempt(&self, attempt: u32, max_attempts: u32) {
        self.bus.emit(RunEvent::CiFixAttempt {
            run_id: self.run_id.clone(),
            attempt,
            max_attempts,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::run::AgentRun;
    use crate::types::Lifecycle;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> WorkerContext {
        let runs = RunStore::new(dir.path());
        let features = FeatureStore::new(dir.path());
        runs.save(&AgentRun::new("r1", "auth", "claude")).unwrap();
        features
            .create(&Feature::new("auth", "spec.md", dir.path()))
            .unwrap();
        WorkerContext::new(runs, features, EventBus::new(), "r1", "auth")
    }

    #[test]
    fn report_node_start_writes_heartbeat_and_lifecycle() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        ctx.report_node_start(Phase::Plan).unwrap();

        let run = RunStore::new(dir.path()).find_by_id("r1").unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.result.as_deref(), Some("node:plan"));
        assert!(run.last_heartbeat.is_some());

        let feature = FeatureStore::new(dir.path()).find_by_id("auth").unwrap();
        assert_eq!(feature.lifecycle, Lifecycle::Planning);
    }

    #[test]
    fn side_channel_failures_are_swallowed() {
        let dir = TempDir::new().unwrap();
        // Stores pointed at a root with no records: every write fails.
        let empty = TempDir::new().unwrap();
        let ctx = WorkerContext::new(
            RunStore::new(empty.path()),
            FeatureStore::new(empty.path()),
            EventBus::new(),
            "ghost",
            "ghost",
        );
        drop(dir);

        for _ in 0..MAX_CONSECUTIVE_HEARTBEAT_FAILURES {
            ctx.report_node_start(Phase::Analyze).unwrap();
        }
    }

    #[test]
    fn sustained_side_channel_failure_escalates() {
        let empty = TempDir::new().unwrap();
        let ctx = WorkerContext::new(
            RunStore::new(empty.path()),
            FeatureStore::new(empty.path()),
            EventBus::new(),
            "ghost",
            "ghost",
        );

        for _ in 0..MAX_CONSECUTIVE_HEARTBEAT_FAILURES {
            ctx.report_node_start(Phase::Analyze).unwrap();
        }
        assert!(matches!(
            ctx.report_node_start(Phase::Analyze),
            Err(CoreError::PhaseFailed { .. })
        ));
    }

    #[test]
    fn successful_write_resets_failure_streak() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        // Pre-load some failures by hand.
        ctx.heartbeat_failures.store(7, Ordering::SeqCst);
        ctx.report_node_start(Phase::Analyze).unwrap();
        assert_eq!(ctx.heartbeat_failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mark_completed_moves_feature_to_maintain() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        ctx.mark_completed().unwrap();

        let run = RunStore::new(dir.path()).find_by_id("r1").unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
        assert_eq!(
            FeatureStore::new(dir.path()).find_by_id("auth").unwrap().lifecycle,
            Lifecycle::Maintain
        );
    }

    #[test]
    fn record_decision_bumps_feedback_on_reject() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        ctx.record_decision(ApprovalStatus::Rejected, true).unwrap();

        let run = RunStore::new(dir.path()).find_by_id("r1").unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.approval_status, Some(ApprovalStatus::Rejected));
        assert_eq!(run.feedback_rounds, 1);
    }

    #[tokio::test]
    async fn node_start_emits_bus_event() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let mut rx = ctx.bus().subscribe();

        ctx.report_node_start(Phase::Research).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            RunEvent::NodeStarted {
                run_id: "r1".into(),
                phase: Phase::Research,
            }
        );
    }
}
