use std::path::PathBuf;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::engine::Decision;
use crate::error::{CoreError, Result};
use crate::feature::{Feature, FeatureStore};
use crate::paths;
use crate::run::{AgentRun, RunPatch, RunStore};
use crate::types::RunStatus;

// ---------------------------------------------------------------------------
// ProcessControl
// ---------------------------------------------------------------------------

/// Everything needed to start one detached worker process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Worker stdout/stderr are appended here.
    pub log_path: PathBuf,
}

/// OS seam for worker process management, faked in tests.
pub trait ProcessControl: Send + Sync {
    /// Start a detached process. `Ok(None)` means the OS accepted the spawn
    /// but produced no usable pid; callers must treat that as a failure.
    fn launch(&self, spec: &LaunchSpec) -> Result<Option<u32>>;
    fn is_alive(&self, pid: u32) -> bool;
    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Real process control: detached spawn in a fresh process group, liveness
/// probe via signal 0, graceful termination via SIGTERM.
pub struct OsProcessControl;

impl ProcessControl for OsProcessControl {
    fn launch(&self, spec: &LaunchSpec) -> Result<Option<u32>> {
        use std::os::unix::process::CommandExt;

        let log = crate::io::open_append_log(&spec.log_path)?;
        let err_log = log.try_clone()?;

        let mut cmd = std::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            // Own process group: the worker survives the launcher's exit and
            // never receives its terminal signals.
            .process_group(0);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd
            .spawn()
            .map_err(|e| CoreError::Launch(format!("failed to spawn worker: {e}")))?;
        Ok(Some(child.id()))
    }

    fn is_alive(&self, pid: u32) -> bool {
        // EPERM means the process exists but belongs to someone else.
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            // Already gone is as good as terminated.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(CoreError::Launch(format!("failed to signal pid {pid}: {e}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// OpOutcome
// ---------------------------------------------------------------------------

/// Result of an operator action against a run. A refusal (wrong state) is a
/// normal outcome, not an error; errors are reserved for missing runs and
/// infrastructure failures.
#[derive(Debug, Clone, PartialEq)]
pub struct OpOutcome {
    pub ok: bool,
    pub reason: Option<String>,
}

impl OpOutcome {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Launcher-side management of worker processes: spawning, operator
/// approve/reject/stop, and crash reconciliation.
///
/// The supervisor never runs graph nodes itself; all orchestration happens
/// in the detached worker it spawns.
pub struct Supervisor {
    runs: RunStore,
    features: FeatureStore,
    control: Box<dyn ProcessControl>,
    worker_program: PathBuf,
    root: PathBuf,
}

impl Supervisor {
    pub fn new(
        root: impl Into<PathBuf>,
        worker_program: impl Into<PathBuf>,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        let root = root.into();
        Self {
            runs: RunStore::new(&root),
            features: FeatureStore::new(&root),
            control,
            worker_program: worker_program.into(),
            root,
        }
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    pub fn features(&self) -> &FeatureStore {
        &self.features
    }

    /// Create a run for `feature_id` and start its worker.
    pub fn launch(&self, feature_id: &str) -> Result<AgentRun> {
        let feature = self.features.find_by_id(feature_id)?;
        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let run = AgentRun::new(run_id, &feature.id, "claude");
        self.runs.save(&run)?;

        let run = self.spawn_worker(&run.id, None)?;
        self.features
            .update(feature_id, |f| f.agent_run_id = Some(run.id.clone()))?;
        tracing::info!(run_id = %run.id, feature_id, pid = ?run.pid, "worker launched");
        Ok(run)
    }

    /// Approve the pending gate on a waiting run and resume it in a fresh
    /// worker.
    pub fn approve(&self, run_id: &str, payload: Option<String>) -> Result<OpOutcome> {
        let run = self.runs.find_by_id(run_id)?;
        if run.status != RunStatus::WaitingApproval {
            return Ok(OpOutcome::refused(format!(
                "run is {}, not waiting for approval",
                run.status
            )));
        }
        self.spawn_worker(run_id, Some(&Decision::Approve { payload }))?;
        Ok(OpOutcome::accepted())
    }

    /// Reject the pending gate; the interrupted phase re-runs with `reason`
    /// in its prompt.
    pub fn reject(&self, run_id: &str, reason: impl Into<String>) -> Result<OpOutcome> {
        let run = self.runs.find_by_id(run_id)?;
        if run.status != RunStatus::WaitingApproval {
            return Ok(OpOutcome::refused(format!(
                "run is {}, not waiting for approval",
                run.status
            )));
        }
        self.spawn_worker(
            run_id,
            Some(&Decision::Reject {
                reason: reason.into(),
            }),
        )?;
        Ok(OpOutcome::accepted())
    }

    /// Stop a run: SIGTERM its worker if one is alive, then cancel the run.
    pub fn stop(&self, run_id: &str) -> Result<OpOutcome> {
        let run = self.runs.find_by_id(run_id)?;
        if run.status.is_terminal() {
            return Ok(OpOutcome::refused(format!("run already {}", run.status)));
        }
        if let Some(pid) = run.pid {
            if self.control.is_alive(pid) {
                self.control.terminate(pid)?;
            }
        }
        self.runs.update_status(
            run_id,
            RunStatus::Cancelled,
            RunPatch {
                completed: true,
                ..Default::default()
            },
        )?;
        Ok(OpOutcome::accepted())
    }

    /// Start a fresh invocation of a terminal run.
    pub fn relaunch(&self, run_id: &str) -> Result<AgentRun> {
        self.runs.relaunch(run_id)?;
        self.spawn_worker(run_id, None)
    }

    /// Reconcile run records against live processes.
    ///
    /// A non-terminal run that still records a pid for a dead process
    /// becomes `interrupted` — the outcome is unknown, so it is never
    /// marked failed. Runs without a pid are left alone: pending runs have
    /// not spawned, and a worker clears the pid before exiting at an
    /// approval pause. Safe to call repeatedly; a second pass finds nothing
    /// to mark.
    pub fn check_and_mark_crashed(&self) -> Result<Vec<String>> {
        let mut marked = Vec::new();
        for run in self.runs.list()? {
            if run.status.is_terminal() {
                continue;
            }
            let Some(pid) = run.pid else {
                continue;
            };
            if !self.control.is_alive(pid) {
                // Clearing the pid makes the mark idempotent.
                self.runs.update_status(
                    &run.id,
                    RunStatus::Interrupted,
                    RunPatch {
                        pid: Some(None),
                        error: Some(
                            "worker process disappeared before reaching a terminal status"
                                .to_string(),
                        ),
                        ..Default::default()
                    },
                )?;
                tracing::warn!(run_id = %run.id, pid = ?run.pid, "marked crashed worker");
                marked.push(run.id);
            }
        }
        Ok(marked)
    }

    /// Spawn the worker process for `run_id` and record its pid.
    ///
    /// A spawn that yields no pid fails without touching the run record, so
    /// the run stays actionable (re-approve, relaunch) instead of appearing
    /// to be running under a pid that never existed.
    ///
    /// No exclusion is enforced here: callers check the run's status before
    /// spawning, and two operators racing the same decision can both start a
    /// worker. Run-record writes are last-write-wins.
    fn spawn_worker(&self, run_id: &str, resume: Option<&Decision>) -> Result<AgentRun> {
        let run = self.runs.find_by_id(run_id)?;
        let feature = self.features.find_by_id(&run.feature_id)?;
        let spec = LaunchSpec {
            program: self.worker_program.clone(),
            args: worker_args(&run, &feature, resume)?,
            cwd: Some(self.root.clone()),
            log_path: paths::run_log_path(&self.root, run_id),
        };
        let pid = self
            .control
            .launch(&spec)?
            .ok_or_else(|| CoreError::Launch("worker spawn produced no pid".to_string()))?;

        self.runs.update_status(
            run_id,
            RunStatus::Running,
            RunPatch {
                pid: Some(Some(pid)),
                heartbeat: true,
                ..Default::default()
            },
        )
    }
}

/// The argv contract between the launcher and the worker subcommand: run
/// and thread ids, the feature's id and paths, and the JSON-encoded gates.
/// The worker prefers these values over its own store reads, so the spawn
/// carries everything needed to drive the graph.
fn worker_args(
    run: &AgentRun,
    feature: &Feature,
    resume: Option<&Decision>,
) -> Result<Vec<String>> {
    let mut args = vec![
        "worker".to_string(),
        "--run-id".to_string(),
        run.id.clone(),
        "--feature-id".to_string(),
        feature.id.clone(),
        "--thread-id".to_string(),
        run.thread_id.clone(),
        "--repo-path".to_string(),
        feature.repository_path.display().to_string(),
        "--spec-path".to_string(),
        feature.spec_path.display().to_string(),
        "--gates".to_string(),
        serde_json::to_string(&feature.approval_gates)?,
    ];
    if let Some(worktree) = &feature.worktree_path {
        args.push("--worktree".to_string());
        args.push(worktree.display().to_string());
    }
    match resume {
        None => {}
        Some(Decision::Approve { payload }) => {
            args.push("--resume".to_string());
            args.push("--decision".to_string());
            args.push("approve".to_string());
            if let Some(payload) = payload {
                args.push("--resume-payload".to_string());
                args.push(payload.clone());
            }
        }
        Some(Decision::Reject { reason }) => {
            args.push("--resume".to_string());
            args.push("--decision".to_string());
            args.push("reject".to_string());
            args.push("--reason".to_string());
            args.push(reason.clone());
        }
    }
    Ok(args)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
