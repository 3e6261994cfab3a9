pub mod prompts;
pub mod validate;

use conductor_agent::{AgentExecutor, ExecutionRequest, StructuredCaller};
use serde::{Deserialize, Serialize};

use crate::bus::RunEvent;
use crate::checkpoint::{CheckpointStore, GraphState};
use crate::ci::{watch_and_fix, CiConfig, CiOutcome, CiProvider, GitOps};
use crate::context::WorkerContext;
use crate::error::{CoreError, Result};
use crate::types::{ApprovalStatus, Phase};

/// Attempts per phase (first try included) before the run fails.
const MAX_PHASE_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Invocation / outcomes
// ---------------------------------------------------------------------------

/// Operator decision carried by a resume invocation.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Clear the interrupt and continue; an optional payload of operator
    /// selections is appended to the approved artifact.
    Approve { payload: Option<String> },
    /// Re-open the interrupted phase; `reason` joins the feedback fed into
    /// its re-run prompt.
    Reject { reason: String },
}

/// How this worker process was asked to drive the graph.
#[derive(Debug, Clone)]
pub enum Invocation {
    /// Fresh run from a newly built state.
    Start(GraphState),
    /// Continue a checkpointed run after an operator decision.
    Resume(Decision),
}

/// Terminal result of one engine invocation. Failures are `Err` — by the
/// time the caller sees them the run record is already marked failed.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    Completed,
    WaitingApproval { phase: Phase },
}

// ---------------------------------------------------------------------------
// MergeReport
// ---------------------------------------------------------------------------

/// Schema for the merge phase's structured output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeReport {
    pub summary: String,
    pub commits: Vec<String>,
    pub conflicts: Vec<String>,
}

// ---------------------------------------------------------------------------
// CiHarness
// ---------------------------------------------------------------------------

/// CI + git wiring for the post-merge watch-fix loop. Absent in tests and
/// in repositories without CI.
pub struct CiHarness<'a> {
    pub provider: &'a dyn CiProvider,
    pub git: &'a dyn GitOps,
    pub config: CiConfig,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The checkpointed graph engine.
///
/// Walks the fixed phase sequence from wherever the checkpoint says the run
/// stands, persisting state after every node, so that a crashed or paused
/// run resumes in an equivalent worker process without re-running completed
/// work.
pub struct Engine<'a, E: AgentExecutor> {
    executor: &'a E,
    checkpoints: CheckpointStore,
    ctx: &'a WorkerContext,
    ci: Option<CiHarness<'a>>,
}

impl<'a, E: AgentExecutor> Engine<'a, E> {
    pub fn new(executor: &'a E, checkpoints: CheckpointStore, ctx: &'a WorkerContext) -> Self {
        Self {
            executor,
            checkpoints,
            ctx,
            ci: None,
        }
    }

    pub fn with_ci(mut self, harness: CiHarness<'a>) -> Self {
        self.ci = Some(harness);
        self
    }

    /// Drive the graph to its next stopping point: an approval pause,
    /// completion, or failure. The run record is updated before returning.
    pub async fn invoke(&self, invocation: Invocation, thread_id: &str) -> Result<EngineOutcome> {
        match self.run(invocation, thread_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(mark) = self.ctx.mark_failed(&e.to_string()) {
                    tracing::warn!(error = %mark, "failed to record run failure");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, invocation: Invocation, thread_id: &str) -> Result<EngineOutcome> {
        let mut state = match invocation {
            Invocation::Start(state) => {
                self.ctx.bus().emit(RunEvent::RunStarted {
                    run_id: self.ctx.run_id().to_string(),
                });
                self.checkpoints.save(thread_id, &state)?;
                state
            }
            Invocation::Resume(decision) => {
                let mut state = self.checkpoints.load(thread_id)?;
                self.apply_decision(&mut state, decision)?;
                self.checkpoints.save(thread_id, &state)?;
                state
            }
        };

        loop {
            let Some(phase) = state.next_phase() else {
                return self.finish(&mut state, thread_id).await;
            };

            self.ctx.report_node_start(phase)?;
            let result = match phase {
                Phase::Merge => self.merge_node(&mut state).await,
                _ => self.document_node(phase, &mut state).await,
            };

            match result {
                Ok(()) => {
                    if self.pauses_after(phase, &state) {
                        state.interrupted_at = Some(phase);
                        self.checkpoints.save(thread_id, &state)?;
                        self.ctx.mark_waiting_approval(phase)?;
                        return Ok(EngineOutcome::WaitingApproval { phase });
                    }
                    self.checkpoints.save(thread_id, &state)?;
                }
                Err(e) => {
                    let attempt = state.bump_retry(phase);
                    state
                        .messages
                        .push(format!("Previous {phase} attempt failed: {e}"));
                    self.checkpoints.save(thread_id, &state)?;
                    if attempt >= MAX_PHASE_ATTEMPTS {
                        return Err(CoreError::PhaseFailed {
                            phase: phase.to_string(),
                            reason: format!("{e} (after {attempt} attempts)"),
                        });
                    }
                    tracing::warn!(%phase, attempt, error = %e, "node failed; retrying");
                }
            }
        }
    }

    /// Whether the graph stops for approval after `phase` completes.
    ///
    /// An interrupt holds the graph before its next step, so a closed gate
    /// only pauses when something follows: a successor node, or the push/CI
    /// follow-up after merge. A gated final node with no follow-up simply
    /// completes the run.
    fn pauses_after(&self, phase: Phase, state: &GraphState) -> bool {
        if state.gates.is_open(phase) {
            return false;
        }
        phase.next().is_some() || self.ci.is_some()
    }

    /// All phases done: run the CI loop if wired, then close out the run.
    async fn finish(&self, state: &mut GraphState, thread_id: &str) -> Result<EngineOutcome> {
        if let Some(ci) = &self.ci {
            let spec = std::fs::read_to_string(&state.spec_path)?;
            let outcome = watch_and_fix(
                self.executor,
                ci.provider,
                ci.git,
                &ci.config,
                state,
                &self.checkpoints,
                thread_id,
                summary(&spec),
                |attempt, max| self.ctx.emit_ci_attempt(attempt, max),
            )
            .await?;
            match outcome {
                CiOutcome::Green => {}
                CiOutcome::Exhausted { attempts } => {
                    return Err(CoreError::Ci(format!(
                        "fix attempts exhausted after {attempts}; branch left for manual follow-up"
                    )));
                }
                CiOutcome::TimedOut { attempts } => {
                    return Err(CoreError::Ci(format!(
                        "polling timed out on fix attempt {attempts}"
                    )));
                }
            }
        }

        self.checkpoints.save(thread_id, state)?;
        self.ctx.mark_completed()?;
        Ok(EngineOutcome::Completed)
    }

    /// Markdown-producing node: prompt, validate, persist the artifact.
    async fn document_node(&self, phase: Phase, state: &mut GraphState) -> Result<()> {
        let spec = std::fs::read_to_string(&state.spec_path)?;
        let artifacts = load_artifacts(state)?;
        let mut request = ExecutionRequest::new(prompts::phase_prompt(phase, &spec, state, &artifacts));
        request.cwd = state.worktree_path.clone();

        let response = self.executor.execute(&request).await?;
        if response.is_error {
            return Err(CoreError::PhaseFailed {
                phase: phase.to_string(),
                reason: "agent ended with an error result".to_string(),
            });
        }
        validate::validate_artifact(phase, &response.text).map_err(|reason| {
            CoreError::PhaseFailed {
                phase: phase.to_string(),
                reason,
            }
        })?;

        let path = state.artifact_path(phase);
        crate::io::atomic_write(&path, response.text.as_bytes())?;
        state.record_artifact(phase, path);
        state.mark_completed(phase);

        if phase == Phase::Implement && state.gates.push_on_implementation_complete {
            if let Some(ci) = &self.ci {
                ci.git.push()?;
            }
        }
        Ok(())
    }

    /// Merge node: structured YAML report instead of a markdown document.
    async fn merge_node(&self, state: &mut GraphState) -> Result<()> {
        let spec = std::fs::read_to_string(&state.spec_path)?;
        let artifacts = load_artifacts(state)?;
        let mut request =
            ExecutionRequest::new(prompts::merge_prompt(&spec, state, &artifacts));
        request.cwd = state.worktree_path.clone();

        let caller = StructuredCaller::new(self.executor);
        let (report, raw): (MergeReport, String) = caller.call_yaml(&request).await?;
        if !report.conflicts.is_empty() {
            tracing::info!(
                conflicts = report.conflicts.len(),
                "merge resolved conflicts"
            );
        }

        let path = state.artifact_path(Phase::Merge);
        crate::io::atomic_write(&path, raw.as_bytes())?;
        state.record_artifact(Phase::Merge, path);
        state.mark_completed(Phase::Merge);
        Ok(())
    }

    fn apply_decision(&self, state: &mut GraphState, decision: Decision) -> Result<()> {
        match decision {
            Decision::Approve { payload } => {
                let phase = state.approve()?;
                if let Some(payload) = payload {
                    append_selections(state, phase, &payload)?;
                }
                self.ctx.record_decision(ApprovalStatus::Approved, false)?;
                tracing::info!(%phase, "approval accepted; resuming");
            }
            Decision::Reject { reason } => {
                let phase = state.reject(reason)?;
                self.ctx.record_decision(ApprovalStatus::Rejected, true)?;
                tracing::info!(%phase, "rejection accepted; phase will re-run");
            }
        }
        Ok(())
    }
}

/// Artifact contents of completed phases, in graph order.
fn load_artifacts(state: &GraphState) -> Result<Vec<(Phase, String)>> {
    let mut out = Vec::new();
    for (phase, path) in &state.artifacts {
        if path.exists() {
            out.push((*phase, std::fs::read_to_string(path)?));
        }
    }
    Ok(out)
}

/// Append an operator-selections block to the approved artifact, so the
/// payload flows into downstream phase prompts with the artifact itself.
fn append_selections(state: &GraphState, phase: Phase, payload: &str) -> Result<()> {
    let path = state.artifact_path(phase);
    let mut content = if path.exists() {
        std::fs::read_to_string(&path)?
    } else {
        String::new()
    };
    content.push_str(&format!(
        "\n\n## Operator selections\n\n```yaml\n{}\n```\n",
        payload.trim()
    ));
    crate::io::atomic_write(&path, content.as_bytes())
}

/// Head of the spec used as context in CI fix prompts.
fn summary(spec: &str) -> &str {
    let mut end = spec.len().min(2_000);
    while !spec.is_char_boundary(end) {
        end -= 1;
    }
    &spec[..end]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
