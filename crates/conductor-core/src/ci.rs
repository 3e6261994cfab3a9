use std::path::PathBuf;
use std::time::Duration;

use conductor_agent::{AgentExecutor, ExecutionRequest};
use serde::Deserialize;
use tokio::time::Instant;

use crate::checkpoint::{CheckpointStore, GraphState};
use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// CiStatus / traits
// ---------------------------------------------------------------------------

/// Result of a single CI probe for a branch.
#[derive(Debug, Clone, PartialEq)]
pub enum CiStatus {
    Success,
    Failure { log: String },
    Pending,
}

/// CI backend seam. Real implementations shell out to a forge CLI; tests
/// script the sequence of probe results.
pub trait CiProvider: Send + Sync {
    fn poll(&self, branch: &str) -> Result<CiStatus>;
}

/// Git operations needed by the fix loop.
pub trait GitOps: Send + Sync {
    fn commit_all(&self, message: &str) -> Result<()>;
    fn push(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// CiConfig / CiOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CiConfig {
    /// Maximum number of fix attempts per merge invocation.
    pub max_attempts: u32,
    pub poll_interval: Duration,
    /// Budget for one settle cycle; expiry consumes a failed attempt.
    pub poll_timeout: Duration,
    /// Character budget for the failure log embedded in the fix prompt.
    /// Truncated from the head: the tail of a CI log is the relevant part.
    pub log_budget: usize,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            poll_interval: Duration::from_secs(15),
            poll_timeout: Duration::from_secs(30 * 60),
            log_budget: 50_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CiOutcome {
    Green,
    /// Fix attempts exhausted; the branch is left as-is for manual
    /// follow-up. The loop never force-merges.
    Exhausted { attempts: u32 },
    /// Polling timed out; one attempt was consumed.
    TimedOut { attempts: u32 },
}

// ---------------------------------------------------------------------------
// watch_and_fix
// ---------------------------------------------------------------------------

/// Bounded CI watch-fix loop, invoked after a successful merge-phase push.
///
/// Polls CI; on failure, prompts the agent with the truncated failure log,
/// commits `fix(ci): attempt <n>/<max>`, pushes, and re-polls. The attempt
/// counter lives in the checkpointed [`GraphState`], so the loop survives a
/// worker restart. `notify` fires once per consumed attempt.
#[allow(clippy::too_many_arguments)]
pub async fn watch_and_fix<E: AgentExecutor>(
    executor: &E,
    provider: &dyn CiProvider,
    git: &dyn GitOps,
    config: &CiConfig,
    state: &mut GraphState,
    checkpoints: &CheckpointStore,
    thread_id: &str,
    spec_summary: &str,
    mut notify: impl FnMut(u32, u32),
) -> Result<CiOutcome> {
    let branch = state
        .branch
        .clone()
        .unwrap_or_else(|| format!("feature/{}", state.feature_id));

    loop {
        match poll_until_settled(provider, &branch, config).await? {
            CiStatus::Success => return Ok(CiOutcome::Green),
            CiStatus::Pending => {
                state.ci_attempt += 1;
                checkpoints.save(thread_id, state)?;
                return Ok(CiOutcome::TimedOut {
                    attempts: state.ci_attempt,
                });
            }
            CiStatus::Failure { log } => {
                if state.ci_attempt >= config.max_attempts {
                    return Ok(CiOutcome::Exhausted {
                        attempts: state.ci_attempt,
                    });
                }
                state.ci_attempt += 1;
                let attempt = state.ci_attempt;
                checkpoints.save(thread_id, state)?;
                notify(attempt, config.max_attempts);

                let prompt = build_fix_prompt(
                    &log,
                    spec_summary,
                    attempt,
                    config.max_attempts,
                    config.log_budget,
                );
                let mut request = ExecutionRequest::new(prompt);
                request.cwd = state.worktree_path.clone();
                executor.execute(&request).await?;

                git.commit_all(&format!("fix(ci): attempt {attempt}/{}", config.max_attempts))?;
                git.push()?;
            }
        }
    }
}

async fn poll_until_settled(
    provider: &dyn CiProvider,
    branch: &str,
    config: &CiConfig,
) -> Result<CiStatus> {
    let deadline = Instant::now() + config.poll_timeout;
    loop {
        match provider.poll(branch)? {
            CiStatus::Pending => {
                if Instant::now() >= deadline {
                    return Ok(CiStatus::Pending);
                }
                tokio::time::sleep(config.poll_interval).await;
            }
            settled => return Ok(settled),
        }
    }
}

fn build_fix_prompt(
    log: &str,
    spec_summary: &str,
    attempt: u32,
    max_attempts: u32,
    log_budget: usize,
) -> String {
    format!(
        "CI is failing on this branch. This is fix attempt {attempt} of \
         {max_attempts}.\n\n\
         Feature summary:\n{spec_summary}\n\n\
         CI failure log (most recent output last):\n\
         ```\n{}\n```\n\n\
         Diagnose the failure and fix it. Modify only what the failure \
         requires.",
        truncate_head(log, log_budget)
    )
}

/// Keep the last `budget` bytes of `text`, cutting on a char boundary.
/// The head is dropped because the tail of a CI log carries the failure.
fn truncate_head(text: &str, budget: usize) -> &str {
    if text.len() <= budget {
        return text;
    }
    let cut = text.len() - budget;
    let start = (cut..text.len())
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0);
    &text[start..]
}

// ---------------------------------------------------------------------------
// Subprocess-backed implementations
// ---------------------------------------------------------------------------

/// `GitOps` over the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitCli {
    pub cwd: PathBuf,
}

impl GitCli {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(&self.cwd)
            .output()?;
        if !output.status.success() {
            return Err(CoreError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl GitOps for GitCli {
    fn commit_all(&self, message: &str) -> Result<()> {
        self.run(&["add", "-A"])?;
        self.run(&["commit", "-m", message])
    }

    fn push(&self) -> Result<()> {
        self.run(&["push"])
    }
}

/// `CiProvider` over the `gh` CLI: latest workflow run for the branch.
#[derive(Debug, Clone)]
pub struct GhCiProvider {
    pub cwd: PathBuf,
}

#[derive(Debug, Deserialize)]
struct GhRun {
    #[serde(default)]
    status: String,
    #[serde(default)]
    conclusion: String,
    #[serde(rename = "databaseId", default)]
    database_id: u64,
}

impl GhCiProvider {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    fn failure_log(&self, run_id: u64) -> String {
        let output = std::process::Command::new("gh")
            .args(["run", "view", &run_id.to_string(), "--log-failed"])
            .current_dir(&self.cwd)
            .output();
        match output {
            Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).into_owned(),
            Ok(o) => String::from_utf8_lossy(&o.stderr).into_owned(),
            Err(e) => format!("failed to fetch CI log: {e}"),
        }
    }
}

impl CiProvider for GhCiProvider {
    fn poll(&self, branch: &str) -> Result<CiStatus> {
        let output = std::process::Command::new("gh")
            .args([
                "run",
                "list",
                "--branch",
                branch,
                "--limit",
                "1",
                "--json",
                "status,conclusion,databaseId",
            ])
            .current_dir(&self.cwd)
            .output()?;
        if !output.status.success() {
            return Err(CoreError::Ci(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let runs: Vec<GhRun> = serde_json::from_slice(&output.stdout)?;
        let Some(run) = runs.first() else {
            // No workflow runs yet for this branch.
            return Ok(CiStatus::Pending);
        };
        if run.status != "completed" {
            return Ok(CiStatus::Pending);
        }
        if run.conclusion == "success" {
            Ok(CiStatus::Success)
        } else {
            Ok(CiStatus::Failure {
                log: self.failure_log(run.database_id),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
