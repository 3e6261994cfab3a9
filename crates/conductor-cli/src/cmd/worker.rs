use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Args;
use conductor_agent::ClaudeExecutor;
use conductor_core::bus::EventBus;
use conductor_core::checkpoint::{CheckpointStore, GraphState};
use conductor_core::ci::{CiConfig, GhCiProvider, GitCli};
use conductor_core::context::WorkerContext;
use conductor_core::engine::{CiHarness, Decision, Engine, EngineOutcome, Invocation};
use conductor_core::feature::{Feature, FeatureStore};
use conductor_core::gates::ApprovalGates;
use conductor_core::run::{AgentRun, RunStore};

/// Argv contract with the supervisor; see `Supervisor::spawn_worker`.
///
/// Everything beyond `--run-id` is optional on the command line: the
/// launcher always passes the full contract, and values given here take
/// precedence over what the worker reads from its own store.
#[derive(Args)]
pub struct WorkerArgs {
    #[arg(long)]
    pub run_id: String,

    #[arg(long)]
    pub feature_id: Option<String>,

    /// Checkpoint correlation key
    #[arg(long)]
    pub thread_id: Option<String>,

    #[arg(long)]
    pub repo_path: Option<PathBuf>,

    /// Feature specification document
    #[arg(long)]
    pub spec_path: Option<PathBuf>,

    #[arg(long)]
    pub worktree: Option<PathBuf>,

    /// JSON-encoded approval gates
    #[arg(long)]
    pub gates: Option<String>,

    /// Continue from the checkpoint instead of starting fresh
    #[arg(long)]
    pub resume: bool,

    /// Operator decision: approve | reject
    #[arg(long)]
    pub decision: Option<String>,

    /// Operator selections (YAML) for an approval
    #[arg(long)]
    pub resume_payload: Option<String>,

    /// Feedback for a rejection
    #[arg(long)]
    pub reason: Option<String>,
}

/// Inputs for one engine invocation, merged from the argv contract and the
/// stored records. Argv wins wherever both carry a value.
#[derive(Debug)]
struct WorkerPlan {
    thread_id: String,
    spec_path: PathBuf,
    worktree: Option<PathBuf>,
    gates: ApprovalGates,
    ci_cwd: PathBuf,
}

fn plan(args: &WorkerArgs, run: &AgentRun, feature: &Feature) -> anyhow::Result<WorkerPlan> {
    let gates = match &args.gates {
        Some(json) => serde_json::from_str(json).context("--gates")?,
        None => feature.approval_gates,
    };
    let worktree = args
        .worktree
        .clone()
        .or_else(|| feature.worktree_path.clone());
    let repo = args
        .repo_path
        .clone()
        .unwrap_or_else(|| feature.repository_path.clone());
    Ok(WorkerPlan {
        thread_id: args
            .thread_id
            .clone()
            .unwrap_or_else(|| run.thread_id.clone()),
        spec_path: args
            .spec_path
            .clone()
            .unwrap_or_else(|| feature.spec_path.clone()),
        ci_cwd: worktree.clone().unwrap_or(repo),
        worktree,
        gates,
    })
}

pub fn run(root: &Path, args: WorkerArgs) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_async(root, args))
}

async fn run_async(root: &Path, args: WorkerArgs) -> anyhow::Result<()> {
    let runs = RunStore::new(root);
    let features = FeatureStore::new(root);
    let run = runs.find_by_id(&args.run_id)?;
    let feature_id = args
        .feature_id
        .clone()
        .unwrap_or_else(|| run.feature_id.clone());
    let feature = features.find_by_id(&feature_id)?;
    let plan = plan(&args, &run, &feature)?;

    let ctx = WorkerContext::new(runs, features, EventBus::new(), &run.id, &feature_id);
    let executor = ClaudeExecutor::default();

    let git = GitCli::new(&plan.ci_cwd);
    let gh = GhCiProvider::new(&plan.ci_cwd);

    let mut engine = Engine::new(&executor, CheckpointStore::new(root), &ctx);
    if feature.branch.is_some() {
        engine = engine.with_ci(CiHarness {
            provider: &gh,
            git: &git,
            config: CiConfig::default(),
        });
    }

    let invocation = if args.resume {
        Invocation::Resume(parse_decision(&args)?)
    } else {
        let spec_dir = plan
            .spec_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| root.to_path_buf());
        let mut state = GraphState::new(&feature_id, &plan.spec_path, spec_dir, plan.gates);
        state.worktree_path = plan.worktree.clone();
        state.branch = feature.branch.clone();
        Invocation::Start(state)
    };

    match engine.invoke(invocation, &plan.thread_id).await? {
        EngineOutcome::Completed => {
            tracing::info!(run_id = %run.id, "run completed");
        }
        EngineOutcome::WaitingApproval { phase } => {
            tracing::info!(run_id = %run.id, %phase, "paused for approval");
        }
    }
    Ok(())
}

fn parse_decision(args: &WorkerArgs) -> anyhow::Result<Decision> {
    match args.decision.as_deref() {
        Some("approve") => Ok(Decision::Approve {
            payload: args.resume_payload.clone(),
        }),
        Some("reject") => Ok(Decision::Reject {
            reason: args.reason.clone().unwrap_or_default(),
        }),
        other => bail!("--resume requires --decision approve|reject, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args(run_id: &str) -> WorkerArgs {
        WorkerArgs {
            run_id: run_id.to_string(),
            feature_id: None,
            thread_id: None,
            repo_path: None,
            spec_path: None,
            worktree: None,
            gates: None,
            resume: false,
            decision: None,
            resume_payload: None,
            reason: None,
        }
    }

    fn feature() -> Feature {
        let mut f = Feature::new("auth", "specs/auth/spec.md", "/repo");
        f.worktree_path = Some("/work/auth".into());
        f
    }

    #[test]
    fn bare_argv_falls_back_to_the_store() {
        let run = AgentRun::new("r1", "auth", "claude");
        let plan = plan(&bare_args("r1"), &run, &feature()).unwrap();

        assert_eq!(plan.thread_id, "r1");
        assert_eq!(plan.spec_path, PathBuf::from("specs/auth/spec.md"));
        assert_eq!(plan.worktree, Some(PathBuf::from("/work/auth")));
        assert_eq!(plan.ci_cwd, PathBuf::from("/work/auth"));
        assert_eq!(plan.gates, ApprovalGates::default());
    }

    #[test]
    fn argv_values_win_over_the_store() {
        let run = AgentRun::new("r1", "auth", "claude");
        let mut args = bare_args("r1");
        args.thread_id = Some("t-other".into());
        args.spec_path = Some("elsewhere/spec.md".into());
        args.gates = Some(r#"{"allow_merge": false}"#.into());

        let plan = plan(&args, &run, &feature()).unwrap();

        assert_eq!(plan.thread_id, "t-other");
        assert_eq!(plan.spec_path, PathBuf::from("elsewhere/spec.md"));
        assert!(!plan.gates.allow_merge);
        assert!(plan.gates.allow_prd);
    }

    #[test]
    fn without_worktree_ci_runs_in_the_repository() {
        let run = AgentRun::new("r1", "auth", "claude");
        let mut f = feature();
        f.worktree_path = None;
        let plan = plan(&bare_args("r1"), &run, &f).unwrap();
        assert_eq!(plan.ci_cwd, PathBuf::from("/repo"));
    }

    #[test]
    fn malformed_gates_json_is_rejected() {
        let run = AgentRun::new("r1", "auth", "claude");
        let mut args = bare_args("r1");
        args.gates = Some(r#"{"allow_pr": true}"#.into());
        let err = plan(&args, &run, &feature()).unwrap_err();
        assert!(err.to_string().contains("--gates"));
    }

    #[test]
    fn resume_without_decision_is_rejected() {
        let mut args = bare_args("r1");
        args.resume = true;
        assert!(parse_decision(&args).is_err());
    }
}
