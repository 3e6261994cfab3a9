mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::feature::FeatureSubcommand;
use cmd::worker::WorkerArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "conductor",
    about = "Checkpointed SDLC orchestration — drive a coding agent from analysis to merge",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .conductor/ or .git/)
    #[arg(long, global = true, env = "CONDUCTOR_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage features
    Feature {
        #[command(subcommand)]
        subcommand: FeatureSubcommand,
    },

    /// Start a detached orchestration run for a feature
    Launch { feature: String },

    /// Approve the pending gate on a waiting run
    Approve {
        run_id: String,
        /// Operator selections (YAML) appended to the approved artifact
        #[arg(long)]
        payload: Option<String>,
    },

    /// Reject the pending gate; the phase re-runs with this feedback
    Reject {
        run_id: String,
        #[arg(long)]
        reason: String,
    },

    /// Stop a run, terminating its worker if one is alive
    Stop { run_id: String },

    /// Start a fresh invocation of a finished run
    Relaunch { run_id: String },

    /// List runs, reconciling records against live worker processes
    Runs,

    /// Internal: run the graph worker for one run (spawned by launch/approve)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Worker(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Feature { subcommand } => cmd::feature::run(&root, subcommand, cli.json),
        Commands::Launch { feature } => cmd::run::launch(&root, &feature, cli.json),
        Commands::Approve { run_id, payload } => cmd::run::approve(&root, &run_id, payload),
        Commands::Reject { run_id, reason } => cmd::run::reject(&root, &run_id, &reason),
        Commands::Stop { run_id } => cmd::run::stop(&root, &run_id),
        Commands::Relaunch { run_id } => cmd::run::relaunch(&root, &run_id, cli.json),
        Commands::Runs => cmd::run::list(&root, cli.json),
        Commands::Worker(args) => cmd::worker::run(&root, args),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
