use std::path::Path;

use anyhow::bail;
use conductor_core::supervisor::{OpOutcome, OsProcessControl, Supervisor};

use crate::output;

fn supervisor(root: &Path) -> anyhow::Result<Supervisor> {
    let program = std::env::current_exe()?;
    Ok(Supervisor::new(root, program, Box::new(OsProcessControl)))
}

fn report(action: &str, run_id: &str, outcome: OpOutcome) -> anyhow::Result<()> {
    if outcome.ok {
        println!("{action} accepted for {run_id}");
        Ok(())
    } else {
        bail!(
            "{action} refused for {run_id}: {}",
            outcome.reason.unwrap_or_default()
        )
    }
}

pub fn launch(root: &Path, feature_id: &str, json: bool) -> anyhow::Result<()> {
    let run = supervisor(root)?.launch(feature_id)?;
    if json {
        output::print_json(&run)?;
    } else {
        println!("launched {} (pid {})", run.id, run.pid.unwrap_or(0));
    }
    Ok(())
}

pub fn approve(root: &Path, run_id: &str, payload: Option<String>) -> anyhow::Result<()> {
    let outcome = supervisor(root)?.approve(run_id, payload)?;
    report("approve", run_id, outcome)
}

pub fn reject(root: &Path, run_id: &str, reason: &str) -> anyhow::Result<()> {
    let outcome = supervisor(root)?.reject(run_id, reason)?;
    report("reject", run_id, outcome)
}

pub fn stop(root: &Path, run_id: &str) -> anyhow::Result<()> {
    let outcome = supervisor(root)?.stop(run_id)?;
    report("stop", run_id, outcome)
}

pub fn relaunch(root: &Path, run_id: &str, json: bool) -> anyhow::Result<()> {
    let run = supervisor(root)?.relaunch(run_id)?;
    if json {
        output::print_json(&run)?;
    } else {
        println!("relaunched {} (pid {})", run.id, run.pid.unwrap_or(0));
    }
    Ok(())
}

pub fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let sup = supervisor(root)?;
    // Reconcile records against live processes before showing them, so a
    // crashed worker surfaces as `interrupted` rather than a stale `running`.
    let marked = sup.check_and_mark_crashed()?;
    for run_id in &marked {
        tracing::warn!(%run_id, "worker crashed; run marked interrupted");
    }

    let runs = sup.runs().list()?;
    if json {
        return output::print_json(&runs);
    }
    let rows = runs
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                r.feature_id.clone(),
                r.status.to_string(),
                r.result.clone().unwrap_or_default(),
                r.pid.map(|p| p.to_string()).unwrap_or_default(),
                r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    output::print_table(&["ID", "FEATURE", "STATUS", "NODE", "PID", "UPDATED"], rows);
    Ok(())
}
