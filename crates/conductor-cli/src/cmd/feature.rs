use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;
use conductor_core::feature::{Feature, FeatureStore};
use conductor_core::gates::ApprovalGates;
use conductor_core::types::Lifecycle;

use crate::output;

#[derive(Subcommand)]
pub enum FeatureSubcommand {
    /// Register a feature and its specification
    Create {
        /// Feature id (lowercase alphanumerics and hyphens)
        id: String,

        /// Path to the feature specification document
        #[arg(long)]
        spec: PathBuf,

        /// Parent feature this one is blocked on
        #[arg(long)]
        parent: Option<String>,

        /// Pause for approval after the requirements phase
        #[arg(long)]
        require_prd_approval: bool,

        /// Pause for approval after the plan phase
        #[arg(long)]
        require_plan_approval: bool,

        /// Pause for approval after the merge phase
        #[arg(long)]
        require_merge_approval: bool,

        /// Push the branch when the implement phase completes
        #[arg(long)]
        push_on_implementation: bool,
    },

    /// List features
    List,

    /// Show one feature
    Show { id: String },
}

pub fn run(root: &Path, subcommand: FeatureSubcommand, json: bool) -> anyhow::Result<()> {
    let store = FeatureStore::new(root);
    match subcommand {
        FeatureSubcommand::Create {
            id,
            spec,
            parent,
            require_prd_approval,
            require_plan_approval,
            require_merge_approval,
            push_on_implementation,
        } => {
            let mut feature = Feature::new(&id, spec, root);
            feature.approval_gates = ApprovalGates {
                allow_prd: !require_prd_approval,
                allow_plan: !require_plan_approval,
                allow_merge: !require_merge_approval,
                push_on_implementation_complete: push_on_implementation,
            };
            if let Some(parent) = parent {
                store
                    .find_by_id(&parent)
                    .with_context(|| format!("parent feature '{parent}'"))?;
                feature.parent_id = Some(parent);
                feature.lifecycle = Lifecycle::Blocked;
            }
            store.create(&feature)?;

            if json {
                output::print_json(&feature)?;
            } else {
                println!("created feature {id} ({})", feature.lifecycle);
            }
            Ok(())
        }

        FeatureSubcommand::List => {
            let features = store.list()?;
            if json {
                return output::print_json(&features);
            }
            let rows = features
                .iter()
                .map(|f| {
                    vec![
                        f.id.clone(),
                        f.lifecycle.to_string(),
                        f.agent_run_id.clone().unwrap_or_default(),
                        f.spec_path.display().to_string(),
                    ]
                })
                .collect();
            output::print_table(&["ID", "LIFECYCLE", "RUN", "SPEC"], rows);
            Ok(())
        }

        FeatureSubcommand::Show { id } => {
            let feature = store.find_by_id(&id)?;
            if json {
                output::print_json(&feature)?;
            } else {
                println!("{id}");
                println!("  lifecycle: {}", feature.lifecycle);
                println!("  spec:      {}", feature.spec_path.display());
                if let Some(run) = &feature.agent_run_id {
                    println!("  run:       {run}");
                }
                if let Some(parent) = &feature.parent_id {
                    println!("  parent:    {parent}");
                }
            }
            Ok(())
        }
    }
}
