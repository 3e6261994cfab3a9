use crate::checkpoint::GraphState;
use crate::types::Phase;

// ---------------------------------------------------------------------------
// Phase prompts
// ---------------------------------------------------------------------------

/// Prompt for a markdown-producing phase. Layers, in order: the phase
/// instruction, the feature specification, every prior artifact, and the
/// accumulated feedback messages.
pub fn phase_prompt(
    phase: Phase,
    spec: &str,
    state: &GraphState,
    artifacts: &[(Phase, String)],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(instruction(phase));
    prompt.push_str("\n\n## Feature specification\n\n");
    prompt.push_str(spec);

    for (prior, content) in artifacts {
        if content.trim().is_empty() {
            continue;
        }
        prompt.push_str(&format!(
            "\n\n## Prior artifact: {}\n\n{content}",
            prior.artifact_filename()
        ));
    }

    if !state.messages.is_empty() {
        prompt.push_str("\n\n## Feedback\n");
        for message in &state.messages {
            prompt.push_str(&format!("\n- {message}"));
        }
    }

    prompt
}

/// Prompt for the merge phase, whose output is a YAML report rather than a
/// markdown document.
pub fn merge_prompt(spec: &str, state: &GraphState, artifacts: &[(Phase, String)]) -> String {
    let mut prompt = phase_prompt(Phase::Merge, spec, state, artifacts);
    prompt.push_str(
        "\n\nRespond with only a YAML document describing the merge:\n\
         summary: <one-line summary of what was merged>\n\
         commits: [<commit subjects included>]\n\
         conflicts: [<files that needed conflict resolution, if any>]",
    );
    prompt
}

fn instruction(phase: Phase) -> &'static str {
    match phase {
        Phase::Analyze => {
            "Analyze the repository in light of the feature specification below. \
             Survey the relevant modules, existing patterns to follow, and risks. \
             Respond with a markdown analysis document."
        }
        Phase::Requirements => {
            "Write a product requirements document for the feature specified \
             below, grounded in the prior analysis. Include an \
             '## Acceptance Criteria' section with testable criteria. \
             Respond with the markdown document only."
        }
        Phase::Research => {
            "Research how to implement the requirements below: candidate \
             approaches, libraries already in the repository, and tradeoffs. \
             Respond with a markdown research document."
        }
        Phase::Plan => {
            "Write an implementation plan for the requirements below, informed \
             by the research. Include a '## Tasks' section with an ordered task \
             list. Respond with the markdown document only."
        }
        Phase::Implement => {
            "Execute the implementation plan below in this working tree: write \
             the code and tests, committing as you go. Respond with markdown \
             implementation notes describing what was built and any deviations \
             from the plan."
        }
        Phase::Merge => {
            "Prepare this branch for merge: rebase onto the target branch, \
             resolve conflicts, and verify the tree builds."
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::ApprovalGates;

    fn state() -> GraphState {
        GraphState::new("auth", "spec.md", "specs/auth", ApprovalGates::default())
    }

    #[test]
    fn prompt_layers_spec_artifacts_and_feedback() {
        let mut s = state();
        s.messages.push("Reviewer feedback on plan: too vague".into());

        let artifacts = vec![(Phase::Analyze, "# Analysis\n\nfindings".to_string())];
        let prompt = phase_prompt(Phase::Plan, "the spec text", &s, &artifacts);

        assert!(prompt.contains("implementation plan"));
        assert!(prompt.contains("the spec text"));
        assert!(prompt.contains("Prior artifact: analysis.md"));
        assert!(prompt.contains("too vague"));
    }

    #[test]
    fn empty_artifacts_are_skipped() {
        let artifacts = vec![(Phase::Analyze, "   ".to_string())];
        let prompt = phase_prompt(Phase::Requirements, "spec", &state(), &artifacts);
        assert!(!prompt.contains("Prior artifact"));
    }

    #[test]
    fn merge_prompt_demands_yaml() {
        let prompt = merge_prompt("spec", &state(), &[]);
        assert!(prompt.contains("only a YAML document"));
        assert!(prompt.contains("summary:"));
    }
}
