use crate::types::Phase;

// ---------------------------------------------------------------------------
// Artifact validation
// ---------------------------------------------------------------------------

/// Structural check applied to a phase artifact before it is accepted.
///
/// Empty artifacts pass: an agent that legitimately finds nothing to say for
/// a phase must not wedge the graph in a retry loop. Non-empty artifacts
/// must be markdown with at least one heading, plus the phase's required
/// sections. The error string is fed back into the retry prompt.
pub fn validate_artifact(phase: Phase, content: &str) -> std::result::Result<(), String> {
    if content.trim().is_empty() {
        return Ok(());
    }

    if !content.lines().any(|l| l.trim_start().starts_with('#')) {
        return Err(format!(
            "{} artifact has no markdown headings",
            phase.artifact_filename()
        ));
    }

    for section in required_sections(phase) {
        if !has_section(content, section) {
            return Err(format!(
                "{} is missing a '{section}' section",
                phase.artifact_filename()
            ));
        }
    }

    Ok(())
}

/// Section headings a non-empty artifact must carry. Merge is absent here:
/// its output is schema-checked YAML, not a markdown document.
fn required_sections(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::Requirements => &["Acceptance Criteria"],
        Phase::Plan => &["Tasks"],
        Phase::Analyze | Phase::Research | Phase::Implement | Phase::Merge => &[],
    }
}

fn has_section(content: &str, section: &str) -> bool {
    let needle = section.to_ascii_lowercase();
    content.lines().any(|l| {
        let l = l.trim_start();
        l.starts_with('#') && l.to_ascii_lowercase().contains(&needle)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
