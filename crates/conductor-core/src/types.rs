use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One node of the fixed SDLC graph, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analyze,
    Requirements,
    Research,
    Plan,
    Implement,
    Merge,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Analyze,
            Phase::Requirements,
            Phase::Research,
            Phase::Plan,
            Phase::Implement,
            Phase::Merge,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Phase> {
        Phase::all().get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Analyze => "analyze",
            Phase::Requirements => "requirements",
            Phase::Research => "research",
            Phase::Plan => "plan",
            Phase::Implement => "implement",
            Phase::Merge => "merge",
        }
    }

    /// Artifact file written by this phase, relative to the spec directory.
    pub fn artifact_filename(self) -> &'static str {
        match self {
            Phase::Analyze => "analysis.md",
            Phase::Requirements => "requirements.md",
            Phase::Research => "research.md",
            Phase::Plan => "plan.md",
            Phase::Implement => "implementation.md",
            Phase::Merge => "merge.md",
        }
    }

    /// The SDLC lifecycle stage a feature is in while this phase executes.
    ///
    /// Exhaustive by construction: adding a phase without a stage is a
    /// compile error.
    pub fn lifecycle(self) -> Lifecycle {
        match self {
            Phase::Analyze => Lifecycle::Analyze,
            Phase::Requirements => Lifecycle::Requirements,
            Phase::Research => Lifecycle::Research,
            Phase::Plan => Lifecycle::Planning,
            Phase::Implement => Lifecycle::Implementation,
            Phase::Merge => Lifecycle::Review,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(Phase::Analyze),
            "requirements" => Ok(Phase::Requirements),
            "research" => Ok(Phase::Research),
            "plan" => Ok(Phase::Plan),
            "implement" => Ok(Phase::Implement),
            "merge" => Ok(Phase::Merge),
            _ => Err(crate::error::CoreError::InvalidPhase(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// SDLC lifecycle stage of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Analyze,
    Requirements,
    Research,
    Planning,
    Implementation,
    Review,
    Maintain,
    Blocked,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Analyze => "analyze",
            Lifecycle::Requirements => "requirements",
            Lifecycle::Research => "research",
            Lifecycle::Planning => "planning",
            Lifecycle::Implementation => "implementation",
            Lifecycle::Review => "review",
            Lifecycle::Maintain => "maintain",
            Lifecycle::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Status of an [`crate::run::AgentRun`].
///
/// Transitions move monotonically toward the terminal set; the only way out
/// of a terminal status is an explicit relaunch that clears terminal fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    /// Worker disappeared without reaching a terminal status — outcome
    /// unknown, safely resumable. Distinct from `Failed`, which is
    /// definitive.
    Interrupted,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::WaitingApproval => "waiting_approval",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ApprovalStatus
// ---------------------------------------------------------------------------

/// Operator decision recorded on a run after an approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Rejected,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn phase_ordering_and_next() {
        assert!(Phase::Analyze < Phase::Requirements);
        assert_eq!(Phase::Analyze.next(), Some(Phase::Requirements));
        assert_eq!(Phase::Implement.next(), Some(Phase::Merge));
        assert_eq!(Phase::Merge.next(), None);
    }

    #[test]
    fn phase_roundtrip() {
        for phase in Phase::all() {
            assert_eq!(Phase::from_str(phase.as_str()).unwrap(), *phase);
        }
        assert!(Phase::from_str("deploy").is_err());
    }

    #[test]
    fn phase_lifecycle_mapping() {
        assert_eq!(Phase::Analyze.lifecycle(), Lifecycle::Analyze);
        assert_eq!(Phase::Requirements.lifecycle(), Lifecycle::Requirements);
        assert_eq!(Phase::Research.lifecycle(), Lifecycle::Research);
        assert_eq!(Phase::Plan.lifecycle(), Lifecycle::Planning);
        assert_eq!(Phase::Implement.lifecycle(), Lifecycle::Implementation);
        assert_eq!(Phase::Merge.lifecycle(), Lifecycle::Review);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Interrupted.is_terminal());
        assert!(!RunStatus::WaitingApproval.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let yaml = serde_yaml::to_string(&RunStatus::WaitingApproval).unwrap();
        assert_eq!(yaml.trim(), "waiting_approval");
    }
}
