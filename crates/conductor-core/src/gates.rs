use serde::{Deserialize, Serialize};

use crate::types::Phase;

// ---------------------------------------------------------------------------
// ApprovalGates
// ---------------------------------------------------------------------------

/// Per-run approval-gate configuration, immutable once the run is launched.
///
/// Gates map one-to-one to graph nodes: `allow_prd` → requirements,
/// `allow_plan` → plan, `allow_merge` → merge. `true` auto-approves the
/// node's completion; `false` pauses the graph for a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalGates {
    #[serde(default = "default_open")]
    pub allow_prd: bool,
    #[serde(default = "default_open")]
    pub allow_plan: bool,
    #[serde(default = "default_open")]
    pub allow_merge: bool,
    /// Push the branch when the implement phase completes.
    #[serde(default)]
    pub push_on_implementation_complete: bool,
}

fn default_open() -> bool {
    true
}

impl Default for ApprovalGates {
    fn default() -> Self {
        Self {
            allow_prd: true,
            allow_plan: true,
            allow_merge: true,
            push_on_implementation_complete: false,
        }
    }
}

impl ApprovalGates {
    /// All gates closed — every gated node pauses for approval.
    pub fn all_closed() -> Self {
        Self {
            allow_prd: false,
            allow_plan: false,
            allow_merge: false,
            push_on_implementation_complete: false,
        }
    }

    /// Whether `phase` may proceed past its completion without pausing.
    /// Ungated phases are always open.
    pub fn is_open(&self, phase: Phase) -> bool {
        match phase {
            Phase::Requirements => self.allow_prd,
            Phase::Plan => self.allow_plan,
            Phase::Merge => self.allow_merge,
            Phase::Analyze | Phase::Research | Phase::Implement => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
