use std::path::PathBuf;

use async_trait::async_trait;

use crate::Result;

// ---------------------------------------------------------------------------
// ExecutionRequest
// ---------------------------------------------------------------------------

/// A single prompt for the coding agent.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// The user-facing prompt the agent acts on.
    pub prompt: String,
    /// Optional system prompt override.
    pub system_prompt: Option<String>,
    /// Working directory for the agent process (usually the worktree).
    pub cwd: Option<PathBuf>,
    /// Turn cap forwarded to the agent, if it supports one.
    pub max_turns: Option<u32>,
}

impl ExecutionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

// ---------------------------------------------------------------------------
// ExecutionResponse
// ---------------------------------------------------------------------------

/// The terminal result of one agent invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResponse {
    /// Final text the agent produced (empty for error subtypes).
    pub text: String,
    /// `true` if the agent run ended with an error subtype (max turns,
    /// budget exceeded, etc.).
    pub is_error: bool,
    pub num_turns: u32,
    pub total_cost_usd: f64,
}

// ---------------------------------------------------------------------------
// AgentExecutor
// ---------------------------------------------------------------------------

/// The seam between the orchestration core and the underlying coding agent.
///
/// Implementations must be safe to call repeatedly from a single worker;
/// the engine never issues concurrent calls.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse>;
}
