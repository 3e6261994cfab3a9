use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("feature not found: {0}")]
    FeatureNotFound(String),

    #[error("feature already exists: {0}")]
    FeatureExists(String),

    #[error("checkpoint not found for thread: {0}")]
    CheckpointNotFound(String),

    #[error("invalid id '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidId(String),

    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("invalid status transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("phase '{phase}' failed: {reason}")]
    PhaseFailed { phase: String, reason: String },

    #[error("cannot resume: {0}")]
    Resume(String),

    #[error("git operation failed: {0}")]
    Git(String),

    #[error("ci provider error: {0}")]
    Ci(String),

    #[error(transparent)]
    Agent(#[from] conductor_agent::AgentError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
