//! `conductor-agent` — driver for the coding-agent subprocess.
//!
//! The rest of the workspace talks to the agent through the
//! [`AgentExecutor`] trait: one prompt in, one text response out. The real
//! implementation ([`ClaudeExecutor`]) shells out to the `claude` CLI in
//! single-shot JSON mode; tests use [`ScriptedExecutor`], which replays
//! canned responses and records every prompt it was given.
//!
//! [`StructuredCaller`] layers schema-constrained output on top of any
//! executor: it asks for YAML, strips code fences, and re-prompts with the
//! parse error (bounded) when the agent returns something unparsable.

pub mod claude;
pub mod error;
pub mod executor;
pub mod scripted;
pub mod structured;

pub use claude::ClaudeExecutor;
pub use error::AgentError;
pub use executor::{AgentExecutor, ExecutionRequest, ExecutionResponse};
pub use scripted::ScriptedExecutor;
pub use structured::StructuredCaller;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentError>;
