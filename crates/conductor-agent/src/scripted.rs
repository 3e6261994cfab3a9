use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::executor::{AgentExecutor, ExecutionRequest, ExecutionResponse};
use crate::{AgentError, Result};

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// Deterministic executor for tests: replays canned responses in order and
/// records every prompt it was given.
///
/// When the script runs out, the last response repeats (an empty script
/// always returns empty text). `Err` entries are surfaced as process errors.
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: Mutex<Vec<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    /// Executor that returns `text` for every call.
    pub fn always(text: impl Into<String>) -> Self {
        Self::from_script(vec![Ok(text.into())])
    }

    /// Executor that replays `responses` in order.
    pub fn from_script(responses: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `execute` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// All prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());

        let responses = self.responses.lock().unwrap();
        let entry = responses
            .get(n)
            .or_else(|| responses.last())
            .cloned()
            .unwrap_or(Ok(String::new()));
        drop(responses);

        match entry {
            Ok(text) => Ok(ExecutionResponse {
                text,
                is_error: false,
                num_turns: 1,
                total_cost_usd: 0.0,
            }),
            Err(msg) => Err(AgentError::Process(msg)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_repeats_last() {
        let exec = ScriptedExecutor::from_script(vec![Ok("one".into()), Ok("two".into())]);
        assert_eq!(
            exec.execute(&ExecutionRequest::new("a")).await.unwrap().text,
            "one"
        );
        assert_eq!(
            exec.execute(&ExecutionRequest::new("b")).await.unwrap().text,
            "two"
        );
        assert_eq!(
            exec.execute(&ExecutionRequest::new("c")).await.unwrap().text,
            "two"
        );
        assert_eq!(exec.call_count(), 3);
        assert_eq!(exec.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_script_returns_empty_text() {
        let exec = ScriptedExecutor::default();
        let resp = exec.execute(&ExecutionRequest::new("x")).await.unwrap();
        assert_eq!(resp.text, "");
    }

    #[tokio::test]
    async fn err_entries_become_process_errors() {
        let exec = ScriptedExecutor::from_script(vec![Err("boom".into())]);
        let err = exec.execute(&ExecutionRequest::new("x")).await.unwrap_err();
        assert!(matches!(err, AgentError::Process(m) if m == "boom"));
    }
}
