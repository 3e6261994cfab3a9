use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::executor::{AgentExecutor, ExecutionRequest, ExecutionResponse};
use crate::{AgentError, Result};

// ---------------------------------------------------------------------------
// ClaudeExecutor
// ---------------------------------------------------------------------------

/// Drives the `claude` CLI in single-shot mode:
/// `claude -p <prompt> --output-format json`.
///
/// The final line of stdout is a JSON result object; stderr is captured and
/// surfaced when the process exits non-zero.
#[derive(Debug, Clone)]
pub struct ClaudeExecutor {
    /// Path to the executable; defaults to `claude` on PATH.
    pub executable: PathBuf,
    /// Model passed via `--model`, if set.
    pub model: Option<String>,
}

impl Default for ClaudeExecutor {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("claude"),
            model: None,
        }
    }
}

impl ClaudeExecutor {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            model: None,
        }
    }

    fn build_command(&self, request: &ExecutionRequest) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg("json");

        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(sp) = &request.system_prompt {
            cmd.arg("--system-prompt").arg(sp);
        }
        if let Some(max_turns) = request.max_turns {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }

        // Works both from a terminal and from inside a running agent session.
        cmd.env_remove("CLAUDECODE");
        cmd
    }
}

/// JSON result object emitted by `claude --output-format json`.
#[derive(Debug, Deserialize)]
struct CliResult {
    #[serde(default)]
    result: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    num_turns: u32,
    #[serde(default)]
    total_cost_usd: f64,
}

/// Extract the result object from CLI stdout: the last non-empty line.
fn parse_stdout(stdout: &str) -> Result<ExecutionResponse> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| AgentError::Process("agent produced no output".into()))?;

    let parsed: CliResult =
        serde_json::from_str(line.trim()).map_err(|source| AgentError::Parse {
            line: line.trim().to_owned(),
            source,
        })?;

    Ok(ExecutionResponse {
        text: parsed.result,
        is_error: parsed.is_error,
        num_turns: parsed.num_turns,
        total_cost_usd: parsed.total_cost_usd,
    })
}

#[async_trait]
impl AgentExecutor for ClaudeExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse> {
        let output = self.build_command(request).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = match output.status.code() {
                Some(code) if stderr.trim().is_empty() => {
                    format!("agent process exited with code {code}")
                }
                Some(code) => format!(
                    "agent process exited with code {code}\nstderr: {}",
                    stderr.trim()
                ),
                None => "agent process terminated by signal".to_string(),
            };
            return Err(AgentError::Process(msg));
        }

        parse_stdout(&String::from_utf8_lossy(&output.stdout))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_claude_on_path() {
        let exec = ClaudeExecutor::default();
        assert_eq!(exec.executable, PathBuf::from("claude"));
        assert!(exec.model.is_none());
    }

    #[test]
    fn parse_stdout_takes_last_nonempty_line() {
        let stdout = concat!(
            "some progress noise\n",
            "\n",
            r#"{"result":"done","is_error":false,"num_turns":2,"total_cost_usd":0.01}"#,
            "\n",
        );
        let resp = parse_stdout(stdout).unwrap();
        assert_eq!(resp.text, "done");
        assert!(!resp.is_error);
        assert_eq!(resp.num_turns, 2);
    }

    #[test]
    fn parse_stdout_empty_is_process_error() {
        let err = parse_stdout("  \n\n").unwrap_err();
        assert!(matches!(err, AgentError::Process(_)));
    }

    #[test]
    fn parse_stdout_garbage_is_parse_error() {
        let err = parse_stdout("not json at all").unwrap_err();
        assert!(matches!(err, AgentError::Parse { .. }));
    }

    #[test]
    fn parse_stdout_missing_fields_use_defaults() {
        let resp = parse_stdout(r#"{"result":"ok"}"#).unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(resp.num_turns, 0);
        assert!(!resp.is_error);
    }

    #[tokio::test]
    async fn missing_executable_is_an_io_error() {
        let exec = ClaudeExecutor::new("__conductor_no_such_binary__");
        let err = exec
            .execute(&ExecutionRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Io(_)));
    }
}
