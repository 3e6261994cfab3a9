use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent process error: {0}")]
    Process(String),

    #[error("agent returned unparsable output after {attempts} attempts: {last_error}")]
    Unparsable { attempts: u32, last_error: String },

    #[error("failed to parse agent output line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
