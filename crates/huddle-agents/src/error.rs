use thiserror::Error;

/// Errors raised while configuring or invoking agents.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent configuration error: {0}")]
    Config(String),

    /// The chat-completion backend failed or returned garbage.
    #[error("LLM error: {0}")]
    Llm(String),

    /// A tool capability failed hard (tool-level soft failures come back as
    /// `ToolResult::is_error` and stay inside the conversation).
    #[error("tool {name} failed: {reason}")]
    Tool { name: String, reason: String },

    /// An external agent's endpoint misbehaved.
    #[error("external agent {name} failed: {reason}")]
    External { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
