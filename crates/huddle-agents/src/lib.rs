pub mod agent;
pub mod config;
pub mod error;
pub mod external;
pub mod factory;
pub mod llm;
pub mod tools;

pub use agent::{Agent, LlmAgent};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use external::ExternalAgent;
pub use factory::build_agents;
pub use llm::{ChatCompletion, ChatRequest, ChatResponse, ToolCall, ToolDefinition, FIXED_SEED};
pub use tools::{Tool, ToolRegistry, ToolResult};
