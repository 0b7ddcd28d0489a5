use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use huddle_core::types::Message;

use crate::error::Result;

/// Fixed sampling seed set on every request whose model supports it, so
/// repeated turns over identical state reproduce.
pub const FIXED_SEED: u64 = 42;

/// Default per-response token budget.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Request to the chat-completion backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub seed: Option<u64>,
    pub max_tokens: u32,
    /// Tools to expose to the LLM. Empty for plain completions.
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
            temperature: 0.0,
            seed: Some(FIXED_SEED),
            max_tokens: DEFAULT_MAX_TOKENS,
            tools: Vec::new(),
        }
    }
}

/// Response from the chat-completion backend.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    /// Tool calls requested by the LLM. Empty when no tools are called.
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: String,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: "end_turn".to_string(),
        }
    }
}

/// The one capability the core assumes of an LLM backend.
///
/// Concrete providers live outside the core; the orchestrator, the context
/// analyzer, and the termination evaluator all speak through this seam.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Stable identifier for logs (e.g. `"azure-openai"`).
    fn name(&self) -> &str;

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse>;
}
