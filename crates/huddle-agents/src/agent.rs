use std::sync::Arc;

use tracing::{debug, info, warn};

use huddle_core::types::Message;

use crate::error::Result;
use crate::external::ExternalAgent;
use crate::llm::{ChatCompletion, ChatRequest, FIXED_SEED};
use crate::tools::{self, Tool};

/// Maximum tool rounds inside one agent invocation.
const MAX_TOOL_ROUNDS: usize = 8;

/// A participant in the group chat.
///
/// Tagged union over the two runtime variants: a prompted LLM agent with
/// tool capabilities, or an opaque external delegate behind an endpoint.
/// Both expose the same `invoke(history) -> message` capability.
pub enum Agent {
    Llm(LlmAgent),
    External(ExternalAgent),
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Agent::Llm(a) => f.debug_tuple("Llm").field(a).finish(),
            Agent::External(a) => f.debug_tuple("External").field(a).finish(),
        }
    }
}

impl Agent {
    pub fn name(&self) -> &str {
        match self {
            Agent::Llm(a) => &a.name,
            Agent::External(a) => a.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Agent::Llm(a) => &a.description,
            Agent::External(a) => a.description(),
        }
    }

    /// Process the current history and produce this agent's next message.
    pub async fn invoke(&self, history: &[Message]) -> Result<Message> {
        match self {
            Agent::Llm(a) => a.invoke(history).await,
            Agent::External(a) => a.invoke(history).await,
        }
    }
}

/// Prompted agent backed by the shared chat-completion handle.
pub struct LlmAgent {
    pub name: String,
    pub description: String,
    instructions: String,
    temperature: f32,
    tools: Vec<Arc<dyn Tool>>,
    llm: Arc<dyn ChatCompletion>,
}

impl std::fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgent")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("instructions", &self.instructions)
            .field("temperature", &self.temperature)
            .field("tools", &self.tools)
            .field("llm", &self.llm.name())
            .finish()
    }
}

impl LlmAgent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
        temperature: f32,
        tools: Vec<Arc<dyn Tool>>,
        llm: Arc<dyn ChatCompletion>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instructions: instructions.into(),
            temperature,
            tools,
            llm,
        }
    }

    /// Run the completion, executing requested tool calls in bounded rounds
    /// until the model answers in plain text.
    pub async fn invoke(&self, history: &[Message]) -> Result<Message> {
        let mut messages: Vec<Message> = history.to_vec();

        for round in 0..MAX_TOOL_ROUNDS {
            let mut req = ChatRequest::new(self.instructions.clone(), messages.clone());
            req.temperature = self.temperature;
            req.seed = Some(FIXED_SEED);
            req.tools = tools::to_definitions(&self.tools);

            let response = self.llm.complete(&req).await?;

            if response.tool_calls.is_empty() {
                info!(agent = %self.name, round, "agent turn complete");
                return Ok(Message::assistant(&self.name, response.content));
            }

            // Keep any interim text visible to the follow-up request, then
            // feed every tool result back as grounding.
            if !response.content.is_empty() {
                messages.push(Message::assistant(&self.name, &response.content));
            }
            for call in &response.tool_calls {
                debug!(agent = %self.name, tool = %call.name, "executing tool call");
                let result = match self.tools.iter().find(|t| t.name() == call.name) {
                    Some(tool) => tool.execute(call.input.clone()).await,
                    None => {
                        warn!(agent = %self.name, tool = %call.name, "model called unknown tool");
                        crate::tools::ToolResult::error(format!("unknown tool {:?}", call.name))
                    }
                };
                let status = if result.is_error { "error" } else { "ok" };
                messages.push(Message::system(format!(
                    "Tool result ({} / {status}):\n{}",
                    call.name, result.content
                )));
            }
        }

        warn!(agent = %self.name, "tool round cap reached, asking for a plain answer");
        let mut req = ChatRequest::new(self.instructions.clone(), messages);
        req.temperature = self.temperature;
        let response = self.llm.complete(&req).await?;
        Ok(Message::assistant(&self.name, response.content))
    }
}
