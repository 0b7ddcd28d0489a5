//! Materializes runtime agents from static roster configs.

use std::sync::Arc;

use tracing::info;

use crate::agent::{Agent, LlmAgent};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::external::ExternalAgent;
use crate::llm::ChatCompletion;
use crate::tools::ToolRegistry;

/// Build the runtime agent list for one conversation.
///
/// LLM agents share the one chat-completion handle and get their tool
/// capabilities resolved by name; external agents get a client bound to
/// their endpoint. Config validation (one facilitator, unique names,
/// endpoints present) already happened at roster load.
pub fn build_agents(
    configs: &[AgentConfig],
    llm: Arc<dyn ChatCompletion>,
    tools: &ToolRegistry,
) -> Result<Vec<Agent>> {
    let mut agents = Vec::with_capacity(configs.len());

    for config in configs {
        let agent = if config.external {
            // Validation guarantees the endpoint is present.
            let endpoint = config.endpoint.clone().unwrap_or_default();
            Agent::External(ExternalAgent::new(
                &config.name,
                &config.description,
                endpoint,
            )?)
        } else {
            let resolved = tools.resolve(&config.tools)?;
            Agent::Llm(LlmAgent::new(
                &config.name,
                &config.description,
                &config.instructions,
                config.temperature,
                resolved,
                Arc::clone(&llm),
            ))
        };
        agents.push(agent);
    }

    info!(agents = agents.len(), "agent roster materialized");
    Ok(agents)
}
