//! Wiring helpers: turn a config plus a chat-completion handle into a
//! ready `TurnController`.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use huddle_agents::config::{facilitator_name, load_agent_configs};
use huddle_agents::factory::build_agents;
use huddle_agents::llm::ChatCompletion;
use huddle_agents::tools::ToolRegistry;
use huddle_context::{AnalyzerFactory, ContextAnalyzer, LlmAnalyzer};
use huddle_core::HuddleConfig;
use huddle_scheduler::GroupChat;
use huddle_storage::BlobStore;

use crate::error::Result;
use crate::turn::TurnController;

/// Initialise tracing with env-filter (`RUST_LOG`), defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Build the full runtime from config.
///
/// Loads the agent roster YAML, materializes the agents against the shared
/// chat-completion handle and tool registry, and assembles the controller.
/// The same handle backs the context analyzer and the termination
/// evaluator, mirroring the single-provider deployment shape.
pub fn build_runtime(
    config: HuddleConfig,
    blobs: Arc<dyn BlobStore>,
    llm: Arc<dyn ChatCompletion>,
    tools: &ToolRegistry,
) -> Result<TurnController> {
    let configs = load_agent_configs(&config.agents_config_path)?;
    let facilitator = facilitator_name(&configs)?;
    let agents = build_agents(&configs, Arc::clone(&llm), tools)?;
    info!(
        facilitator = %facilitator,
        agents = agents.len(),
        "building orchestration runtime"
    );

    let chat = GroupChat::new(agents, facilitator, config.max_turn_iterations)?
        .with_terminator(Arc::clone(&llm));

    // Fresh analyzer kernel per conversation.
    let make_analyzer: AnalyzerFactory = Arc::new(move || {
        Arc::new(LlmAnalyzer::new(Arc::clone(&llm))) as Arc<dyn ContextAnalyzer>
    });

    TurnController::new(config, blobs, make_analyzer, chat)
}
