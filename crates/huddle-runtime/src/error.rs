use thiserror::Error;

/// Errors that abort a turn.
///
/// The turn controller is the only boundary that translates these into
/// user-visible replies; everything below returns typed values.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Storage(#[from] huddle_storage::StorageError),

    #[error(transparent)]
    Context(#[from] huddle_context::ContextError),

    #[error(transparent)]
    Core(#[from] huddle_core::CoreError),

    #[error(transparent)]
    Chat(#[from] huddle_scheduler::ChatError),

    #[error(transparent)]
    Agents(#[from] huddle_agents::AgentError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
