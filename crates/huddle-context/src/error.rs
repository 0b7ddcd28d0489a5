use thiserror::Error;

/// Errors raised by the patient-context subsystem.
///
/// Analyzer misbehavior is not represented here: classification
/// degradation is handled inside the analyzer (degrade to NONE), so only
/// storage and domain failures propagate.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Storage(#[from] huddle_storage::StorageError),

    #[error(transparent)]
    Core(#[from] huddle_core::CoreError),
}

pub type Result<T> = std::result::Result<T, ContextError>;
