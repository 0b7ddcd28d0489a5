use thiserror::Error;

/// Errors raised by the core domain types and configuration loading.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A patient id that does not match the configured pattern.
    #[error("invalid patient id {id:?}: must match {pattern}")]
    InvalidPatientId { id: String, pattern: String },

    /// Activating a patient that is not present in the registry roster.
    #[error("patient {id:?} is not registered for this conversation")]
    UnknownPatient { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
