use thiserror::Error;

/// Errors surfaced by the blob store facade and the stores built on it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object does not exist at the given path.
    #[error("object not found: {path}")]
    NotFound { path: String },

    /// A write raced with concurrent state the backend refuses to overwrite.
    #[error("conflicting write at {path}: {reason}")]
    Conflict { path: String, reason: String },

    /// A failure worth retrying (network blip, throttling, lock contention).
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// A failure that will not go away by itself.
    #[error("storage failure: {0}")]
    Fatal(String),

    /// Writing a registry whose active pointer is not a roster key.
    #[error("registry active pointer {id:?} is not a roster key")]
    DanglingActive { id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// True for failures the bounded-backoff retry loop should re-attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
