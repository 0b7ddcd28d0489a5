use thiserror::Error;

/// Errors raised while constructing a group chat.
///
/// The running loop itself never fails: agent errors become synthetic
/// messages, and selector/terminator misbehavior degrades to deterministic
/// defaults.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("facilitator {name:?} is not among the participants")]
    UnknownFacilitator { name: String },

    #[error("group chat needs at least one participant")]
    NoParticipants,
}

pub type Result<T> = std::result::Result<T, ChatError>;
