pub mod chat;
pub mod error;
pub mod selection;
pub mod termination;

pub use chat::{ChatOutcome, GroupChat};
pub use error::{ChatError, Result};
pub use selection::Selection;
