pub mod config;
pub mod error;
pub mod types;

pub use config::HuddleConfig;
pub use error::{CoreError, Result};
pub use types::{
    ChatContext, Message, PatientContext, PatientIdPattern, Registry, Role, SNAPSHOT_PREFIX,
};
