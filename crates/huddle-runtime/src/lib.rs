pub mod bootstrap;
pub mod error;
pub mod ingress;
pub mod turn;

pub use bootstrap::{build_runtime, init_tracing};
pub use error::{Result, RuntimeError};
pub use ingress::{ChannelSink, ReplySink, TurnRequest, AUDIT_PREFIX};
pub use turn::{TurnController, TurnReport};
