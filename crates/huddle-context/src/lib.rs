pub mod analyzer;
pub mod error;
pub mod service;
pub mod snapshot;

pub use analyzer::{AnalyzerFactory, ContextAction, ContextAnalyzer, Decision, LlmAnalyzer};
pub use error::{ContextError, Result};
pub use service::{ClearOutcome, ContextService, ServiceDecision, TimingInfo};
