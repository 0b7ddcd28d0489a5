//! The ingress contract.
//!
//! Every transport (bot framework, WebSocket, MCP) is a thin adapter that
//! builds a `TurnRequest` and passes a `ReplySink`; the core neither knows
//! nor cares what sits on the other side.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One inbound user utterance.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub user_text: String,
}

impl TurnRequest {
    pub fn new(conversation_id: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_text: user_text.into(),
        }
    }
}

/// Where replies for one turn go.
///
/// Delivery is fire-and-forget from the core's point of view: a sink that
/// lost its consumer must swallow the message, not fail the turn.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, message: &str);
}

/// mpsc-backed sink for embedding and tests.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReplySink for ChannelSink {
    async fn send(&self, message: &str) {
        // A closed receiver just means nobody is listening anymore.
        let _ = self.tx.send(message.to_string());
    }
}

/// Literal marker of the audit footer. Appended at most once per reply;
/// adapters and the controller both check for its absence first.
pub const AUDIT_PREFIX: &str = "PT_CTX:";

/// Append `footer` to `reply` unless an audit block is already present.
pub fn with_audit_footer(reply: &str, footer: &str) -> String {
    if reply.contains(AUDIT_PREFIX) {
        reply.to_string()
    } else {
        format!("{reply}\n\n{footer}")
    }
}
