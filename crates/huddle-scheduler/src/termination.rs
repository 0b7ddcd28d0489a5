//! Turn termination.
//!
//! Two deterministic overrides run before any model-backed verdict; they
//! exist to stop false terminations, so they can only ever answer
//! "continue". The verdict itself: terminate iff the last message addresses
//! the human user (or a collective we/us) rather than another named agent.

use std::sync::Arc;

use tracing::{debug, warn};

use huddle_agents::llm::{ChatCompletion, ChatRequest};
use huddle_core::types::Message;

use crate::selection::parse_handoff;

/// Should the loop stop after `last`?
pub async fn should_terminate(
    last: &Message,
    participants: &[String],
    evaluator: Option<&Arc<dyn ChatCompletion>>,
) -> bool {
    let lowered = last.content.to_lowercase();

    // Grounding echoes are never an answer to the user.
    if lowered.starts_with("patient_context_json") {
        debug!("termination override: grounding echo, continuing");
        return false;
    }
    // An explicit return of the floor means the chat is mid-flight.
    if lowered.contains("back to you") {
        debug!("termination override: floor returned, continuing");
        return false;
    }

    match evaluator {
        Some(llm) => evaluate(llm, last).await,
        // Deterministic fallback: a message handing off to another
        // participant is addressed at that participant; anything else is
        // for the user.
        None => parse_handoff(&last.content, participants).is_none(),
    }
}

async fn evaluate(llm: &Arc<dyn ChatCompletion>, last: &Message) -> bool {
    let system = "You judge whether a group-chat message ends the current turn. \
                  Answer \"yes\" if the message addresses the human user or a \
                  collective \"we\"/\"us\". Answer \"no\" if it addresses another \
                  named agent. Reply with yes or no only.";
    let req = ChatRequest::new(system, vec![last.clone()]);

    match llm.complete(&req).await {
        Ok(response) => {
            let verdict = response.content.trim().to_lowercase();
            verdict.starts_with("yes")
        }
        Err(e) => {
            // Yielding to the user beats looping on a broken evaluator.
            warn!(error = %e, "termination evaluator failed, ending turn");
            true
        }
    }
}
