//! Next-speaker selection.
//!
//! Selection is deterministic first: the confirmation gate and the explicit
//! handoff token are hard predicates, and an optional LLM selector only
//! fills the gap between "no handoff" and "default to the facilitator".
//! LLM selectors can and do run past user confirmation; the gate exists so
//! they never get the chance.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use huddle_agents::llm::{ChatCompletion, ChatRequest};
use huddle_core::types::{Message, Role};

/// Outcome of one selection step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Hand the floor to this participant.
    Agent(String),
    /// The gate fired: yield control back to the user.
    NoProgress,
}

/// The confirmation gate.
///
/// Holds when the most recent non-system message is the facilitator
/// presenting a plan and no user message has arrived after it. Taking the
/// last non-system message covers the "no user message after it" clause:
/// any later user message would itself be that last message.
pub fn confirmation_gate_holds(history: &[Message], facilitator: &str) -> bool {
    let Some(last) = history.iter().rev().find(|m| m.role != Role::System) else {
        return false;
    };
    last.role == Role::Assistant
        && last.name.as_deref() == Some(facilitator)
        && has_plan_indicators(&last.content)
}

/// Plan indicators: the literal tokens `Plan` / `plan:`, two or more
/// numbered list items, or two or more line-leading `-` bullets.
fn has_plan_indicators(text: &str) -> bool {
    if text.contains("Plan") || text.contains("plan:") {
        return true;
    }

    let mut numbered = 0usize;
    let mut bullets = 0usize;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("- ") {
            bullets += 1;
        }
        if is_numbered_item(trimmed) {
            numbered += 1;
        }
    }
    numbered >= 2 || bullets >= 2
}

/// `1.`, `12.` etc. at the start of a (trimmed) line.
fn is_numbered_item(line: &str) -> bool {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && line[digits..].starts_with('.')
}

/// Find an explicit `*AgentName*` handoff in `text`.
///
/// Only asterisk-wrapped tokens that exactly match a participant count;
/// when several are present the last one wins.
pub fn parse_handoff(text: &str, participants: &[String]) -> Option<String> {
    let mut found = None;
    for (i, segment) in text.split('*').enumerate() {
        // Odd segments sit between a pair of asterisks.
        if i % 2 == 1 && participants.iter().any(|p| p == segment) {
            found = Some(segment.to_string());
        }
    }
    found
}

/// Pick the next speaker.
///
/// Order of authority: confirmation gate, explicit handoff, optional LLM
/// selector, facilitator default. Non-facilitator agents speak at most once
/// per user turn; a handoff or suggestion that violates that falls back to
/// the facilitator. A handoff naming the facilitator is treated as the
/// plain default so it cannot loop.
pub async fn select_next_speaker(
    history: &[Message],
    participants: &[String],
    facilitator: &str,
    spoken: &HashSet<String>,
    selector: Option<&Arc<dyn ChatCompletion>>,
) -> Selection {
    if confirmation_gate_holds(history, facilitator) {
        debug!("confirmation gate holds, yielding to user");
        return Selection::NoProgress;
    }

    if let Some(last) = history.last() {
        if let Some(target) = parse_handoff(&last.content, participants) {
            if target != facilitator && !spoken.contains(&target) {
                debug!(agent = %target, "explicit handoff");
                return Selection::Agent(target);
            }
            debug!(agent = %target, "handoff target unavailable, defaulting to facilitator");
            return Selection::Agent(facilitator.to_string());
        }
    }

    if let Some(llm) = selector {
        if let Some(choice) = suggest_speaker(llm, history, participants).await {
            if choice != facilitator && !spoken.contains(&choice) {
                debug!(agent = %choice, "selector suggestion");
                return Selection::Agent(choice);
            }
        }
    }

    Selection::Agent(facilitator.to_string())
}

/// Ask the LLM selector for a participant name. Anything that is not an
/// exact participant name is discarded.
async fn suggest_speaker(
    llm: &Arc<dyn ChatCompletion>,
    history: &[Message],
    participants: &[String],
) -> Option<String> {
    let system = format!(
        "You pick the next speaker in a clinical group chat. The participants \
         are: {}. Reply with exactly one participant name and nothing else.",
        participants.join(", ")
    );
    let req = ChatRequest::new(system, history.to_vec());

    match llm.complete(&req).await {
        Ok(response) => {
            let choice = response.content.trim();
            participants.iter().find(|p| *p == choice).cloned().or_else(|| {
                warn!(output = %choice, "selector produced an unknown name, ignoring");
                None
            })
        }
        Err(e) => {
            warn!(error = %e, "selector call failed, ignoring");
            None
        }
    }
}
