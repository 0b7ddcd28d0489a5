use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use huddle_agents::agent::Agent;
use huddle_agents::llm::ChatCompletion;
use huddle_core::types::Message;

use crate::error::{ChatError, Result};
use crate::selection::{select_next_speaker, Selection};
use crate::termination::should_terminate;

/// How one scheduler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    /// The confirmation gate fired: the floor is the user's.
    AwaitUser,
    /// Termination decided the last message answers the user.
    Done,
    /// The iteration cap cut the loop.
    CapReached,
    /// The turn deadline cancelled the loop mid-flight.
    Cancelled,
}

/// Turn-based group chat over a fixed participant roster.
///
/// One `run` consumes one user turn: it selects a speaker, invokes it,
/// evaluates termination, and repeats until a terminal state. All state
/// lives in the caller's history; the chat itself is reusable across turns.
pub struct GroupChat {
    agents: Vec<Agent>,
    facilitator: String,
    max_iterations: u32,
    selector: Option<Arc<dyn ChatCompletion>>,
    terminator: Option<Arc<dyn ChatCompletion>>,
}

impl std::fmt::Debug for GroupChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupChat")
            .field("agents", &self.agents)
            .field("facilitator", &self.facilitator)
            .field("max_iterations", &self.max_iterations)
            .field("selector", &self.selector.as_ref().map(|s| s.name()))
            .field("terminator", &self.terminator.as_ref().map(|t| t.name()))
            .finish()
    }
}

impl GroupChat {
    pub fn new(agents: Vec<Agent>, facilitator: impl Into<String>, max_iterations: u32) -> Result<Self> {
        let facilitator = facilitator.into();
        if agents.is_empty() {
            return Err(ChatError::NoParticipants);
        }
        if !agents.iter().any(|a| a.name() == facilitator) {
            return Err(ChatError::UnknownFacilitator { name: facilitator });
        }
        Ok(Self {
            agents,
            facilitator,
            max_iterations,
            selector: None,
            terminator: None,
        })
    }

    /// Attach an LLM speaker selector (optional; selection stays
    /// deterministic without it).
    pub fn with_selector(mut self, llm: Arc<dyn ChatCompletion>) -> Self {
        self.selector = Some(llm);
        self
    }

    /// Attach the LLM termination evaluator (optional; a deterministic
    /// handoff heuristic answers without it).
    pub fn with_terminator(mut self, llm: Arc<dyn ChatCompletion>) -> Self {
        self.terminator = Some(llm);
        self
    }

    pub fn participants(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    /// Run the loop for one user turn.
    ///
    /// `history` accumulates every agent message produced. Cancellation is
    /// honored at each suspension point; a partial in-flight agent message
    /// is discarded, never appended.
    #[instrument(skip(self, history, cancel), fields(facilitator = %self.facilitator))]
    pub async fn run(&self, history: &mut Vec<Message>, cancel: &CancellationToken) -> ChatOutcome {
        let participants = self.participants();
        let mut spoken: HashSet<String> = HashSet::new();
        let mut force_facilitator = false;

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return ChatOutcome::Cancelled;
            }

            // Selection. After an agent failure the facilitator takes over
            // unconditionally.
            let selection = if force_facilitator {
                Selection::Agent(self.facilitator.clone())
            } else {
                select_next_speaker(
                    history,
                    &participants,
                    &self.facilitator,
                    &spoken,
                    self.selector.as_ref(),
                )
                .await
            };
            force_facilitator = false;

            let name = match selection {
                Selection::NoProgress => {
                    info!(iteration, "yielding to user");
                    return ChatOutcome::AwaitUser;
                }
                Selection::Agent(name) => name,
            };

            // Selection only returns participant names.
            let agent = self
                .agents
                .iter()
                .find(|a| a.name() == name)
                .expect("selected agent is a participant");

            let invoked = tokio::select! {
                _ = cancel.cancelled() => return ChatOutcome::Cancelled,
                result = agent.invoke(history) => result,
            };

            match invoked {
                Ok(message) => {
                    history.push(message);
                    if name != self.facilitator {
                        spoken.insert(name.clone());
                    }
                }
                Err(e) => {
                    // The failure stays inside the conversation; the
                    // facilitator decides what to do with it next.
                    warn!(agent = %name, error = %e, "agent invocation failed");
                    history.push(Message::assistant(
                        &name,
                        format!("{name} could not complete its turn: {e}"),
                    ));
                    force_facilitator = true;
                    continue;
                }
            }

            let last = history.last().expect("just pushed");
            if should_terminate(last, &participants, self.terminator.as_ref()).await {
                info!(iteration, speaker = %name, "turn complete");
                return ChatOutcome::Done;
            }
        }

        warn!(cap = self.max_iterations, "iteration cap reached");
        ChatOutcome::CapReached
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use huddle_agents::agent::LlmAgent;
    use huddle_agents::llm::{ChatRequest, ChatResponse};
    use huddle_agents::Result as AgentResult;

    /// Scripted chat-completion backend keyed by nothing: pops in order.
    struct ScriptedLlm {
        responses: Mutex<Vec<AgentResult<ChatResponse>>>,
    }

    impl ScriptedLlm {
        fn new(mut responses: Vec<AgentResult<ChatResponse>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _req: &ChatRequest) -> AgentResult<ChatResponse> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(ChatResponse::text("(script exhausted)")))
        }
    }

    fn agent(name: &str, llm: Arc<dyn ChatCompletion>) -> Agent {
        Agent::Llm(LlmAgent::new(name, "", "", 0.0, Vec::new(), llm))
    }

    #[tokio::test]
    async fn gate_yields_immediately_without_invoking_anyone() {
        // Script is empty: any invocation would return "(script exhausted)".
        let llm = ScriptedLlm::new(vec![]);
        let chat = GroupChat::new(
            vec![agent("Facilitator", llm.clone()), agent("Radiology", llm)],
            "Facilitator",
            30,
        )
        .unwrap();

        let mut history = vec![
            Message::user("start tumor board for patient_4"),
            Message::assistant(
                "Facilitator",
                "Plan:\n1. *Radiology* reviews imaging\n2. We summarize",
            ),
        ];
        let before = history.len();

        let outcome = chat.run(&mut history, &CancellationToken::new()).await;
        assert_eq!(outcome, ChatOutcome::AwaitUser);
        assert_eq!(history.len(), before);
    }

    #[tokio::test]
    async fn facilitator_plan_then_gate_on_next_run() {
        let llm = ScriptedLlm::new(vec![Ok(ChatResponse::text(
            "Plan:\n1. *Radiology* reviews imaging\n2. We regroup",
        ))]);
        let chat = GroupChat::new(
            vec![agent("Facilitator", llm.clone()), agent("Radiology", llm)],
            "Facilitator",
            30,
        )
        .unwrap();

        let mut history = vec![Message::user("start tumor board for patient_4")];
        let outcome = chat.run(&mut history, &CancellationToken::new()).await;

        // The plan message itself trips the gate on the following selection.
        assert_eq!(outcome, ChatOutcome::AwaitUser);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].name.as_deref(), Some("Facilitator"));
    }

    #[tokio::test]
    async fn handoff_runs_specialist_then_terminates() {
        let llm = ScriptedLlm::new(vec![
            // Facilitator hands off.
            Ok(ChatResponse::text("*Radiology*, findings please.")),
            // Radiology answers the user; fallback terminator fires (no handoff).
            Ok(ChatResponse::text("The CT shows a 2cm lesion.")),
        ]);
        let chat = GroupChat::new(
            vec![agent("Facilitator", llm.clone()), agent("Radiology", llm)],
            "Facilitator",
            30,
        )
        .unwrap();

        let mut history = vec![Message::user("yes proceed")];
        let outcome = chat.run(&mut history, &CancellationToken::new()).await;

        assert_eq!(outcome, ChatOutcome::Done);
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].name.as_deref(), Some("Facilitator"));
        assert_eq!(history[2].name.as_deref(), Some("Radiology"));
    }

    #[tokio::test]
    async fn back_to_you_keeps_the_loop_going() {
        let llm = ScriptedLlm::new(vec![
            Ok(ChatResponse::text("*Radiology*, findings please.")),
            Ok(ChatResponse::text("Lesion confirmed. Back to you.")),
            Ok(ChatResponse::text("Summary for the team: surgery consult next.")),
        ]);
        let chat = GroupChat::new(
            vec![agent("Facilitator", llm.clone()), agent("Radiology", llm)],
            "Facilitator",
            30,
        )
        .unwrap();

        let mut history = vec![Message::user("yes proceed")];
        let outcome = chat.run(&mut history, &CancellationToken::new()).await;

        assert_eq!(outcome, ChatOutcome::Done);
        // facilitator → radiology ("back to you" continues) → facilitator
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn failed_agent_leaves_synthetic_message_and_defers_to_facilitator() {
        let llm = ScriptedLlm::new(vec![
            Ok(ChatResponse::text("*Radiology*, findings please.")),
            Err(huddle_agents::AgentError::Llm("model refused".to_string())),
            Ok(ChatResponse::text("Radiology is unavailable; we will proceed without imaging.")),
        ]);
        let chat = GroupChat::new(
            vec![agent("Facilitator", llm.clone()), agent("Radiology", llm)],
            "Facilitator",
            30,
        )
        .unwrap();

        let mut history = vec![Message::user("yes proceed")];
        let outcome = chat.run(&mut history, &CancellationToken::new()).await;

        assert_eq!(outcome, ChatOutcome::Done);
        let synthetic = &history[2];
        assert_eq!(synthetic.name.as_deref(), Some("Radiology"));
        assert!(synthetic.content.contains("could not complete its turn"));
        assert_eq!(history[3].name.as_deref(), Some("Facilitator"));
    }

    #[tokio::test]
    async fn iteration_cap_bounds_a_chat_that_never_terminates() {
        // Every message returns the floor, so termination never fires.
        let responses = (0..10)
            .map(|_| Ok(ChatResponse::text("Still working, back to you shortly.")))
            .collect();
        let llm = ScriptedLlm::new(responses);
        let chat = GroupChat::new(vec![agent("Facilitator", llm)], "Facilitator", 3).unwrap();

        let mut history = vec![Message::user("go")];
        let outcome = chat.run(&mut history, &CancellationToken::new()).await;

        assert_eq!(outcome, ChatOutcome::CapReached);
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn cancellation_before_selection_reports_cancelled() {
        let llm = ScriptedLlm::new(vec![]);
        let chat = GroupChat::new(vec![agent("Facilitator", llm)], "Facilitator", 30).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut history = vec![Message::user("go")];
        let outcome = chat.run(&mut history, &cancel).await;

        assert_eq!(outcome, ChatOutcome::Cancelled);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn construction_validates_the_facilitator() {
        let llm = ScriptedLlm::new(vec![]);
        let err = GroupChat::new(vec![agent("Radiology", llm)], "Facilitator", 30).unwrap_err();
        assert!(matches!(err, ChatError::UnknownFacilitator { .. }));
    }
}
