use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use huddle_agents::llm::{ChatCompletion, ChatRequest};
use huddle_core::types::Message;

/// Rolling kernel size. Older classification exchanges fall off so the
/// kernel stays cheap to reset and cheap to resend.
const KERNEL_MAX_MESSAGES: usize = 8;

/// Discrete action over the patient context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextAction {
    None,
    ActivateNew,
    SwitchExisting,
    Unchanged,
    Clear,
}

/// Structured classifier output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: ContextAction,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    /// Safe degradation value: no action, no reasoning.
    pub fn none() -> Self {
        Self {
            action: ContextAction::None,
            patient_id: None,
            reasoning: String::new(),
        }
    }
}

/// Classifies a user utterance into a patient-context action.
///
/// `reset` drops any LLM-backed internal state; the service calls it
/// whenever the active patient changes so reasoning from one patient
/// cannot bias classifications for the next.
#[async_trait]
pub trait ContextAnalyzer: Send + Sync {
    async fn classify(
        &self,
        user_text: &str,
        active_patient_id: Option<&str>,
        known_patient_ids: &[String],
    ) -> Decision;

    async fn reset(&self);
}

/// Produces one analyzer per conversation.
///
/// Analyzer state is conversation-scoped: sharing a kernel across
/// conversations would leak reasoning between unrelated care teams.
pub type AnalyzerFactory = Arc<dyn Fn() -> Arc<dyn ContextAnalyzer> + Send + Sync>;

const CLASSIFIER_INSTRUCTIONS: &str = "\
You classify a user's utterance in a clinical conversation into an action \
over the active patient context. Reply with a single JSON object, nothing \
else, with exactly these fields:
  {\"action\": \"NONE|ACTIVATE_NEW|SWITCH_EXISTING|UNCHANGED|CLEAR\", \
\"patient_id\": string or null, \"reasoning\": string}
Rules:
- ACTIVATE_NEW: the user names a patient that is not in the known list.
- SWITCH_EXISTING: the user names a patient from the known list.
- CLEAR: the user wants to wipe all patient context.
- UNCHANGED: the user continues about the current patient.
- NONE: no patient context is implied.
- patient_id is required for ACTIVATE_NEW and SWITCH_EXISTING and must be \
null otherwise.";

/// LLM-backed analyzer with a resettable rolling kernel.
pub struct LlmAnalyzer {
    llm: Arc<dyn ChatCompletion>,
    kernel: Mutex<Vec<Message>>,
}

impl LlmAnalyzer {
    pub fn new(llm: Arc<dyn ChatCompletion>) -> Self {
        Self {
            llm,
            kernel: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContextAnalyzer for LlmAnalyzer {
    async fn classify(
        &self,
        user_text: &str,
        active_patient_id: Option<&str>,
        known_patient_ids: &[String],
    ) -> Decision {
        let prompt = format!(
            "Utterance: {user_text:?}\nActive patient: {}\nKnown patients: [{}]",
            active_patient_id.unwrap_or("none"),
            known_patient_ids.join(", "),
        );

        let mut kernel = self.kernel.lock().await;
        let mut messages = kernel.clone();
        messages.push(Message::user(&prompt));

        let req = ChatRequest::new(CLASSIFIER_INSTRUCTIONS, messages);
        let decision = match self.llm.complete(&req).await {
            Ok(response) => parse_decision(&response.content),
            Err(e) => {
                warn!(error = %e, "context analyzer call failed, degrading to NONE");
                Decision::none()
            }
        };

        // Remember the exchange so follow-up utterances classify in context.
        kernel.push(Message::user(prompt));
        kernel.push(Message::assistant(
            "analyzer",
            serde_json::to_string(&decision).unwrap_or_default(),
        ));
        let excess = kernel.len().saturating_sub(KERNEL_MAX_MESSAGES);
        if excess > 0 {
            kernel.drain(..excess);
        }

        decision
    }

    async fn reset(&self) {
        let mut kernel = self.kernel.lock().await;
        debug!(dropped = kernel.len(), "resetting analyzer kernel");
        kernel.clear();
    }
}

/// Parse the classifier's reply into a `Decision`.
///
/// Anything that does not match the schema degrades to NONE — the caller
/// never sees a parse failure. A patient id on an action that forbids one
/// is dropped rather than rejected.
pub fn parse_decision(content: &str) -> Decision {
    let Some(start) = content.find('{') else {
        warn!("analyzer output has no JSON object, degrading to NONE");
        return Decision::none();
    };
    let Some(end) = content.rfind('}') else {
        warn!("analyzer output has no JSON object, degrading to NONE");
        return Decision::none();
    };

    match serde_json::from_str::<Decision>(&content[start..=end]) {
        Ok(mut decision) => {
            let takes_id = matches!(
                decision.action,
                ContextAction::ActivateNew | ContextAction::SwitchExisting
            );
            if !takes_id && decision.patient_id.is_some() {
                debug!(action = ?decision.action, "dropping patient_id on id-less action");
                decision.patient_id = None;
            }
            decision
        }
        Err(e) => {
            warn!(error = %e, "unparseable analyzer output, degrading to NONE");
            Decision::none()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_schema() {
        let decision = parse_decision(
            r#"{"action":"ACTIVATE_NEW","patient_id":"patient_4","reasoning":"user named a new patient"}"#,
        );
        assert_eq!(decision.action, ContextAction::ActivateNew);
        assert_eq!(decision.patient_id.as_deref(), Some("patient_4"));
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let decision = parse_decision(
            "Sure! Here is the classification:\n{\"action\":\"UNCHANGED\",\"patient_id\":null,\"reasoning\":\"same topic\"}\nDone.",
        );
        assert_eq!(decision.action, ContextAction::Unchanged);
    }

    #[test]
    fn garbage_degrades_to_none_with_empty_reasoning() {
        let decision = parse_decision("I cannot classify that, sorry.");
        assert_eq!(decision.action, ContextAction::None);
        assert!(decision.reasoning.is_empty());

        let decision = parse_decision(r#"{"action":"DANCE","patient_id":null}"#);
        assert_eq!(decision.action, ContextAction::None);
    }

    #[test]
    fn id_on_idless_action_is_dropped() {
        let decision =
            parse_decision(r#"{"action":"CLEAR","patient_id":"patient_4","reasoning":""}"#);
        assert_eq!(decision.action, ContextAction::Clear);
        assert!(decision.patient_id.is_none());
    }

    #[tokio::test]
    async fn reset_clears_the_kernel() {
        use huddle_agents::llm::ChatResponse;

        struct FixedLlm;

        #[async_trait]
        impl ChatCompletion for FixedLlm {
            fn name(&self) -> &str {
                "fixed"
            }
            async fn complete(
                &self,
                _req: &ChatRequest,
            ) -> huddle_agents::Result<ChatResponse> {
                Ok(ChatResponse::text(
                    r#"{"action":"UNCHANGED","patient_id":null,"reasoning":"x"}"#,
                ))
            }
        }

        let analyzer = LlmAnalyzer::new(Arc::new(FixedLlm));
        analyzer.classify("tell me more", Some("patient_4"), &[]).await;
        assert!(!analyzer.kernel.lock().await.is_empty());

        analyzer.reset().await;
        assert!(analyzer.kernel.lock().await.is_empty());
    }
}
