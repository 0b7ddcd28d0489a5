use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use huddle_context::{
    snapshot, AnalyzerFactory, ContextService, ServiceDecision, TimingInfo,
};
use huddle_core::types::{ChatContext, Message, PatientIdPattern, Role};
use huddle_core::HuddleConfig;
use huddle_scheduler::{ChatOutcome, GroupChat};
use huddle_storage::{BlobStore, HistoryStore, RegistryStore};

use crate::error::Result;
use crate::ingress::{with_audit_footer, ReplySink, TurnRequest, AUDIT_PREFIX};

/// What one turn did, for embedders and tests.
#[derive(Debug, Clone, Copy)]
pub struct TurnReport {
    /// Context decision, absent on the clear-command short circuit.
    pub decision: Option<ServiceDecision>,
    /// Scheduler outcome, absent when the turn stopped before the chat.
    pub outcome: Option<ChatOutcome>,
    pub timing: TimingInfo,
}

/// Drives the per-turn pipeline end to end and owns its transactional
/// boundaries.
///
/// This is the only component that sees both the pre- and post-chat
/// history, and the only one that speaks to the user. Turns within one
/// conversation are serialized behind a per-conversation lock held for the
/// whole turn; separate conversations proceed in parallel.
pub struct TurnController {
    config: HuddleConfig,
    history: HistoryStore,
    service: ContextService,
    chat: GroupChat,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TurnController {
    pub fn new(
        config: HuddleConfig,
        blobs: Arc<dyn BlobStore>,
        make_analyzer: AnalyzerFactory,
        chat: GroupChat,
    ) -> Result<Self> {
        let pattern = PatientIdPattern::new(&config.patient_id_pattern)?;
        let history = HistoryStore::new(blobs.clone());
        let service = ContextService::new(
            RegistryStore::new(blobs),
            history.clone(),
            make_analyzer,
            pattern,
        );
        Ok(Self {
            config,
            history,
            service,
            chat,
            locks: DashMap::new(),
        })
    }

    /// Handle one user utterance to completion.
    ///
    /// Replies go through `sink`; the returned report is for the embedder.
    /// Errors that abort the turn are translated into an error reply here
    /// and still propagated as values.
    #[instrument(skip(self, req, sink), fields(conversation_id = %req.conversation_id))]
    pub async fn handle_turn(&self, req: &TurnRequest, sink: &dyn ReplySink) -> Result<TurnReport> {
        // Single writer per conversation, held for the whole turn.
        let lock = self.conversation_lock(&req.conversation_id);
        let _guard = lock.lock().await;

        match self.run_turn(req, sink).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, "turn aborted");
                sink.send("Something went wrong while handling that turn. Please try again.")
                    .await;
                Err(e)
            }
        }
    }

    async fn run_turn(&self, req: &TurnRequest, sink: &dyn ReplySink) -> Result<TurnReport> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.turn_deadline_seconds);

        // 1. Session context, patient-agnostic.
        let mut ctx = self.history.read(&req.conversation_id, None).await?;

        // 2. Explicit clear commands short-circuit everything else.
        if self.config.is_clear_command(&req.user_text) {
            let outcome = self.service.clear_all(&mut ctx).await?;
            sink.send(&clear_reply(&outcome)).await;
            return Ok(TurnReport {
                decision: Some(ServiceDecision::Clear),
                outcome: None,
                timing: TimingInfo::default(),
            });
        }

        // 3. Resolve the patient context.
        let (decision, timing) = self.service.decide_and_apply(&req.user_text, &mut ctx).await?;
        info!(
            ?decision,
            analyzer_ms = timing.analyzer_ms,
            total_ms = timing.total_ms,
            "context decision"
        );

        // 4. Unusable patient reference: guide the user, touch nothing.
        if decision == ServiceDecision::NeedsPatientId {
            sink.send(&format!(
                "I couldn't tell which patient you mean. Patient ids must match \
                 `{}` — for example patient_4. Please repeat the request with \
                 the patient id.",
                self.service.pattern().as_str()
            ))
            .await;
            return Ok(TurnReport {
                decision: Some(decision),
                outcome: None,
                timing,
            });
        }

        // The analyzer can also decide to clear; the service already did
        // the archival, so confirm and stop before any chat runs.
        if decision == ServiceDecision::Clear {
            sink.send("Patient context cleared. All histories and the registry were archived.")
                .await;
            return Ok(TurnReport {
                decision: Some(decision),
                outcome: None,
                timing,
            });
        }

        // 5. Swap in the isolated history for the active patient.
        if let Some(patient_id) = ctx.patient_id.clone() {
            let patient_ctx = self
                .history
                .read(&req.conversation_id, Some(&patient_id))
                .await?;
            ctx.chat_history = patient_ctx.chat_history;
        }

        // 6. Ground the turn: strip stale snapshots, inject one fresh one.
        snapshot::strip(&mut ctx.chat_history);
        snapshot::inject(&mut ctx, Utc::now());

        // 7. Append the utterance and run the group chat under the deadline.
        ctx.chat_history.push(Message::user(&req.user_text));

        let cancel = CancellationToken::new();
        let outcome = tokio::select! {
            outcome = self.chat.run(&mut ctx.chat_history, &cancel) => outcome,
            _ = tokio::time::sleep_until(deadline) => {
                // Dropping the chat future discards the in-flight agent
                // message; everything completed so far stays in history.
                cancel.cancel();
                warn!("turn deadline expired, cancelling the chat");
                ChatOutcome::Cancelled
            }
        };

        // 8. Persist. The store's write filter drops the snapshot.
        self.history.write(&ctx).await?;

        match outcome {
            ChatOutcome::Cancelled => {
                sink.send(
                    "The team ran out of time on this turn. Progress so far was \
                     saved — please ask again to continue.",
                )
                .await;
            }
            ChatOutcome::Done | ChatOutcome::AwaitUser | ChatOutcome::CapReached => {
                sink.send(&self.final_reply(&ctx)).await;
            }
        }

        Ok(TurnReport {
            decision: Some(decision),
            outcome: Some(outcome),
            timing,
        })
    }

    /// The last assistant message, with the audit footer appended at most
    /// once.
    fn final_reply(&self, ctx: &ChatContext) -> String {
        let last_assistant = ctx
            .chat_history
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "The care team has nothing further right now.".to_string());

        match audit_footer(ctx) {
            Some(footer) => with_audit_footer(&last_assistant, &footer),
            None => last_assistant,
        }
    }

    fn conversation_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn clear_reply(outcome: &huddle_context::ClearOutcome) -> String {
    if outcome.is_partial() {
        let failed: Vec<&str> = outcome.failed.iter().map(|(label, _)| label.as_str()).collect();
        format!(
            "Patient context cleared, but {} artifact(s) could not be archived ({}). \
             They remain live; issue the clear again to retry.",
            outcome.failed.len(),
            failed.join(", ")
        )
    } else {
        format!(
            "Patient context cleared. {} artifact(s) archived under {}.",
            outcome.archived.len(),
            outcome.archive_folder
        )
    }
}

/// Human-readable audit block describing the grounding of this turn.
fn audit_footer(ctx: &ChatContext) -> Option<String> {
    if ctx.patient_id.is_none() && ctx.patient_contexts.is_empty() {
        return None;
    }
    let roster: Vec<&str> = ctx.patient_contexts.keys().map(String::as_str).collect();
    Some(format!(
        "{AUDIT_PREFIX} active={} | roster=[{}]",
        ctx.patient_id.as_deref().unwrap_or("none"),
        roster.join(", ")
    ))
}
