use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, error, info, instrument, warn};

use huddle_core::types::{ChatContext, PatientContext, PatientIdPattern};
use huddle_storage::{paths, HistoryStore, RegistryStore};

use crate::analyzer::{AnalyzerFactory, ContextAction, ContextAnalyzer, Decision};
use crate::error::Result;

/// Short-message heuristic: utterances at or under this many characters
/// that carry none of the context keywords skip the analyzer entirely.
const SHORT_MESSAGE_MAX_CHARS: usize = 15;
const CONTEXT_KEYWORDS: [&str; 3] = ["patient", "clear", "switch"];

/// What the service decided for this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceDecision {
    None,
    Unchanged,
    NewBlank,
    SwitchExisting,
    Clear,
    RestoredFromStorage,
    NeedsPatientId,
}

/// Wall-clock breakdown of one `decide_and_apply` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingInfo {
    pub analyzer_ms: u64,
    pub total_ms: u64,
}

/// Result of a clear run.
///
/// Archival is best-effort: every failure is recorded here instead of
/// aborting the run, and the objects that failed stay live so a repeated
/// clear retries exactly those.
#[derive(Debug, Default)]
pub struct ClearOutcome {
    pub archive_folder: String,
    pub archived: Vec<String>,
    /// (object label, error text) per failed archival.
    pub failed: Vec<(String, String)>,
}

impl ClearOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Applies the analyzer's verdict to durable and in-memory state.
///
/// The one public entry point is `decide_and_apply`; it owns the mandatory
/// pipeline order (hydrate, heuristic/analyze, validate & transform) and
/// every registry mutation. It never touches the grounding snapshot — that
/// belongs to the turn controller.
pub struct ContextService {
    registry: RegistryStore,
    history: HistoryStore,
    /// One analyzer per conversation; kernels never cross conversations.
    analyzers: DashMap<String, Arc<dyn ContextAnalyzer>>,
    make_analyzer: AnalyzerFactory,
    pattern: PatientIdPattern,
}

impl ContextService {
    pub fn new(
        registry: RegistryStore,
        history: HistoryStore,
        make_analyzer: AnalyzerFactory,
        pattern: PatientIdPattern,
    ) -> Self {
        Self {
            registry,
            history,
            analyzers: DashMap::new(),
            make_analyzer,
            pattern,
        }
    }

    /// The configured patient-id pattern, for user-facing guidance.
    pub fn pattern(&self) -> &PatientIdPattern {
        &self.pattern
    }

    fn analyzer_for(&self, conversation_id: &str) -> Arc<dyn ContextAnalyzer> {
        self.analyzers
            .entry(conversation_id.to_string())
            .or_insert_with(|| (self.make_analyzer)())
            .clone()
    }

    /// Classify `user_text` and apply the resulting context action.
    #[instrument(skip(self, ctx), fields(conversation_id = %ctx.conversation_id))]
    pub async fn decide_and_apply(
        &self,
        user_text: &str,
        ctx: &mut ChatContext,
    ) -> Result<(ServiceDecision, TimingInfo)> {
        let started = Instant::now();
        let mut timing = TimingInfo::default();

        // Hydrate: the registry is the source of truth; any cached roster
        // entry it does not list is stale and gets dropped here.
        let registry = self.registry.read(&ctx.conversation_id).await?;
        ctx.patient_contexts = registry.patient_registry.clone();
        let mut restored = false;
        if ctx.patient_id.is_none() {
            if let Some(active) = &registry.active_patient_id {
                ctx.patient_id = Some(active.clone());
                restored = true;
                info!(patient_id = %active, "restored active patient from registry");
            }
        }

        // Heuristic or full classification.
        let decision = if skip_analyzer(user_text) {
            debug!("short-message heuristic: skipping analyzer");
            let action = if ctx.patient_id.is_some() {
                ContextAction::Unchanged
            } else {
                ContextAction::None
            };
            Decision {
                action,
                patient_id: None,
                reasoning: "short message heuristic".to_string(),
            }
        } else {
            let analyzer_started = Instant::now();
            let decision = self
                .analyzer_for(&ctx.conversation_id)
                .classify(
                    user_text,
                    ctx.patient_id.as_deref(),
                    &ctx.patient_contexts.keys().cloned().collect::<Vec<_>>(),
                )
                .await;
            timing.analyzer_ms = analyzer_started.elapsed().as_millis() as u64;
            decision
        };
        debug!(action = ?decision.action, patient_id = ?decision.patient_id, "analyzer decision");

        let service_decision = self.apply(decision, ctx, restored).await?;
        timing.total_ms = started.elapsed().as_millis() as u64;
        Ok((service_decision, timing))
    }

    /// Validate & transform one decision into state changes.
    async fn apply(
        &self,
        decision: Decision,
        ctx: &mut ChatContext,
        restored: bool,
    ) -> Result<ServiceDecision> {
        // A restore only counts when nothing afterwards overrides it.
        let passthrough = |base: ServiceDecision| {
            if restored {
                ServiceDecision::RestoredFromStorage
            } else {
                base
            }
        };

        match decision.action {
            ContextAction::Clear => {
                let outcome = self.clear_all(ctx).await?;
                if outcome.is_partial() {
                    error!(
                        failed = outcome.failed.len(),
                        folder = %outcome.archive_folder,
                        "clear archived only partially"
                    );
                }
                Ok(ServiceDecision::Clear)
            }
            ContextAction::None => Ok(passthrough(ServiceDecision::None)),
            ContextAction::Unchanged => Ok(passthrough(ServiceDecision::Unchanged)),
            ContextAction::ActivateNew | ContextAction::SwitchExisting => {
                let Some(id) = decision.patient_id.as_deref() else {
                    return Ok(ServiceDecision::NeedsPatientId);
                };
                if !self.pattern.matches(id) {
                    warn!(%id, "rejected patient id that does not match the pattern");
                    return Ok(ServiceDecision::NeedsPatientId);
                }

                if ctx.patient_contexts.contains_key(id) {
                    if ctx.patient_id.as_deref() == Some(id) {
                        // Naming the already-active patient is not a switch.
                        return Ok(passthrough(ServiceDecision::Unchanged));
                    }
                    self.switch_to(id, ctx).await?;
                    Ok(ServiceDecision::SwitchExisting)
                } else {
                    // Unknown id activates a new blank context, whichever
                    // intent the classifier guessed.
                    self.activate_new(id, ctx).await?;
                    Ok(ServiceDecision::NewBlank)
                }
            }
        }
    }

    async fn switch_to(&self, id: &str, ctx: &mut ChatContext) -> Result<()> {
        let mut registry = self.registry.read(&ctx.conversation_id).await?;
        registry.set_active(id)?;
        self.registry.write(&ctx.conversation_id, &registry).await?;

        ctx.patient_id = Some(id.to_string());
        ctx.patient_contexts = registry.patient_registry;
        self.analyzer_for(&ctx.conversation_id).reset().await;
        info!(patient_id = %id, "switched active patient");
        Ok(())
    }

    async fn activate_new(&self, id: &str, ctx: &mut ChatContext) -> Result<()> {
        let patient = PatientContext::new(id, &ctx.conversation_id);
        let registry = self
            .registry
            .upsert(&ctx.conversation_id, patient, true)
            .await?;

        ctx.patient_id = Some(id.to_string());
        ctx.patient_contexts = registry.patient_registry;
        self.analyzer_for(&ctx.conversation_id).reset().await;
        info!(patient_id = %id, "activated new patient context");
        Ok(())
    }

    /// Archive everything live for this conversation into one timestamped
    /// folder, then start over with a fresh empty session file.
    ///
    /// Best-effort per object: one failed patient archive neither stops the
    /// others nor the registry. Callers inspect the outcome for partial
    /// failure.
    #[instrument(skip(self, ctx), fields(conversation_id = %ctx.conversation_id))]
    pub async fn clear_all(&self, ctx: &mut ChatContext) -> Result<ClearOutcome> {
        let conversation_id = ctx.conversation_id.clone();
        let ts = paths::compact_ts(Utc::now());
        let folder = paths::archive_folder(&conversation_id, &ts);

        let mut outcome = ClearOutcome {
            archive_folder: folder.clone(),
            ..ClearOutcome::default()
        };

        // The roster read fresh from storage, not the cache: a clear must
        // cover patients this process has never seen.
        let registry = self.registry.read(&conversation_id).await?;

        match self
            .history
            .archive_to_folder(&conversation_id, None, &folder, &ts)
            .await
        {
            Ok(true) => outcome.archived.push("session".to_string()),
            Ok(false) => {}
            Err(e) => outcome.failed.push(("session".to_string(), e.to_string())),
        }

        for patient_id in registry.patient_registry.keys() {
            match self
                .history
                .archive_to_folder(&conversation_id, Some(patient_id), &folder, &ts)
                .await
            {
                Ok(true) => outcome.archived.push(format!("patient_{patient_id}")),
                Ok(false) => {}
                Err(e) => outcome
                    .failed
                    .push((format!("patient_{patient_id}"), e.to_string())),
            }
        }

        match self.registry.archive(&conversation_id, &folder, &ts).await {
            Ok(true) => outcome.archived.push("registry".to_string()),
            Ok(false) => {}
            Err(e) => outcome.failed.push(("registry".to_string(), e.to_string())),
        }

        // Fresh empty session file; in-memory state starts over too.
        ctx.patient_id = None;
        ctx.patient_contexts.clear();
        ctx.chat_history.clear();
        self.history.write(&ChatContext::new(&conversation_id)).await?;

        self.analyzer_for(&conversation_id).reset().await;
        info!(
            archived = outcome.archived.len(),
            failed = outcome.failed.len(),
            folder = %outcome.archive_folder,
            "cleared patient context"
        );
        Ok(outcome)
    }
}

/// True when the short-message heuristic says the analyzer can be skipped.
fn skip_analyzer(user_text: &str) -> bool {
    if user_text.chars().count() > SHORT_MESSAGE_MAX_CHARS {
        return false;
    }
    let lowered = user_text.to_lowercase();
    CONTEXT_KEYWORDS.iter().all(|kw| !lowered.contains(kw))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use huddle_core::types::Message;
    use huddle_storage::{BlobStore, MemoryBlobStore};

    /// Analyzer fake that pops scripted decisions and counts resets.
    struct ScriptedAnalyzer {
        decisions: Mutex<Vec<Decision>>,
        classify_calls: AtomicUsize,
        resets: AtomicUsize,
    }

    impl ScriptedAnalyzer {
        fn new(mut decisions: Vec<Decision>) -> Arc<Self> {
            decisions.reverse();
            Arc::new(Self {
                decisions: Mutex::new(decisions),
                classify_calls: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
            })
        }

        fn decision(action: ContextAction, patient_id: Option<&str>) -> Decision {
            Decision {
                action,
                patient_id: patient_id.map(String::from),
                reasoning: String::new(),
            }
        }
    }

    #[async_trait]
    impl ContextAnalyzer for ScriptedAnalyzer {
        async fn classify(&self, _: &str, _: Option<&str>, _: &[String]) -> Decision {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            self.decisions
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(Decision::none)
        }
        async fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn factory(analyzer: Arc<ScriptedAnalyzer>) -> AnalyzerFactory {
        Arc::new(move || Arc::clone(&analyzer) as Arc<dyn ContextAnalyzer>)
    }

    fn service(analyzer: Arc<ScriptedAnalyzer>) -> (Arc<MemoryBlobStore>, ContextService) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let svc = ContextService::new(
            RegistryStore::new(blobs.clone()),
            HistoryStore::new(blobs.clone()),
            factory(analyzer),
            PatientIdPattern::default(),
        );
        (blobs, svc)
    }

    #[tokio::test]
    async fn activate_new_creates_registry_entry_and_resets_analyzer() {
        let analyzer = ScriptedAnalyzer::new(vec![ScriptedAnalyzer::decision(
            ContextAction::ActivateNew,
            Some("patient_4"),
        )]);
        let (_blobs, svc) = service(analyzer.clone());
        let mut ctx = ChatContext::new("c1");

        let (decision, _) = svc
            .decide_and_apply("start tumor board for patient_4", &mut ctx)
            .await
            .unwrap();

        assert_eq!(decision, ServiceDecision::NewBlank);
        assert_eq!(ctx.patient_id.as_deref(), Some("patient_4"));
        assert!(ctx.patient_contexts.contains_key("patient_4"));
        assert_eq!(analyzer.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activate_known_id_is_a_switch() {
        let analyzer = ScriptedAnalyzer::new(vec![
            ScriptedAnalyzer::decision(ContextAction::ActivateNew, Some("patient_4")),
            ScriptedAnalyzer::decision(ContextAction::ActivateNew, Some("patient_15")),
            ScriptedAnalyzer::decision(ContextAction::ActivateNew, Some("patient_4")),
        ]);
        let (_blobs, svc) = service(analyzer.clone());
        let mut ctx = ChatContext::new("c1");

        svc.decide_and_apply("work with patient_4", &mut ctx).await.unwrap();
        svc.decide_and_apply("now patient_15 too", &mut ctx).await.unwrap();
        let (decision, _) = svc
            .decide_and_apply("back to patient_4 please", &mut ctx)
            .await
            .unwrap();

        assert_eq!(decision, ServiceDecision::SwitchExisting);
        assert_eq!(ctx.patient_id.as_deref(), Some("patient_4"));
        assert_eq!(ctx.patient_contexts.len(), 2);
    }

    #[tokio::test]
    async fn switch_to_current_patient_is_unchanged_without_reset() {
        let analyzer = ScriptedAnalyzer::new(vec![
            ScriptedAnalyzer::decision(ContextAction::ActivateNew, Some("patient_4")),
            ScriptedAnalyzer::decision(ContextAction::SwitchExisting, Some("patient_4")),
        ]);
        let (_blobs, svc) = service(analyzer.clone());
        let mut ctx = ChatContext::new("c1");

        svc.decide_and_apply("work with patient_4", &mut ctx).await.unwrap();
        let resets_after_activate = analyzer.resets.load(Ordering::SeqCst);

        let (decision, _) = svc
            .decide_and_apply("switch to patient_4", &mut ctx)
            .await
            .unwrap();

        assert_eq!(decision, ServiceDecision::Unchanged);
        assert_eq!(analyzer.resets.load(Ordering::SeqCst), resets_after_activate);
    }

    #[tokio::test]
    async fn invalid_or_missing_id_needs_patient_id_and_mutates_nothing() {
        let analyzer = ScriptedAnalyzer::new(vec![
            ScriptedAnalyzer::decision(ContextAction::SwitchExisting, None),
            ScriptedAnalyzer::decision(ContextAction::ActivateNew, Some("bob")),
        ]);
        let (blobs, svc) = service(analyzer);
        let mut ctx = ChatContext::new("c1");

        let (d1, _) = svc.decide_and_apply("switch patient please", &mut ctx).await.unwrap();
        let (d2, _) = svc.decide_and_apply("activate patient bob", &mut ctx).await.unwrap();

        assert_eq!(d1, ServiceDecision::NeedsPatientId);
        assert_eq!(d2, ServiceDecision::NeedsPatientId);
        assert!(ctx.patient_id.is_none());
        assert_eq!(blobs.len(), 0);
    }

    #[tokio::test]
    async fn short_message_skips_analyzer() {
        let analyzer = ScriptedAnalyzer::new(vec![]);
        let (_blobs, svc) = service(analyzer.clone());
        let mut ctx = ChatContext::new("c1");

        let (decision, timing) = svc.decide_and_apply("yes proceed", &mut ctx).await.unwrap();

        assert_eq!(decision, ServiceDecision::None);
        assert_eq!(analyzer.classify_calls.load(Ordering::SeqCst), 0);
        assert_eq!(timing.analyzer_ms, 0);
    }

    #[tokio::test]
    async fn short_message_with_keyword_still_classifies() {
        let analyzer = ScriptedAnalyzer::new(vec![ScriptedAnalyzer::decision(
            ContextAction::Clear,
            None,
        )]);
        let (_blobs, svc) = service(analyzer.clone());
        let mut ctx = ChatContext::new("c1");

        // 5 chars, but contains "clear" — the heuristic must not swallow it.
        svc.decide_and_apply("clear", &mut ctx).await.unwrap();
        assert_eq!(analyzer.classify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restore_from_registry_when_memory_is_cold() {
        let activate = ScriptedAnalyzer::new(vec![ScriptedAnalyzer::decision(
            ContextAction::ActivateNew,
            Some("patient_4"),
        )]);
        let (blobs, svc) = service(activate);
        let mut ctx = ChatContext::new("c1");
        svc.decide_and_apply("work with patient_4", &mut ctx).await.unwrap();

        // New in-memory context, same conversation: registry restores it.
        let analyzer = ScriptedAnalyzer::new(vec![]);
        let svc = ContextService::new(
            RegistryStore::new(blobs.clone()),
            HistoryStore::new(blobs.clone()),
            factory(analyzer),
            PatientIdPattern::default(),
        );
        let mut cold = ChatContext::new("c1");
        let (decision, _) = svc.decide_and_apply("go on", &mut cold).await.unwrap();

        assert_eq!(decision, ServiceDecision::RestoredFromStorage);
        assert_eq!(cold.patient_id.as_deref(), Some("patient_4"));
    }

    #[tokio::test]
    async fn clear_archives_everything_and_writes_fresh_session() {
        let analyzer = ScriptedAnalyzer::new(vec![
            ScriptedAnalyzer::decision(ContextAction::ActivateNew, Some("patient_4")),
            ScriptedAnalyzer::decision(ContextAction::Clear, None),
        ]);
        let (blobs, svc) = service(analyzer);
        let mut ctx = ChatContext::new("c1");

        svc.decide_and_apply("work with patient_4", &mut ctx).await.unwrap();
        ctx.chat_history.push(Message::user("note this"));
        svc.history.write(&ctx).await.unwrap();

        let (decision, _) = svc
            .decide_and_apply("clear patient context", &mut ctx)
            .await
            .unwrap();

        assert_eq!(decision, ServiceDecision::Clear);
        assert!(ctx.patient_id.is_none());
        assert!(ctx.patient_contexts.is_empty());

        let non_archive: Vec<String> = blobs
            .list("c1/")
            .await
            .unwrap()
            .into_iter()
            .filter(|k| !k.starts_with("c1/archive/"))
            .collect();
        assert_eq!(non_archive, vec!["c1/session_context.json"]);

        let archived = blobs.list("c1/archive/").await.unwrap();
        assert!(archived.iter().any(|k| k.contains("patient_patient_4_archived")));
        assert!(archived.iter().any(|k| k.contains("registry_archived")));
    }

    #[tokio::test]
    async fn clear_twice_is_idempotent() {
        let analyzer = ScriptedAnalyzer::new(vec![
            ScriptedAnalyzer::decision(ContextAction::ActivateNew, Some("patient_4")),
            ScriptedAnalyzer::decision(ContextAction::Clear, None),
            ScriptedAnalyzer::decision(ContextAction::Clear, None),
        ]);
        let (blobs, svc) = service(analyzer);
        let mut ctx = ChatContext::new("c1");

        svc.decide_and_apply("work with patient_4", &mut ctx).await.unwrap();
        svc.decide_and_apply("clear patient context", &mut ctx).await.unwrap();
        let (decision, _) = svc
            .decide_and_apply("clear patient context", &mut ctx)
            .await
            .unwrap();

        assert_eq!(decision, ServiceDecision::Clear);
        let non_archive: Vec<_> = blobs
            .list("c1/")
            .await
            .unwrap()
            .into_iter()
            .filter(|k| !k.starts_with("c1/archive/"))
            .collect();
        assert_eq!(non_archive, vec!["c1/session_context.json"]);
    }

    /// Store that refuses to copy one specific source path.
    struct BrokenCopyStore {
        inner: MemoryBlobStore,
        broken_src: String,
    }

    #[async_trait]
    impl huddle_storage::BlobStore for BrokenCopyStore {
        async fn get(&self, path: &str) -> huddle_storage::Result<Vec<u8>> {
            self.inner.get(path).await
        }
        async fn put(&self, path: &str, bytes: &[u8]) -> huddle_storage::Result<()> {
            self.inner.put(path, bytes).await
        }
        async fn delete(&self, path: &str) -> huddle_storage::Result<()> {
            self.inner.delete(path).await
        }
        async fn list(&self, prefix: &str) -> huddle_storage::Result<Vec<String>> {
            self.inner.list(prefix).await
        }
        async fn copy(&self, src: &str, dst: &str) -> huddle_storage::Result<()> {
            if src == self.broken_src {
                return Err(huddle_storage::StorageError::Fatal("copy refused".to_string()));
            }
            self.inner.copy(src, dst).await
        }
    }

    #[tokio::test]
    async fn partial_clear_failure_archives_the_rest_and_keeps_the_victim_live() {
        let blobs = Arc::new(BrokenCopyStore {
            inner: MemoryBlobStore::new(),
            broken_src: "c1/patient_patient_4_context.json".to_string(),
        });
        let analyzer = ScriptedAnalyzer::new(vec![
            ScriptedAnalyzer::decision(ContextAction::ActivateNew, Some("patient_4")),
            ScriptedAnalyzer::decision(ContextAction::ActivateNew, Some("patient_15")),
        ]);
        let svc = ContextService::new(
            RegistryStore::new(blobs.clone()),
            HistoryStore::new(blobs.clone()),
            factory(analyzer),
            PatientIdPattern::default(),
        );

        let mut ctx = ChatContext::new("c1");
        svc.decide_and_apply("work with patient_4", &mut ctx).await.unwrap();
        ctx.chat_history.push(Message::user("note for patient_4"));
        svc.history.write(&ctx).await.unwrap();

        svc.decide_and_apply("now with patient_15", &mut ctx).await.unwrap();
        ctx.chat_history = vec![Message::user("note for patient_15")];
        svc.history.write(&ctx).await.unwrap();

        let outcome = svc.clear_all(&mut ctx).await.unwrap();

        assert!(outcome.is_partial());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "patient_patient_4");
        assert!(outcome.archived.contains(&"patient_patient_15".to_string()));
        assert!(outcome.archived.contains(&"registry".to_string()));

        // The failed object stays live for a retry; the rest is gone.
        assert!(blobs.get("c1/patient_patient_4_context.json").await.is_ok());
        assert!(blobs
            .get("c1/patient_patient_15_context.json")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn heuristic_boundaries() {
        assert!(skip_analyzer("yes"));
        assert!(skip_analyzer("ok proceed"));
        // 16 chars: over the limit.
        assert!(!skip_analyzer("sixteen chars!!!"));
        assert!(!skip_analyzer("clear"));
        assert!(!skip_analyzer("SWITCH now"));
        assert!(!skip_analyzer("patient?"));
    }
}
