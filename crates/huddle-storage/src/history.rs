use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use huddle_core::types::{ChatContext, Message};

use crate::blob::BlobStore;
use crate::error::Result;
use crate::paths;
use crate::retry::with_retry;

/// On-disk history document version.
const SCHEMA_VERSION: u32 = 2;

/// Serialized form of a chat history file.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryDoc {
    schema_version: u32,
    conversation_id: String,
    patient_id: Option<String>,
    chat_history: Vec<Message>,
}

/// Per-conversation, per-patient chat history persistence.
///
/// Histories are isolated by path: the session file when no patient is
/// active, one file per patient otherwise. The write path filters every
/// grounding snapshot out of the serialized document — this filter is the
/// last line of defense, and no caller may assume it ran elsewhere.
#[derive(Clone)]
pub struct HistoryStore {
    blobs: Arc<dyn BlobStore>,
}

impl HistoryStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn path_for(conversation_id: &str, patient_id: Option<&str>) -> String {
        match patient_id {
            Some(id) => paths::patient(conversation_id, id),
            None => paths::session(conversation_id),
        }
    }

    /// Load the history scoped to `patient_id` (or the session history).
    ///
    /// A missing object is not an error: it yields a `ChatContext` with an
    /// empty history, so first contact with a conversation needs no setup.
    #[instrument(skip(self))]
    pub async fn read(
        &self,
        conversation_id: &str,
        patient_id: Option<&str>,
    ) -> Result<ChatContext> {
        let path = Self::path_for(conversation_id, patient_id);

        let mut ctx = ChatContext::new(conversation_id);
        ctx.patient_id = patient_id.map(String::from);

        match with_retry("history.read", || self.blobs.get(&path)).await {
            Ok(bytes) => {
                let doc: HistoryDoc = serde_json::from_slice(&bytes)?;
                ctx.chat_history = doc.chat_history;
                debug!(%path, messages = ctx.chat_history.len(), "loaded history");
            }
            Err(e) if e.is_not_found() => {
                debug!(%path, "no history yet, starting empty");
            }
            Err(e) => return Err(e),
        }

        Ok(ctx)
    }

    /// Persist `ctx` to the path derived from its `patient_id`.
    ///
    /// Every message satisfying the snapshot predicate is dropped before
    /// serialization; persisted histories contain zero snapshots even when
    /// an upstream component forgot to strip.
    #[instrument(skip(self, ctx), fields(conversation_id = %ctx.conversation_id))]
    pub async fn write(&self, ctx: &ChatContext) -> Result<()> {
        let path = Self::path_for(&ctx.conversation_id, ctx.patient_id.as_deref());

        let chat_history: Vec<Message> = ctx
            .chat_history
            .iter()
            .filter(|m| !m.is_context_snapshot())
            .cloned()
            .collect();
        let dropped = ctx.chat_history.len() - chat_history.len();
        if dropped > 0 {
            debug!(%path, dropped, "filtered grounding snapshots before write");
        }

        let doc = HistoryDoc {
            schema_version: SCHEMA_VERSION,
            conversation_id: ctx.conversation_id.clone(),
            patient_id: ctx.patient_id.clone(),
            chat_history,
        };
        let bytes = serde_json::to_vec(&doc)?;

        with_retry("history.write", || self.blobs.put(&path, &bytes)).await
    }

    /// Move the live history file into `archive_folder`, stamped with `ts`.
    ///
    /// Returns `false` without error when the source is already missing, so
    /// a partially failed clear can be re-run.
    #[instrument(skip(self))]
    pub async fn archive_to_folder(
        &self,
        conversation_id: &str,
        patient_id: Option<&str>,
        archive_folder: &str,
        ts: &str,
    ) -> Result<bool> {
        let src = Self::path_for(conversation_id, patient_id);
        let dst = paths::archived_history(archive_folder, conversation_id, ts, patient_id);

        match with_retry("history.archive", || self.blobs.copy(&src, &dst)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(%src, "nothing to archive");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        with_retry("history.archive-delete", || self.blobs.delete(&src)).await?;
        info!(%src, %dst, "archived history");
        Ok(true)
    }
}
