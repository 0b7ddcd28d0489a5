//! The ephemeral grounding snapshot.
//!
//! Strip-then-inject runs every turn between history load and the user
//! message append. The snapshot is a pure function of (registry state,
//! conversation id, now); it exists only in memory and the history store's
//! write filter guarantees it can never leak to disk.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use huddle_core::types::{ChatContext, Message, SNAPSHOT_PREFIX};

#[derive(Serialize)]
struct SnapshotBody<'a> {
    conversation_id: &'a str,
    patient_id: Option<&'a str>,
    all_patient_ids: Vec<&'a str>,
    generated_at: String,
}

/// Remove every grounding snapshot, preserving the order of the rest.
pub fn strip(history: &mut Vec<Message>) {
    let before = history.len();
    history.retain(|m| !m.is_context_snapshot());
    let removed = before - history.len();
    if removed > 0 {
        debug!(removed, "stripped stale grounding snapshots");
    }
}

/// Prepend exactly one fresh snapshot for this turn.
///
/// Skipped when the turn knows no patient and the roster is empty, so a
/// contextless conversation carries no snapshot at all. Call `strip` first;
/// injection assumes no snapshot is present.
pub fn inject(ctx: &mut ChatContext, now: DateTime<Utc>) {
    if ctx.patient_id.is_none() && ctx.patient_contexts.is_empty() {
        return;
    }

    let body = SnapshotBody {
        conversation_id: &ctx.conversation_id,
        patient_id: ctx.patient_id.as_deref(),
        // BTreeMap keys iterate lexicographically sorted.
        all_patient_ids: ctx.patient_contexts.keys().map(String::as_str).collect(),
        generated_at: now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
    };
    // SnapshotBody serialization cannot fail: strings and lists only.
    let json = serde_json::to_string(&body).expect("snapshot body serializes");

    ctx.chat_history
        .insert(0, Message::system(format!("{SNAPSHOT_PREFIX} {json}")));
}
