//! The stable blob object layout.
//!
//! Every path the core ever reads or writes is produced here, so the
//! on-disk contract lives in one place:
//!
//! ```text
//! {conversation_id}/session_context.json
//! {conversation_id}/patient_{patient_id}_context.json
//! {conversation_id}/patient_context_registry.json
//! {conversation_id}/archive/{ts}/{conversation_id}/{ts}_session_archived.json
//! {conversation_id}/archive/{ts}/{conversation_id}/{ts}_patient_{patient_id}_archived.json
//! {conversation_id}/archive/{ts}/{ts}_patient_context_registry_archived.json
//! ```

use chrono::{DateTime, Utc};

/// Compact UTC stamp used in archive paths (e.g. `20260801T094530`).
pub fn compact_ts(t: DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%S").to_string()
}

/// Live session-scoped history (no patient active).
pub fn session(conversation_id: &str) -> String {
    format!("{conversation_id}/session_context.json")
}

/// Live patient-scoped history.
pub fn patient(conversation_id: &str, patient_id: &str) -> String {
    format!("{conversation_id}/patient_{patient_id}_context.json")
}

/// Live registry document.
pub fn registry(conversation_id: &str) -> String {
    format!("{conversation_id}/patient_context_registry.json")
}

/// Root of one timestamped archive run.
pub fn archive_folder(conversation_id: &str, ts: &str) -> String {
    format!("{conversation_id}/archive/{ts}")
}

/// Archived history file inside an archive folder.
///
/// `patient_id = None` archives the session file.
pub fn archived_history(
    archive_folder: &str,
    conversation_id: &str,
    ts: &str,
    patient_id: Option<&str>,
) -> String {
    let kind = match patient_id {
        Some(id) => format!("patient_{id}"),
        None => "session".to_string(),
    };
    format!("{archive_folder}/{conversation_id}/{ts}_{kind}_archived.json")
}

/// Archived registry file inside an archive folder.
pub fn archived_registry(archive_folder: &str, ts: &str) -> String {
    format!("{archive_folder}/{ts}_patient_context_registry_archived.json")
}
