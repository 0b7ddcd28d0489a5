use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Literal prefix of the ephemeral grounding snapshot.
///
/// A system message starting with this prefix is injected at index 0 each
/// turn and must never reach durable storage. Both the snapshot injector
/// and the history store's write filter key off this constant; neither may
/// assume the other already ran.
pub const SNAPSHOT_PREFIX: &str = "PATIENT_CONTEXT_JSON:";

/// Default validation pattern for patient ids.
pub const DEFAULT_PATIENT_ID_PATTERN: &str = "^patient_[0-9]+$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
            Role::System => f.write_str("system"),
        }
    }
}

/// A single message in a conversation history.
///
/// `name` carries the speaking agent for assistant messages and is absent
/// for user and system messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            name: None,
            content: content.into(),
        }
    }

    pub fn assistant(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            name: Some(name.into()),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            name: None,
            content: content.into(),
        }
    }

    /// True iff this is an ephemeral grounding snapshot (never persisted).
    pub fn is_context_snapshot(&self) -> bool {
        self.role == Role::System && self.content.starts_with(SNAPSHOT_PREFIX)
    }
}

/// Compiled patient-id validation pattern.
///
/// Wraps the configured regular expression so callers validate ids against
/// one shared compiled instance instead of re-parsing the pattern string.
#[derive(Debug, Clone)]
pub struct PatientIdPattern {
    re: regex::Regex,
}

impl PatientIdPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let re = regex::Regex::new(pattern)
            .map_err(|e| CoreError::Config(format!("bad patient id pattern {pattern:?}: {e}")))?;
        Ok(Self { re })
    }

    pub fn matches(&self, id: &str) -> bool {
        self.re.is_match(id)
    }

    /// Validate `id`, returning it unchanged on success.
    pub fn validate<'a>(&self, id: &'a str) -> Result<&'a str> {
        if self.matches(id) {
            Ok(id)
        } else {
            Err(CoreError::InvalidPatientId {
                id: id.to_string(),
                pattern: self.as_str().to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        self.re.as_str()
    }
}

impl Default for PatientIdPattern {
    fn default() -> Self {
        // The default pattern is a valid regex; new() cannot fail on it.
        Self::new(DEFAULT_PATIENT_ID_PATTERN).unwrap()
    }
}

/// Everything the system knows about one patient within one conversation.
///
/// Owned by the registry; in-memory copies are caches that get rehydrated
/// every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    pub patient_id: String,
    /// Free-form clinical facts accumulated by agents. May be empty.
    #[serde(default)]
    pub facts: BTreeMap<String, serde_json::Value>,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientContext {
    pub fn new(patient_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            patient_id: patient_id.into(),
            facts: BTreeMap::new(),
            conversation_id: conversation_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The per-conversation patient roster and active pointer.
///
/// Source of truth for which patient is active and which patients are
/// known. A `BTreeMap` keeps roster iteration lexicographically sorted,
/// which the snapshot's `all_patient_ids` field relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub active_patient_id: Option<String>,
    pub patient_registry: BTreeMap<String, PatientContext>,
}

impl Registry {
    pub fn is_empty(&self) -> bool {
        self.active_patient_id.is_none() && self.patient_registry.is_empty()
    }

    /// Sorted list of every known patient id.
    pub fn patient_ids(&self) -> Vec<String> {
        self.patient_registry.keys().cloned().collect()
    }

    /// Point the active pointer at a patient already present in the roster.
    ///
    /// The invariant that `active_patient_id` is always a roster key is
    /// enforced here rather than at write time.
    pub fn set_active(&mut self, id: &str) -> Result<()> {
        if !self.patient_registry.contains_key(id) {
            return Err(CoreError::UnknownPatient { id: id.to_string() });
        }
        self.active_patient_id = Some(id.to_string());
        Ok(())
    }

    /// Insert or replace a roster entry, optionally activating it.
    pub fn upsert(&mut self, ctx: PatientContext, activate: bool) {
        let id = ctx.patient_id.clone();
        self.patient_registry.insert(id.clone(), ctx);
        if activate {
            self.active_patient_id = Some(id);
        }
    }
}

/// In-memory state for one turn of one conversation.
///
/// `patient_id` mirrors the registry's active pointer; `patient_contexts`
/// is a cache of the roster that is rehydrated from storage every turn.
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub conversation_id: String,
    pub patient_id: Option<String>,
    pub patient_contexts: BTreeMap<String, PatientContext>,
    pub chat_history: Vec<Message>,
}

impl ChatContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            patient_id: None,
            patient_contexts: BTreeMap::new(),
            chat_history: Vec::new(),
        }
    }
}
