use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use huddle_core::types::{PatientContext, Registry};

use crate::blob::BlobStore;
use crate::error::{Result, StorageError};
use crate::paths;
use crate::retry::with_retry;

/// Serialized form of the registry document.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryDoc {
    conversation_id: String,
    active_patient_id: Option<String>,
    patient_registry: BTreeMap<String, PatientContext>,
    last_updated: DateTime<Utc>,
}

/// Persistence for the per-conversation patient registry.
///
/// The registry is the source of truth for the active patient and the
/// roster; in-memory copies are caches that rehydrate from here each turn.
#[derive(Clone)]
pub struct RegistryStore {
    blobs: Arc<dyn BlobStore>,
}

impl RegistryStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Load the registry. A missing file is an empty roster, not an error.
    #[instrument(skip(self))]
    pub async fn read(&self, conversation_id: &str) -> Result<Registry> {
        let path = paths::registry(conversation_id);

        match with_retry("registry.read", || self.blobs.get(&path)).await {
            Ok(bytes) => {
                let doc: RegistryDoc = serde_json::from_slice(&bytes)?;
                Ok(Registry {
                    active_patient_id: doc.active_patient_id,
                    patient_registry: doc.patient_registry,
                })
            }
            Err(e) if e.is_not_found() => {
                debug!(%path, "no registry yet, starting empty");
                Ok(Registry::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Fully overwrite the registry document.
    ///
    /// Refuses to persist an active pointer that is not a roster key; that
    /// invariant must hold in every written document.
    #[instrument(skip(self, registry))]
    pub async fn write(&self, conversation_id: &str, registry: &Registry) -> Result<()> {
        if let Some(active) = &registry.active_patient_id {
            if !registry.patient_registry.contains_key(active) {
                return Err(StorageError::DanglingActive { id: active.clone() });
            }
        }

        let doc = RegistryDoc {
            conversation_id: conversation_id.to_string(),
            active_patient_id: registry.active_patient_id.clone(),
            patient_registry: registry.patient_registry.clone(),
            last_updated: Utc::now(),
        };
        let bytes = serde_json::to_vec(&doc)?;
        let path = paths::registry(conversation_id);

        with_retry("registry.write", || self.blobs.put(&path, &bytes)).await
    }

    /// Read-modify-write a single roster entry.
    ///
    /// Bumps `updated_at` on the affected entry; the envelope's
    /// `last_updated` is bumped by `write`. Last-writer-wins is acceptable
    /// under the single-writer-per-conversation rule. Returns the updated
    /// registry so callers can refresh their cache without a second read.
    #[instrument(skip(self, patient_ctx), fields(patient_id = %patient_ctx.patient_id))]
    pub async fn upsert(
        &self,
        conversation_id: &str,
        mut patient_ctx: PatientContext,
        activate: bool,
    ) -> Result<Registry> {
        let mut registry = self.read(conversation_id).await?;
        patient_ctx.updated_at = Utc::now();
        registry.upsert(patient_ctx, activate);
        self.write(conversation_id, &registry).await?;
        Ok(registry)
    }

    /// Move the live registry file into `archive_folder`, stamped with `ts`.
    ///
    /// Returns `false` without error when there is no live registry.
    #[instrument(skip(self))]
    pub async fn archive(
        &self,
        conversation_id: &str,
        archive_folder: &str,
        ts: &str,
    ) -> Result<bool> {
        let src = paths::registry(conversation_id);
        let dst = paths::archived_registry(archive_folder, ts);

        match with_retry("registry.archive", || self.blobs.copy(&src, &dst)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(%src, "nothing to archive");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        with_retry("registry.archive-delete", || self.blobs.delete(&src)).await?;
        info!(%src, %dst, "archived registry");
        Ok(true)
    }
}
