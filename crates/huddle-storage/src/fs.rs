use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::blob::BlobStore;
use crate::error::{Result, StorageError};

/// Filesystem blob backend.
///
/// Maps slash-delimited keys to files under a root directory. This is the
/// default durable backend for single-node deployments; object-store
/// adapters implement the same trait.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a blob key to an on-disk path, refusing traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(StorageError::Fatal("empty blob path".to_string()));
        }
        let mut resolved = self.root.clone();
        for part in path.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(StorageError::Fatal(format!(
                    "blob path {path:?} contains an invalid segment"
                )));
            }
            resolved.push(part);
        }
        Ok(resolved)
    }

    fn map_io(path: &str, err: std::io::Error) -> StorageError {
        match err.kind() {
            ErrorKind::NotFound => StorageError::NotFound {
                path: path.to_string(),
            },
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                StorageError::Transient(format!("{path}: {err}"))
            }
            _ => StorageError::Fatal(format!("{path}: {err}")),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(path)?;
        tokio::fs::read(&file)
            .await
            .map_err(|e| Self::map_io(path, e))
    }

    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(path, e))?;
        }
        debug!(%path, bytes = bytes.len(), "writing blob");
        tokio::fs::write(&file, bytes)
            .await
            .map_err(|e| Self::map_io(path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.resolve(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io(path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending: Vec<PathBuf> = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::map_io(prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Self::map_io(prefix, e))?
            {
                let entry_path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Self::map_io(prefix, e))?;
                if file_type.is_dir() {
                    pending.push(entry_path);
                } else if let Some(key) = key_for(&self.root, &entry_path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        // Read-then-write keeps copy retryable: a repeat run overwrites the
        // destination instead of erroring or duplicating.
        let bytes = self.get(src).await?;
        self.put(dst, &bytes).await
    }
}

/// Turn an absolute file path back into a slash-delimited blob key.
fn key_for(root: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel.iter().map(|p| p.to_str()).collect::<Option<_>>()?;
    Some(parts.join("/"))
}
