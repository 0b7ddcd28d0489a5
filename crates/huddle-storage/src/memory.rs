use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::blob::BlobStore;
use crate::error::{Result, StorageError};

/// In-memory blob backend.
///
/// Used by the test suites and by embedders that want the full orchestration
/// pipeline without any durable storage. A `BTreeMap` keeps `list` output
/// sorted for free.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects. Test-friendly introspection.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_string(),
            })
    }

    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let bytes = objects
            .get(src)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                path: src.to_string(),
            })?;
        objects.insert(dst.to_string(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryBlobStore::new();
        let err = store.get("c1/missing.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let store = MemoryBlobStore::new();
        store.put("c1/b.json", b"b").await.unwrap();
        store.put("c1/a.json", b"a").await.unwrap();
        store.put("c2/z.json", b"z").await.unwrap();

        let keys = store.list("c1/").await.unwrap();
        assert_eq!(keys, vec!["c1/a.json", "c1/b.json"]);
    }

    #[tokio::test]
    async fn copy_then_delete_moves_an_object() {
        let store = MemoryBlobStore::new();
        store.put("live.json", b"payload").await.unwrap();
        store.copy("live.json", "archive/live.json").await.unwrap();
        store.delete("live.json").await.unwrap();

        assert!(store.get("live.json").await.unwrap_err().is_not_found());
        assert_eq!(store.get("archive/live.json").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn delete_missing_is_a_noop() {
        let store = MemoryBlobStore::new();
        store.delete("nowhere.json").await.unwrap();
    }
}
