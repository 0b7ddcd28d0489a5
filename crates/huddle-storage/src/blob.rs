use async_trait::async_trait;

use crate::error::Result;

/// Common interface for every blob backend (filesystem, in-memory, object
/// store adapters).
///
/// Paths are slash-delimited keys, never OS paths. Implementations must be
/// `Send + Sync` so one store can serve many conversations concurrently.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the object at `path`. `NotFound` if it does not exist.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Create or fully overwrite the object at `path`.
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Remove the object at `path`. Deleting a missing object is a no-op,
    /// so cleanup paths can be retried safely.
    async fn delete(&self, path: &str) -> Result<()>;

    /// List every object key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Copy `src` to `dst`, overwriting `dst` if present.
    ///
    /// Overwrite-on-repeat is what makes archival retryable: a failed
    /// archive run can re-copy without producing duplicates at the
    /// destination.
    async fn copy(&self, src: &str, dst: &str) -> Result<()>;
}
