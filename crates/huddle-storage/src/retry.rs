use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Maximum attempts per blob operation.
const MAX_ATTEMPTS: u32 = 3;
/// First backoff delay; doubles on each retry.
const BACKOFF_BASE_MS: u64 = 100;

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Non-transient errors (NotFound, Conflict, Fatal) return immediately —
/// only failures the backend marked retryable burn attempts.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = Duration::from_millis(BACKOFF_BASE_MS << attempt);
                warn!(op = op_name, attempt, error = %e, "transient storage failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
