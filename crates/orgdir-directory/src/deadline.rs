//! Per-operation deadline.

use std::time::Duration;

use orgdir_core::error::{DirectoryError, DirectoryResult};
use tracing::warn;

/// Runs `fut` under `limit`. Expiry drops the future, which abandons any
/// in-flight request; storage writes are single transaction batches, so
/// nothing is left half-applied.
pub(crate) async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    fut: impl Future<Output = DirectoryResult<T>>,
) -> DirectoryResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = limit.as_millis() as u64, "Operation timed out");
            Err(DirectoryError::UpstreamFailure {
                operation: operation.into(),
                reason: "operation timed out".into(),
            })
        }
    }
}
