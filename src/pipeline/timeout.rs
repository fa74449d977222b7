//! Timeout guard for units of work.
//!
//! Async work is abandoned by dropping its future when the deadline passes.
//! Blocking work runs on the blocking pool so the caller can stop waiting for
//! it; the thread itself finishes in the background and its result is discarded.

use std::future::Future;
use std::time::Duration;

use crate::error::{ChunkingError, Result};

/// Run `work`, failing with [`ChunkingError::TaskTimeout`] if it has not
/// completed within `timeout`. With no timeout the work runs unbounded.
///
/// Errors produced by `work` itself pass through unchanged.
pub async fn guard<F, T>(timeout: Option<Duration>, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        None => work.await,
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(ChunkingError::TaskTimeout(limit)),
        },
    }
}

/// Run blocking `work` on the blocking pool under [`guard`].
///
/// A panic inside `work` surfaces as [`ChunkingError::TaskAborted`].
pub async fn guard_blocking<F, T>(timeout: Option<Duration>, work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    guard(timeout, async move {
        handle.await.map_err(|e| ChunkingError::TaskAborted {
            task_id: 0,
            reason: format!("blocking work failed: {}", e),
        })
    })
    .await
}
