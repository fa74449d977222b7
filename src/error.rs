//! Error types for chunk derivation and task collection.

use std::time::Duration;

use thiserror::Error;

use crate::types::TreeNameSpec;

/// Errors raised while opening files, resolving trees, or running deriver tasks.
///
/// Every variant is fatal to the deriver task that raised it. The task pool
/// runner records the failure and keeps collecting sibling tasks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("unable to open {path} after {attempts} attempts: {reason}")]
    FileOpen {
        path: String,
        attempts: usize,
        reason: String,
    },

    #[error("no tree found in {path}, out of possible tree names: {spec}")]
    TreeResolution { path: String, spec: TreeNameSpec },

    #[error("invalid tree name specification: {0}")]
    InvalidSpec(String),

    #[error("task exceeded timeout of {0:?}")]
    TaskTimeout(Duration),

    #[error("task {task_id} aborted: {reason}")]
    TaskAborted { task_id: usize, reason: String },

    #[error("storage error for {path}: {reason}")]
    Store { path: String, reason: String },
}

impl ChunkingError {
    /// Whether the error came from the timeout guard.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChunkingError::TaskTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, ChunkingError>;
